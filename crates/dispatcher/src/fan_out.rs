//! 有界并发扇出池
//!
//! 把一组相互独立的节点调用分发给固定数量的工作协程执行，保证每个输入恰好产出一个结果：
//! 单个调用失败或 panic 都会转换为错误结果，不会阻塞其他输入。
//! 结果之间没有顺序保证，需要稳定展示顺序的调用方应在收集后按节点名排序。

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleet_core::{logging::StructuredLogger, FleetError, FleetResult};
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// 单个输入的调用结果
#[derive(Debug)]
pub struct FanOutResult<T, R> {
    pub item: T,
    pub result: FleetResult<R>,
}

impl<T, R> FanOutResult<T, R> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// 运行中的扇出批次
///
/// 通过 [`FanOut::next`] 逐个取出结果，取满输入数量后返回 `None`。
/// 批次被提前丢弃时，尚未开始的输入不再执行，已在执行中的调用会跑完。
pub struct FanOut<T, R> {
    results: mpsc::Receiver<FanOutResult<T, R>>,
    workers: Vec<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    expected: usize,
    received: usize,
}

impl<T, R> FanOut<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn spawn<F, Fut>(items: Vec<T>, worker_count: usize, call: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FleetResult<R>> + Send + 'static,
    {
        let expected = items.len();
        let capacity = expected.max(1);
        let (job_tx, job_rx) = mpsc::channel::<T>(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);

        for item in items {
            // 容量等于输入数量，提交不会阻塞
            let _ = job_tx.try_send(item);
        }
        drop(job_tx);

        let workers_needed = if expected == 0 {
            0
        } else {
            worker_count.clamp(1, expected)
        };
        debug!("扇出批次: {} 个输入, {} 个工作协程", expected, workers_needed);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let call = Arc::new(call);
        let cancelled = Arc::new(AtomicBool::new(false));
        let workers = (0..workers_needed)
            .map(|_| {
                tokio::spawn(worker_loop(
                    job_rx.clone(),
                    result_tx.clone(),
                    call.clone(),
                    cancelled.clone(),
                ))
            })
            .collect();

        Self {
            results: result_rx,
            workers,
            cancelled,
            expected,
            received: 0,
        }
    }

    /// 取下一个完成的结果，全部取完后返回 `None`
    pub async fn next(&mut self) -> Option<FanOutResult<T, R>> {
        if self.received >= self.expected {
            return None;
        }
        let result = self.results.recv().await?;
        self.received += 1;
        Some(result)
    }

    /// 停止分发尚未开始的输入，它们会以错误结果返回
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.expected == 0
    }

    /// 等待所有工作协程退出
    pub async fn join(mut self) {
        for handle in std::mem::take(&mut self.workers) {
            if let Err(e) = handle.await {
                StructuredLogger::log_worker_panic("fan_out", &e.to_string());
            }
        }
    }

    /// 取完全部结果并回收工作协程
    pub async fn collect(mut self) -> Vec<FanOutResult<T, R>> {
        let mut results = Vec::with_capacity(self.expected);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        self.join().await;
        results
    }
}

impl<T, R> Drop for FanOut<T, R> {
    fn drop(&mut self) {
        if self.received < self.expected {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

async fn worker_loop<T, R, F, Fut>(
    jobs: Arc<Mutex<mpsc::Receiver<T>>>,
    results: mpsc::Sender<FanOutResult<T, R>>,
    call: Arc<F>,
    cancelled: Arc<AtomicBool>,
) where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FleetResult<R>> + Send + 'static,
{
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(item) = next else {
            break;
        };

        let result = if cancelled.load(Ordering::SeqCst) {
            Err(FleetError::Internal("扇出批次已取消，未执行".to_string()))
        } else {
            let call = call.clone();
            let input = item.clone();
            match AssertUnwindSafe(async move { call(input).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    StructuredLogger::log_worker_panic("fan_out", &message);
                    Err(FleetError::WorkerPanic(message))
                }
            }
        };

        // 接收端已丢弃时继续消费剩余输入，保证工作协程能退出
        let _ = results.send(FanOutResult { item, result }).await;
    }
}

/// 一次性扇出并收集全部结果
pub async fn fan_out<T, R, F, Fut>(
    items: Vec<T>,
    worker_count: usize,
    call: F,
) -> Vec<FanOutResult<T, R>>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FleetResult<R>> + Send + 'static,
{
    FanOut::spawn(items, worker_count, call).collect().await
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_item_yields_one_result() {
        let results = fan_out((0..20).collect::<Vec<u32>>(), 4, |n| async move {
            if n % 3 == 0 {
                Err(FleetError::Network {
                    node: format!("node-{n}"),
                    message: "connection refused".to_string(),
                })
            } else {
                Ok(n * 2)
            }
        })
        .await;

        assert_eq!(results.len(), 20);
        assert_eq!(results.iter().filter(|r| !r.is_ok()).count(), 7);

        let mut items: Vec<_> = results.iter().map(|r| r.item).collect();
        items.sort_unstable();
        assert_eq!(items, (0..20).collect::<Vec<_>>());
        for r in &results {
            if let Ok(v) = &r.result {
                assert_eq!(*v, r.item * 2);
            }
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error_result() {
        let results = fan_out(vec!["a", "boom", "c"], 2, |name| async move {
            if name == "boom" {
                panic!("worker exploded");
            }
            Ok(name.len())
        })
        .await;

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].item, "boom");
        assert!(
            matches!(&failed[0].result, Err(FleetError::WorkerPanic(msg)) if msg.contains("worker exploded"))
        );
    }

    #[tokio::test]
    async fn test_worker_count_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (a, p) = (active.clone(), peak.clone());
        let results = fan_out((0..12).collect::<Vec<_>>(), 3, move |_| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_empty_input_and_oversized_pool() {
        let results = fan_out(Vec::<u8>::new(), 8, |n| async move { Ok(n) }).await;
        assert!(results.is_empty());

        let results = fan_out(vec![1u8], 0, |n| async move { Ok(n) }).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_and_cancel() {
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let mut batch = FanOut::spawn((0..5).collect::<Vec<_>>(), 1, move |n| {
            let started = s.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(n)
            }
        });
        assert_eq!(batch.len(), 5);

        let first = batch.next().await.unwrap();
        assert!(first.is_ok());
        batch.cancel();

        let mut rest = Vec::new();
        while let Some(r) = batch.next().await {
            rest.push(r);
        }
        batch.join().await;

        assert_eq!(rest.len(), 4);
        // 取消时最多还有一个调用在执行
        assert!(started.load(Ordering::SeqCst) <= 2);
        assert!(rest.iter().filter(|r| !r.is_ok()).count() >= 3);
    }
}
