//! 节点协议模拟服务器
//!
//! 在 `127.0.0.1:0` 上启动一个 axum 服务，实现节点的全部 JSON 端点。
//! 测试可以切换错误模式、替换作业列表和统计文档、为上传增加延迟，并检查收到的请求。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Query, RawQuery, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// 模拟节点收到的一次请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub endpoint: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
    pub authorization: Option<String>,
    pub forwarded_prefix: Option<String>,
}

impl RecordedRequest {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct FakeNodeState {
    name: String,
    failing: Mutex<Option<String>>,
    listing: Mutex<Value>,
    stats: Mutex<Option<Value>>,
    projects: Mutex<Vec<String>>,
    spiders: Mutex<Vec<String>>,
    versions: Mutex<Vec<String>>,
    upload_delay: Mutex<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
    upload_events: Mutex<Vec<String>>,
    job_counter: AtomicUsize,
}

impl FakeNodeState {
    fn record(
        &self,
        endpoint: &str,
        method: &Method,
        fields: Vec<(String, String)>,
        headers: &HeaderMap,
    ) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            fields,
            authorization: header("authorization"),
            forwarded_prefix: header("x-forwarded-prefix"),
        });
    }

    /// 错误模式下的统一响应
    fn failure(&self) -> Option<Response> {
        self.failing.lock().unwrap().clone().map(|message| {
            Json(json!({
                "node_name": self.name,
                "status": "error",
                "message": message,
            }))
            .into_response()
        })
    }

    fn ok(&self, mut body: Value) -> Response {
        if let Value::Object(map) = &mut body {
            map.insert("node_name".to_string(), json!(self.name));
            map.insert("status".to_string(), json!("ok"));
        }
        Json(body).into_response()
    }
}

type Shared = Arc<FakeNodeState>;

/// 运行中的模拟节点，drop 时停止服务
pub struct FakeNode {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl FakeNode {
    pub async fn start(name: &str) -> Self {
        let state = Arc::new(FakeNodeState {
            name: name.to_string(),
            failing: Mutex::new(None),
            listing: Mutex::new(json!({"pending": [], "running": [], "finished": []})),
            stats: Mutex::new(Some(json!({"datas": {}}))),
            projects: Mutex::new(vec!["bookstore".to_string()]),
            spiders: Mutex::new(vec!["books".to_string(), "authors".to_string()]),
            versions: Mutex::new(Vec::new()),
            upload_delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            upload_events: Mutex::new(Vec::new()),
            job_counter: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/daemonstatus.json", get(daemon_status))
            .route("/listprojects.json", get(list_projects))
            .route("/listspiders.json", get(list_spiders))
            .route("/listversions.json", get(list_versions))
            .route("/listjobs.json", get(list_jobs))
            .route("/logs/stats.json", get(log_stats))
            .route("/schedule.json", post(schedule))
            .route("/cancel.json", post(cancel))
            .route("/addversion.json", post(add_version))
            .fallback(proxied)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake node");
        let addr = listener.local_addr().expect("fake node addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// 之后所有端点都返回 `status: error`
    pub fn set_failing(&self, message: Option<&str>) {
        *self.state.failing.lock().unwrap() = message.map(str::to_string);
    }

    /// 替换 listjobs.json 的 pending/running/finished 内容
    pub fn set_listing(&self, listing: Value) {
        *self.state.listing.lock().unwrap() = listing;
    }

    /// 替换 logs/stats.json 的内容，`None` 时该端点返回错误状态
    pub fn set_stats(&self, stats: Option<Value>) {
        *self.state.stats.lock().unwrap() = stats;
    }

    pub fn set_spiders(&self, spiders: &[&str]) {
        *self.state.spiders.lock().unwrap() = spiders.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        *self.state.upload_delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, endpoint: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }

    /// 上传开始与结束的顺序记录，形如 `start:{version}` / `end:{version}`
    pub fn upload_events(&self) -> Vec<String> {
        self.state.upload_events.lock().unwrap().clone()
    }

    pub fn versions(&self) -> Vec<String> {
        self.state.versions.lock().unwrap().clone()
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn daemon_status(State(state): State<Shared>, method: Method, headers: HeaderMap) -> Response {
    state.record("daemonstatus.json", &method, Vec::new(), &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    let listing = state.listing.lock().unwrap().clone();
    let count = |key: &str| listing[key].as_array().map(|a| a.len()).unwrap_or(0);
    state.ok(json!({
        "pending": count("pending"),
        "running": count("running"),
        "finished": count("finished"),
    }))
}

async fn list_projects(State(state): State<Shared>, method: Method, headers: HeaderMap) -> Response {
    state.record("listprojects.json", &method, Vec::new(), &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    let projects = state.projects.lock().unwrap().clone();
    state.ok(json!({ "projects": projects }))
}

async fn list_spiders(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    state.record("listspiders.json", &method, query, &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    let spiders = state.spiders.lock().unwrap().clone();
    state.ok(json!({ "spiders": spiders }))
}

async fn list_versions(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    state.record("listversions.json", &method, query, &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    let versions = state.versions.lock().unwrap().clone();
    state.ok(json!({ "versions": versions }))
}

async fn list_jobs(State(state): State<Shared>, method: Method, headers: HeaderMap) -> Response {
    state.record("listjobs.json", &method, Vec::new(), &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    let listing = state.listing.lock().unwrap().clone();
    state.ok(listing)
}

async fn log_stats(State(state): State<Shared>, method: Method, headers: HeaderMap) -> Response {
    state.record("logs/stats.json", &method, Vec::new(), &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    match state.stats.lock().unwrap().clone() {
        Some(stats) => state.ok(stats),
        None => Json(json!({"status": "error", "message": "logparser 未运行"})).into_response(),
    }
}

async fn schedule(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    let jobid = fields
        .iter()
        .find(|(k, _)| k == "jobid")
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| format!("fake-job-{}", state.job_counter.fetch_add(1, Ordering::SeqCst)));
    state.record("schedule.json", &method, fields, &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    state.ok(json!({ "jobid": jobid }))
}

async fn cancel(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    state.record("cancel.json", &method, fields, &headers);
    if let Some(failure) = state.failure() {
        return failure;
    }
    state.ok(json!({ "prevstate": "running" }))
}

async fn add_version(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut fields = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "egg" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            fields.push(("egg_filename".to_string(), file_name));
            fields.push(("egg_size".to_string(), size.to_string()));
        } else {
            let value = field.text().await.unwrap_or_default();
            fields.push((name, value));
        }
    }
    let version = fields
        .iter()
        .find(|(k, _)| k == "version")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    state.record("addversion.json", &method, fields.clone(), &headers);

    state.upload_events.lock().unwrap().push(format!("start:{version}"));
    let delay = *state.upload_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    state.upload_events.lock().unwrap().push(format!("end:{version}"));

    if let Some(failure) = state.failure() {
        return failure;
    }
    state.versions.lock().unwrap().push(version.clone());
    let project = fields
        .iter()
        .find(|(k, _)| k == "project")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let spiders = state.spiders.lock().unwrap().len();
    state.ok(json!({ "project": project, "version": version, "spiders": spiders }))
}

/// 日志、条目等非 JSON 端点，回显请求以便检查代理转发
async fn proxied(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let mut fields = Vec::new();
    if let Some(query) = &query {
        fields.push(("query".to_string(), query.clone()));
    }
    if !body.is_empty() {
        fields.push(("body".to_string(), String::from_utf8_lossy(&body).into_owned()));
    }
    let path = uri.path().trim_start_matches('/').to_string();
    state.record(&path, &method, fields, &headers);

    if path.starts_with("missing") {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        format!("{} {} @ {}", method, uri.path(), state.name),
    )
        .into_response()
}
