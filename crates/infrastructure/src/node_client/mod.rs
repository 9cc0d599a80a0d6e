//! 远程节点协议客户端
//!
//! 每个节点端点对应一个方法。所有响应先按 [`StatusEnvelope`] 检查 `status` 字段，
//! 非 "ok" 一律视为 `RemoteStatus` 错误，与HTTP状态码无关；随后再解析为端点对应的结构体。

pub mod responses;

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_core::{
    logging::StructuredLogger,
    models::{Node, SpiderArgs},
    traits::{CredentialVault, NodeDirectory},
    FleetError, FleetResult,
};
use reqwest::{multipart, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use crate::observability::FleetMetrics;

pub use reqwest::Method;
pub use responses::*;

/// 反向代理转发得到的原始响应
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// 节点HTTP客户端
///
/// 每次请求前从节点目录解析节点地址，并在需要时解密凭证附加 Basic 认证。
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    directory: Arc<dyn NodeDirectory>,
    vault: Arc<dyn CredentialVault>,
    secret: Arc<[u8]>,
}

impl NodeClient {
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        vault: Arc<dyn CredentialVault>,
        secret: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> FleetResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            http,
            directory,
            vault,
            secret: Arc::from(secret.as_ref()),
        })
    }

    pub fn directory(&self) -> &Arc<dyn NodeDirectory> {
        &self.directory
    }

    #[instrument(skip(self))]
    pub async fn daemon_status(&self, node: &str) -> FleetResult<DaemonStatus> {
        self.call(node, Method::GET, "daemonstatus.json", |req| req)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_projects(&self, node: &str) -> FleetResult<ProjectList> {
        self.call(node, Method::GET, "listprojects.json", |req| req)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_spiders(&self, node: &str, project: &str) -> FleetResult<SpiderList> {
        self.call(node, Method::GET, "listspiders.json", |req| {
            req.query(&[("project", project)])
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn list_versions(&self, node: &str, project: &str) -> FleetResult<VersionList> {
        self.call(node, Method::GET, "listversions.json", |req| {
            req.query(&[("project", project)])
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn list_jobs(&self, node: &str) -> FleetResult<JobListing> {
        self.call(node, Method::GET, "listjobs.json", |req| req).await
    }

    #[instrument(skip(self))]
    pub async fn log_stats(&self, node: &str) -> FleetResult<LogStats> {
        self.call(node, Method::GET, "logs/stats.json", |req| req).await
    }

    /// 调度一次 spider 运行，`args` 中的 project/spider 键会被忽略
    #[instrument(skip(self, args))]
    pub async fn schedule(
        &self,
        node: &str,
        project: &str,
        spider: &str,
        args: &SpiderArgs,
    ) -> FleetResult<ScheduleResponse> {
        let mut form: Vec<(&str, &str)> = vec![("project", project), ("spider", spider)];
        form.extend(
            args.pairs()
                .iter()
                .filter(|(k, _)| k != "project" && k != "spider")
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        self.call(node, Method::POST, "schedule.json", |req| req.form(&form))
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, node: &str, project: &str, job_id: &str) -> FleetResult<CancelResponse> {
        self.call(node, Method::POST, "cancel.json", |req| {
            req.form(&[("project", project), ("job", job_id)])
        })
        .await
    }

    /// 上传 egg，文件名为 `fleet-{node}/{project}.egg`
    #[instrument(skip(self, egg), fields(egg.size = egg.len()))]
    pub async fn add_version(
        &self,
        node: &str,
        project: &str,
        version: &str,
        egg: Vec<u8>,
    ) -> FleetResult<AddVersionResponse> {
        let part = multipart::Part::bytes(egg)
            .file_name(format!("fleet-{node}/{project}.egg"))
            .mime_str("application/octet-stream")
            .map_err(|e| FleetError::Internal(format!("构造上传内容失败: {e}")))?;
        let form = multipart::Form::new()
            .text("project", project.to_string())
            .text("version", version.to_string())
            .part("egg", part);

        self.call(node, Method::POST, "addversion.json", |req| req.multipart(form))
            .await
    }

    /// 将请求原样转发到节点，用于浏览器访问节点日志和条目
    #[instrument(skip(self, body, content_type))]
    pub async fn forward(
        &self,
        node: &str,
        method: Method,
        path: &str,
        query: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> FleetResult<ProxyResponse> {
        let record = self.directory.get_node(node).await?;
        let mut url = Self::endpoint_url(&record, path)?;
        url.set_query(query.filter(|q| !q.is_empty()));

        let mut request = self
            .http
            .request(method, url)
            .header("x-forwarded-prefix", format!("/{node}/scrapyd-backend"))
            .body(body);
        if let Some(content_type) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        let request = self.authorize(&record, request)?;

        let response = request.send().await.map_err(|e| FleetError::Network {
            node: node.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| FleetError::Network {
            node: node.to_string(),
            message: e.to_string(),
        })?;

        Ok(ProxyResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }

    async fn call<T, F>(
        &self,
        node: &str,
        method: Method,
        endpoint: &'static str,
        customize: F,
    ) -> FleetResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let started = Instant::now();
        let result = self.execute(node, method, endpoint, customize).await;
        FleetMetrics::record_node_request(endpoint, result.is_ok(), started.elapsed());

        if let Err(e) = &result {
            StructuredLogger::log_node_request_failed(node, endpoint, &e.to_string());
        }
        result
    }

    async fn execute<T, F>(
        &self,
        node: &str,
        method: Method,
        endpoint: &'static str,
        customize: F,
    ) -> FleetResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let record = self.directory.get_node(node).await?;
        let url = Self::endpoint_url(&record, endpoint)?;
        debug!("请求节点 {} {} {}", node, method, url);

        let request = self.authorize(&record, customize(self.http.request(method, url)))?;
        let response = request.send().await.map_err(|e| FleetError::Network {
            node: node.to_string(),
            message: e.to_string(),
        })?;
        let http_status = response.status();
        let body = response.bytes().await.map_err(|e| FleetError::Network {
            node: node.to_string(),
            message: e.to_string(),
        })?;

        decode_body(node, http_status.as_u16(), &body)
    }

    fn authorize(&self, node: &Node, request: RequestBuilder) -> FleetResult<RequestBuilder> {
        let Some(username) = node.username.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(request);
        };
        let password = node
            .password
            .as_deref()
            .map(|cipher| self.vault.decrypt(cipher, &self.secret))
            .transpose()?;

        Ok(request.basic_auth(username, password))
    }

    /// 在节点基础路径后追加端点路径
    fn endpoint_url(node: &Node, endpoint: &str) -> FleetResult<Url> {
        let mut url = Url::parse(&node.url).map_err(|e| {
            FleetError::validation(format!("节点 {} 的地址无效 {}: {e}", node.name, node.url))
        })?;
        url.path_segments_mut()
            .map_err(|_| FleetError::validation(format!("节点 {} 的地址无效: {}", node.name, node.url)))?
            .pop_if_empty()
            .extend(endpoint.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

/// 先检查状态字段再解析具体结构
fn decode_body<T: DeserializeOwned>(node: &str, http_status: u16, body: &[u8]) -> FleetResult<T> {
    let envelope: StatusEnvelope = serde_json::from_slice(body).map_err(|e| FleetError::Decode {
        node: node.to_string(),
        message: format!("HTTP {http_status}: {e}"),
    })?;

    if !envelope.is_ok() {
        return Err(FleetError::RemoteStatus {
            node: node.to_string(),
            status: envelope.status,
            message: envelope.message.unwrap_or_default(),
        });
    }

    serde_json::from_slice(body).map_err(|e| FleetError::Decode {
        node: node.to_string(),
        message: e.to_string(),
    })
}
