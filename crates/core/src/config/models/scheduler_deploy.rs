use serde::{Deserialize, Serialize};

/// 调度与对账配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 每次节点请求的超时时间
    pub default_timeout_seconds: u64,
    /// 集群级批量请求的并发度
    pub worker_count: usize,
    pub reconcile_enabled: bool,
    pub reconcile_cron: String,
    pub jobs_page_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            worker_count: 4,
            reconcile_enabled: true,
            reconcile_cron: "*/10 * * * *".to_string(),
            jobs_page_size: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("节点请求超时时间必须大于0"));
        }

        if self.worker_count == 0 {
            return Err(anyhow::anyhow!("并发工作者数量必须大于0"));
        }

        if self.reconcile_enabled && self.reconcile_cron.trim().is_empty() {
            return Err(anyhow::anyhow!("启用对账时必须配置对账CRON表达式"));
        }

        if self.jobs_page_size == 0 {
            return Err(anyhow::anyhow!("作业分页大小必须大于0"));
        }

        Ok(())
    }
}

/// 部署配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub python_path: String,
    pub build_timeout_seconds: u64,
    pub worker_count: usize,
    /// 部署令牌签名密钥
    pub token_secret: String,
    pub token_ttl_seconds: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            python_path: "python3".to_string(),
            build_timeout_seconds: 120,
            worker_count: 4,
            token_secret: "fleet-deploy-secret-change-this-in-production".to_string(),
            token_ttl_seconds: 600,
        }
    }
}

impl DeployConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.python_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Python解释器路径不能为空"));
        }

        if self.build_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("构建超时时间必须大于0"));
        }

        if self.worker_count == 0 {
            return Err(anyhow::anyhow!("部署并发数必须大于0"));
        }

        if self.token_secret.len() < 32 {
            return Err(anyhow::anyhow!("部署令牌密钥长度应至少32字符"));
        }

        if self.token_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("部署令牌有效期必须大于0"));
        }

        Ok(())
    }
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// 节点凭证加密密钥，长度必须为16或32字节
    pub credential_secret: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            credential_secret: "change-this-32-byte-credential!!".to_string(),
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.credential_secret.len() {
            16 | 32 => Ok(()),
            len => Err(anyhow::anyhow!(
                "凭证加密密钥长度必须为16或32字节，当前为{}字节",
                len
            )),
        }
    }
}
