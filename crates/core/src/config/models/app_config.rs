use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    scheduler_deploy::{DeployConfig, SchedulerConfig, SecurityConfig},
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub deploy: DeployConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀 FLEET_，层级分隔符 __，如 FLEET_DATABASE__URL）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("database.min_connections", defaults.database.min_connections)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds,
            )?
            .set_default("api.bind_address", defaults.api.bind_address)?
            .set_default("api.cors_enabled", defaults.api.cors_enabled)?
            .set_default(
                "api.request_timeout_seconds",
                defaults.api.request_timeout_seconds,
            )?
            .set_default(
                "scheduler.default_timeout_seconds",
                defaults.scheduler.default_timeout_seconds,
            )?
            .set_default("scheduler.worker_count", defaults.scheduler.worker_count as u64)?
            .set_default(
                "scheduler.reconcile_enabled",
                defaults.scheduler.reconcile_enabled,
            )?
            .set_default("scheduler.reconcile_cron", defaults.scheduler.reconcile_cron)?
            .set_default("scheduler.jobs_page_size", defaults.scheduler.jobs_page_size)?
            .set_default("deploy.python_path", defaults.deploy.python_path)?
            .set_default(
                "deploy.build_timeout_seconds",
                defaults.deploy.build_timeout_seconds,
            )?
            .set_default("deploy.worker_count", defaults.deploy.worker_count as u64)?
            .set_default("deploy.token_secret", defaults.deploy.token_secret)?
            .set_default("deploy.token_ttl_seconds", defaults.deploy.token_ttl_seconds)?
            .set_default(
                "security.credential_secret",
                defaults.security.credential_secret,
            )?
            .set_default("observability.log_level", defaults.observability.log_level)?
            .set_default("observability.log_format", defaults.observability.log_format)?
            .set_default(
                "observability.metrics_enabled",
                defaults.observability.metrics_enabled,
            )?
            .set_default(
                "observability.metrics_endpoint",
                defaults.observability.metrics_endpoint,
            )?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/fleet.toml", "fleet.toml", "/etc/crawl-fleet/fleet.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置，缺省字段使用默认值
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.scheduler.validate().context("调度配置验证失败")?;
        self.deploy.validate().context("部署配置验证失败")?;
        self.security.validate().context("安全配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.scheduler.default_timeout_seconds, 30);
        assert_eq!(config.scheduler.reconcile_cron, "*/10 * * * *");
        assert_eq!(config.deploy.python_path, "python3");
        assert_eq!(config.observability.metrics_endpoint, "/metrics");
    }

    #[test]
    fn test_config_from_partial_toml() {
        let toml_content = r#"
[database]
url = "sqlite::memory:"

[scheduler]
worker_count = 8
reconcile_enabled = false

[deploy]
build_timeout_seconds = 10
"#;
        let config = AppConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.scheduler.worker_count, 8);
        assert!(!config.scheduler.reconcile_enabled);
        assert_eq!(config.deploy.build_timeout_seconds, 10);
        assert_eq!(config.deploy.worker_count, 4);
    }

    #[test]
    fn test_invalid_credential_secret_rejected() {
        let toml_content = r#"
[security]
credential_secret = "too-short"
"#;
        let err = AppConfig::from_toml(toml_content).unwrap_err();
        assert!(format!("{err:#}").contains("安全配置验证失败"));
    }

    #[test]
    fn test_non_sqlite_url_rejected() {
        let mut config = AppConfig::default();
        config.database.url = "postgresql://localhost/fleet".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.api.bind_address, config.api.bind_address);
        assert_eq!(parsed.security.credential_secret, config.security.credential_secret);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[api]\nbind_address = \"127.0.0.1:9999\"").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9999");
        assert_eq!(config.deploy.token_ttl_seconds, 600);
    }

    #[test]
    fn test_bundled_config_matches_defaults() {
        let bundled = AppConfig::from_toml(include_str!("../../../../../config/fleet.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(bundled.api.bind_address, defaults.api.bind_address);
        assert_eq!(bundled.scheduler.reconcile_cron, defaults.scheduler.reconcile_cron);
        assert_eq!(bundled.deploy.token_secret, defaults.deploy.token_secret);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/fleet.toml")).is_err());
    }
}
