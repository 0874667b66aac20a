use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::service::AuthServiceConfig;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 认证配置
    pub auth: AuthConfig,
    /// 吊销列表配置
    pub revocation: RevocationConfig,
    /// 用户存储配置
    pub users: UsersConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            auth: AuthConfig::default(),
            revocation: RevocationConfig::default(),
            users: UsersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 私钥文件（PKCS#8 PEM）
    pub private_key_path: PathBuf,
    /// 公钥文件（SPKI PEM）
    pub public_key_path: PathBuf,
    /// 签名算法，目前只支持 EdDSA
    pub algorithm: String,
    /// 令牌签发者（iss）
    pub issuer: String,
    /// 令牌受众（aud）
    pub audience: String,
    /// access token 有效期（秒）
    pub access_token_ttl_secs: i64,
    /// refresh token 有效期（秒）
    pub refresh_token_ttl_secs: i64,
    /// 用户存储查询超时（毫秒）
    pub user_store_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            private_key_path: PathBuf::from("./keys/private_key.pem"),
            public_key_path: PathBuf::from("./keys/public_key.pem"),
            algorithm: "EdDSA".to_string(),
            issuer: "authgate".to_string(),
            audience: "authgate-client".to_string(),
            access_token_ttl_secs: 86400,
            refresh_token_ttl_secs: 86400,
            user_store_timeout_ms: 2000,
        }
    }
}

impl AuthConfig {
    pub fn user_store_timeout(&self) -> Duration {
        Duration::from_millis(self.user_store_timeout_ms)
    }

    /// 转换为认证服务配置
    pub fn service_config(&self) -> AuthServiceConfig {
        AuthServiceConfig {
            access_token_ttl: self.access_token_ttl_secs,
            refresh_token_ttl: self.refresh_token_ttl_secs,
            user_store_timeout: self.user_store_timeout(),
        }
    }
}

/// 吊销列表后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationBackend {
    Memory,
    Sled,
}

impl std::str::FromStr for RevocationBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sled" => Ok(Self::Sled),
            other => Err(format!("未知的吊销列表后端: {}", other)),
        }
    }
}

/// 吊销列表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    pub backend: RevocationBackend,
    /// sled 数据目录
    pub path: String,
    /// 过期条目清理间隔（秒）
    pub prune_interval_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            backend: RevocationBackend::Memory,
            path: "./data/revocations".to_string(),
            prune_interval_secs: 300,
        }
    }
}

impl RevocationConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// 用户存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersConfig {
    /// TOML 种子文件（`[[users]]`），不配置则以空用户表启动
    pub seed_file: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
            file: None,
        }
    }
}

/// 启动早期读取的日志配置（在完整配置加载之前初始化日志）
#[derive(Debug, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 快速读取配置文件中的 [logging] 段，读取失败时返回空配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    let path = config_file.unwrap_or("config.toml");
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };

    match toml::from_str::<TomlConfig>(&content) {
        Ok(TomlConfig {
            logging: Some(logging),
            ..
        }) => EarlyLoggingConfig {
            level: logging.level,
            format: logging.format,
            file: logging.file,
        },
        _ => EarlyLoggingConfig::default(),
    }
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).with_context(|| "配置文件格式错误")?;
        toml_config.try_into()
    }

    /// 从环境变量加载配置（AUTHGATE_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        // 服务器配置
        if let Ok(host) = env::var("AUTHGATE_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("AUTHGATE_PORT") {
            self.port = port.parse().unwrap_or(self.port);
        }

        // 认证配置
        if let Ok(path) = env::var("AUTHGATE_PRIVATE_KEY_PATH") {
            self.auth.private_key_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("AUTHGATE_PUBLIC_KEY_PATH") {
            self.auth.public_key_path = PathBuf::from(path);
        }
        if let Ok(algorithm) = env::var("AUTHGATE_ALGORITHM") {
            self.auth.algorithm = algorithm;
        }
        if let Ok(issuer) = env::var("AUTHGATE_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Ok(audience) = env::var("AUTHGATE_AUDIENCE") {
            self.auth.audience = audience;
        }
        if let Ok(ttl) = env::var("AUTHGATE_ACCESS_TOKEN_TTL_SECS") {
            self.auth.access_token_ttl_secs = ttl.parse().unwrap_or(self.auth.access_token_ttl_secs);
        }
        if let Ok(ttl) = env::var("AUTHGATE_REFRESH_TOKEN_TTL_SECS") {
            self.auth.refresh_token_ttl_secs =
                ttl.parse().unwrap_or(self.auth.refresh_token_ttl_secs);
        }
        if let Ok(timeout) = env::var("AUTHGATE_USER_STORE_TIMEOUT_MS") {
            self.auth.user_store_timeout_ms =
                timeout.parse().unwrap_or(self.auth.user_store_timeout_ms);
        }

        // 吊销列表
        if let Ok(backend) = env::var("AUTHGATE_REVOCATION_BACKEND") {
            self.revocation.backend = backend.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(path) = env::var("AUTHGATE_REVOCATION_PATH") {
            self.revocation.path = path;
        }

        // 用户
        if let Ok(seed_file) = env::var("AUTHGATE_USERS_SEED_FILE") {
            self.users.seed_file = Some(seed_file);
        }

        // 日志
        if let Ok(log_level) = env::var("AUTHGATE_LOG_LEVEL") {
            self.logging.level = log_level;
        }
        if let Ok(log_format) = env::var("AUTHGATE_LOG_FORMAT") {
            self.logging.format = Some(log_format);
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(path) = &cli.private_key {
            self.auth.private_key_path = PathBuf::from(path);
        }
        if let Some(path) = &cli.public_key {
            self.auth.public_key_path = PathBuf::from(path);
        }
        if let Some(log_level) = cli.get_log_level() {
            self.logging.level = log_level;
        }
        if let Some(log_format) = cli.get_log_format() {
            self.logging.format = Some(log_format);
        }
        if let Some(log_file) = &cli.log_file {
            self.logging.file = Some(log_file.clone());
        }
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.auth.access_token_ttl_secs <= 0 {
            bail!("auth.access_token_ttl_secs 必须为正数");
        }
        if self.auth.refresh_token_ttl_secs <= 0 {
            bail!("auth.refresh_token_ttl_secs 必须为正数");
        }
        if self.auth.access_token_ttl_secs > MAX_TOKEN_TTL_SECS
            || self.auth.refresh_token_ttl_secs > MAX_TOKEN_TTL_SECS
        {
            bail!("令牌有效期不能超过 {} 秒", MAX_TOKEN_TTL_SECS);
        }
        if self.auth.user_store_timeout_ms == 0 {
            bail!("auth.user_store_timeout_ms 必须大于 0");
        }
        if self.revocation.prune_interval_secs == 0 {
            bail!("revocation.prune_interval_secs 必须大于 0");
        }
        if self.auth.issuer.is_empty() || self.auth.audience.is_empty() {
            bail!("auth.issuer 和 auth.audience 不能为空");
        }
        Ok(())
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 从配置文件加载（如果指定），否则使用默认值
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            Self::from_toml_file("config.toml")?
        } else {
            Self::new()
        };

        // 2. 从环境变量合并（优先级高于配置文件）
        config.merge_from_env()?;

        // 3. 从命令行参数合并（最高优先级）
        config.merge_from_cli(cli);

        config.validate()?;
        Ok(config)
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    auth: Option<TomlAuthConfig>,
    revocation: Option<TomlRevocationConfig>,
    users: Option<TomlUsersConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TomlAuthConfig {
    private_key_path: Option<String>,
    public_key_path: Option<String>,
    algorithm: Option<String>,
    issuer: Option<String>,
    audience: Option<String>,
    access_token_ttl_secs: Option<i64>,
    refresh_token_ttl_secs: Option<i64>,
    user_store_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlRevocationConfig {
    backend: Option<String>,
    path: Option<String>,
    prune_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlUsersConfig {
    seed_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

impl TryFrom<TomlConfig> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(toml: TomlConfig) -> Result<Self> {
        let mut config = Self::default();

        if let Some(server) = toml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
        }

        if let Some(auth) = toml.auth {
            if let Some(path) = auth.private_key_path {
                config.auth.private_key_path = PathBuf::from(path);
            }
            if let Some(path) = auth.public_key_path {
                config.auth.public_key_path = PathBuf::from(path);
            }
            if let Some(algorithm) = auth.algorithm {
                config.auth.algorithm = algorithm;
            }
            if let Some(issuer) = auth.issuer {
                config.auth.issuer = issuer;
            }
            if let Some(audience) = auth.audience {
                config.auth.audience = audience;
            }
            if let Some(ttl) = auth.access_token_ttl_secs {
                config.auth.access_token_ttl_secs = ttl;
            }
            if let Some(ttl) = auth.refresh_token_ttl_secs {
                config.auth.refresh_token_ttl_secs = ttl;
            }
            if let Some(timeout) = auth.user_store_timeout_ms {
                config.auth.user_store_timeout_ms = timeout;
            }
        }

        if let Some(revocation) = toml.revocation {
            if let Some(backend) = revocation.backend {
                config.revocation.backend = backend.parse().map_err(anyhow::Error::msg)?;
            }
            if let Some(path) = revocation.path {
                config.revocation.path = path;
            }
            if let Some(interval) = revocation.prune_interval_secs {
                config.revocation.prune_interval_secs = interval;
            }
        }

        if let Some(users) = toml.users {
            config.users.seed_file = users.seed_file;
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
            config.logging.format = logging.format;
            config.logging.file = logging.file;
        }

        Ok(config)
    }
}

/// 令牌有效期上限（10 年）
pub const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 3600;

/// 默认配置文件内容（generate-config 子命令输出）
pub const DEFAULT_CONFIG_TOML: &str = r#"# authgate 配置文件
# 此文件由 authgate generate-config 生成

[server]
host = "127.0.0.1"
port = 8080

[auth]
private_key_path = "./keys/private_key.pem"
public_key_path = "./keys/public_key.pem"
algorithm = "EdDSA"
issuer = "authgate"
audience = "authgate-client"
access_token_ttl_secs = 86400
refresh_token_ttl_secs = 86400
user_store_timeout_ms = 2000

[revocation]
# memory | sled
backend = "memory"
path = "./data/revocations"
prune_interval_secs = 300

[users]
# seed_file = "./users.toml"

[logging]
level = "info"
format = "compact"
# file = "./logs/authgate.log"
"#;
