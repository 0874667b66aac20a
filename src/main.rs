use anyhow::{Context, Result};
use authgate::{
    auth::{password, KeyProvider},
    cli::{Cli, Commands},
    config::{self, ServerConfig},
    logging, AuthServer,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
            Commands::GenerateKeys => {
                return generate_keys(&cli);
            }
            Commands::HashPassword { password } => {
                return hash_password(password);
            }
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.clone().or(early_log.file);

    let _log_guard =
        logging::init_logging(&log_level, log_format.as_deref(), log_file.as_deref(), cli.quiet)?;

    tracing::info!("🚀 authgate starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Listen: {}", config.bind_address());
    tracing::info!("  - Private Key: {:?}", config.auth.private_key_path);
    tracing::info!("  - Public Key: {:?}", config.auth.public_key_path);
    tracing::info!("  - Algorithm: {}", config.auth.algorithm);
    tracing::info!("  - Access Token TTL: {}s", config.auth.access_token_ttl_secs);
    tracing::info!("  - Refresh Token TTL: {}s", config.auth.refresh_token_ttl_secs);
    tracing::info!("  - Revocation Backend: {:?}", config.revocation.backend);
    tracing::info!("  - Log Level: {}", log_level);
    tracing::info!(
        "  - Log Format: {:?}",
        log_format.as_deref().unwrap_or("compact")
    );
    if let Some(f) = &log_file {
        tracing::info!("  - Log File: {}", f);
    }

    // 创建服务器（密钥不可用等启动错误在绑定端口前退出）
    let server = match AuthServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 服务器初始化失败: {}", e);
            tracing::error!("💡 请检查密钥文件、用户种子文件及吊销列表目录后重试");
            process::exit(1);
        }
    };

    // 运行服务器
    if let Err(e) = server.run().await {
        tracing::error!("❌ 服务器运行失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    fs::write(path, config::DEFAULT_CONFIG_TOML)
        .with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config.validate()?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Listen: {}", config.bind_address());
    println!("  - Algorithm: {}", config.auth.algorithm);
    println!("  - Access Token TTL: {}s", config.auth.access_token_ttl_secs);
    println!("  - Refresh Token TTL: {}s", config.auth.refresh_token_ttl_secs);
    println!("  - Revocation Backend: {:?}", config.revocation.backend);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}

/// 生成（或校验已有的）密钥对
fn generate_keys(cli: &Cli) -> Result<()> {
    let config = ServerConfig::load(cli).context("加载配置失败")?;

    let provider = KeyProvider::new(
        config.auth.private_key_path.clone(),
        config.auth.public_key_path.clone(),
        &config.auth.algorithm,
    )?;
    let keypair = provider.ensure_keys().context("密钥不可用")?;

    println!("✅ 密钥对可用:");
    println!("  - Private Key: {:?}", provider.private_key_path());
    println!("  - Public Key: {:?}", provider.public_key_path());
    println!();
    print!("{}", keypair.public_key_pem());

    Ok(())
}

/// 生成 bcrypt 密码哈希
fn hash_password(password: &str) -> Result<()> {
    password::validate_new_password(password, password)?;
    let hash = password::hash_password(password)?;
    println!("{}", hash);
    Ok(())
}
