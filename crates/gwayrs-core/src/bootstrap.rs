use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ipnet::IpNet;

use gwayrs_storage::{SeaOrmStorage, Storage};

use crate::state::AppState;

#[derive(Debug, Clone, Parser)]
#[command(name = "gwayrs", version, about = "Multi-protocol LLM gateway routing core")]
pub struct CliArgs {
    /// Database DSN (defaults to a local sqlite file).
    #[arg(long, env = "GWAYRS_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "GWAYRS_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "GWAYRS_PORT")]
    pub port: Option<String>,

    /// Admin token. When unset, every inbound key is treated as admin.
    #[arg(long, env = "GWAYRS_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Optional shared-KV URL (redis://...) for the RPM/IP/token-lock gates.
    /// Falls back to the in-memory gate when unset.
    #[arg(long, env = "GWAYRS_KV_URL")]
    pub kv_url: Option<String>,

    /// Comma-separated CIDRs trusted to set `X-Forwarded-For`.
    #[arg(long, env = "GWAYRS_TRUSTED_PROXIES")]
    pub trusted_proxies: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub admin_token: Option<String>,
    pub kv_url: Option<String>,
    pub trusted_proxies: Vec<IpNet>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            admin_token: None,
            kv_url: None,
            trusted_proxies: Vec::new(),
        }
    }
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
    pub config: AppConfig,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    let host = sanitize_optional_env_value(args.host.clone()).unwrap_or_else(|| "0.0.0.0".into());
    let port = parse_u16_env_value(args.port.clone(), "GWAYRS_PORT")?.unwrap_or(8080);
    let admin_token = sanitize_optional_env_value(args.admin_token.clone());
    let kv_url = sanitize_optional_env_value(args.kv_url.clone());
    let trusted_proxies = parse_trusted_proxies(args.trusted_proxies.clone())?;

    ensure_sqlite_parent_dir(&dsn)?;

    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await.context("connect storage")?);
    storage.sync().await.context("schema sync")?;

    let mut state = AppState::new(storage.clone(), admin_token.clone())
        .with_trusted_proxies(trusted_proxies.clone());
    state = apply_shared_gate(state, kv_url.as_deref()).await?;

    Ok(Bootstrap {
        storage,
        state: Arc::new(state),
        config: AppConfig {
            host,
            port,
            admin_token,
            kv_url,
            trusted_proxies,
        },
    })
}

/// Swaps in the shared-KV gate when a URL is configured and the backend is
/// compiled in; otherwise the in-memory gate from `AppState::new` stays.
#[cfg(feature = "redis-backend")]
async fn apply_shared_gate(state: AppState, kv_url: Option<&str>) -> anyhow::Result<AppState> {
    let Some(url) = kv_url else {
        return Ok(state);
    };
    let gate = gwayrs_resilience::RedisGate::connect(url)
        .await
        .context("connect shared-kv gate")?;
    Ok(state.with_gate(Arc::new(gate)))
}

#[cfg(not(feature = "redis-backend"))]
async fn apply_shared_gate(state: AppState, kv_url: Option<&str>) -> anyhow::Result<AppState> {
    if kv_url.is_some() {
        anyhow::bail!("GWAYRS_KV_URL set but this binary was built without the redis-backend feature");
    }
    Ok(state)
}

fn parse_trusted_proxies(value: Option<String>) -> anyhow::Result<Vec<IpNet>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<IpNet>().with_context(|| format!("invalid trusted proxy cidr: {s}")))
        .collect()
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("GWAYRS_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/gwayrs.db?mode=rwc");
    }
    "sqlite://gwayrs.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }

    if normalized.to_ascii_lowercase() == ":memory:" {
        return None;
    }

    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}
