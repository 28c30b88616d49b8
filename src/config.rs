use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Default upload cap: 5 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub max_upload_bytes: u64,
    pub read_timeout_secs: u64,
    pub conceal_foreign_files: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Upload gateway with owner-scoped retrieval")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are stored (overrides UPLOAD_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Maximum accepted upload size in bytes (overrides UPLOAD_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Seconds to wait for each body chunk before aborting (overrides UPLOAD_GATEWAY_READ_TIMEOUT_SECS)
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Answer 404 instead of 403 when a caller asks for someone else's file
    #[arg(long)]
    pub conceal_foreign_files: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI args over the environment and defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("UPLOAD_GATEWAY_PORT", 3000u16)?;
        let env_storage =
            env::var("UPLOAD_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_max = env_parse("UPLOAD_GATEWAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_timeout = env_parse("UPLOAD_GATEWAY_READ_TIMEOUT_SECS", DEFAULT_READ_TIMEOUT_SECS)?;
        let env_conceal = env_parse("UPLOAD_GATEWAY_CONCEAL_FOREIGN_FILES", false)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max),
            read_timeout_secs: args.read_timeout_secs.unwrap_or(env_timeout),
            conceal_foreign_files: args.conceal_foreign_files || env_conceal,
        };

        if cfg.max_upload_bytes == 0 {
            anyhow::bail!("max upload size must be greater than zero");
        }
        if cfg.read_timeout_secs == 0 {
            anyhow::bail!("read timeout must be greater than zero");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
