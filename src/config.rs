use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

/// Which storage backend holds content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Blobs on the local filesystem under `backend_location_root`.
    Local,
    /// Blobs in an HTTP object store bucket at `backend_location_root`.
    ObjectStore,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "object-store" | "object_store" | "objectstore" => Ok(Self::ObjectStore),
            other => bail!("unknown backend kind `{}`", other),
        }
    }
}

/// Options the core recognizes for storage.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend_kind: BackendKind,
    /// Directory for `Local`, bucket URL for `ObjectStore`.
    pub backend_location_root: String,
    /// Directory holding in-flight uploads.
    pub staging_root: String,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageConfig,
    /// Seconds between background reclamation sweeps. 0 disables the sweeper.
    pub reclaim_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Cloud drive backend with deduplicated storage")]
pub struct Args {
    /// Host to bind to (overrides MATTER_DRIVE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MATTER_DRIVE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides MATTER_DRIVE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend (overrides MATTER_DRIVE_BACKEND_KIND)
    #[arg(long, value_enum)]
    pub backend_kind: Option<BackendKind>,

    /// Backend root directory or bucket URL (overrides MATTER_DRIVE_BACKEND_ROOT)
    #[arg(long)]
    pub backend_root: Option<String>,

    /// Staging directory for uploads (overrides MATTER_DRIVE_STAGING_ROOT)
    #[arg(long)]
    pub staging_root: Option<String>,

    /// Seconds between reclamation sweeps (overrides MATTER_DRIVE_RECLAIM_INTERVAL_SECS)
    #[arg(long)]
    pub reclaim_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Merge parsed arguments over environment values and defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("MATTER_DRIVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env::<u16>("MATTER_DRIVE_PORT")?.unwrap_or(3000);
        let env_db = env::var("MATTER_DRIVE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/matter_drive.db".into());
        let env_kind = parse_env::<BackendKind>("MATTER_DRIVE_BACKEND_KIND")?
            .unwrap_or(BackendKind::Local);
        let env_root =
            env::var("MATTER_DRIVE_BACKEND_ROOT").unwrap_or_else(|_| "./data/blobs".into());
        let env_staging =
            env::var("MATTER_DRIVE_STAGING_ROOT").unwrap_or_else(|_| "./data/staging".into());
        let env_reclaim = parse_env::<u64>("MATTER_DRIVE_RECLAIM_INTERVAL_SECS")?.unwrap_or(300);

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            storage: StorageConfig {
                backend_kind: args.backend_kind.unwrap_or(env_kind),
                backend_location_root: args.backend_root.unwrap_or(env_root),
                staging_root: args.staging_root.unwrap_or(env_staging),
            },
            reclaim_interval_secs: args.reclaim_interval_secs.unwrap_or(env_reclaim),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
