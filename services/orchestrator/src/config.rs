use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::calls::CallConfig;
use crate::gateway::LiveKitConfig;
use crate::scaling::ScalingConfig;
use crate::store::DbConfig;
use crate::supervisor::{SupervisorConfig, WorkerCommand};

/// Where call records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Development mode: apply database migrations on startup.
    pub dev_mode: bool,
    pub store: StoreBackend,
    pub database: DbConfig,
    pub livekit: LiveKitConfig,
    pub worker: WorkerCommand,
    pub supervisor: SupervisorConfig,
    pub scaling: ScalingConfig,
    pub calls: CallConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("CALLHUB_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("CALLHUB_LISTEN_ADDR")?;

        let log_level = std::env::var("CALLHUB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("CALLHUB_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        // Postgres whenever a database is configured, unless overridden.
        let store = match std::env::var("CALLHUB_STORE") {
            Ok(value) => parse_store_backend(&value)?,
            Err(_) if std::env::var("DATABASE_URL").is_ok() => StoreBackend::Postgres,
            Err(_) => StoreBackend::Memory,
        };

        let mut database = DbConfig::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            database.database_url = url;
        }
        if let Ok(size) = std::env::var("DB_MAX_CONNECTIONS") {
            database.pool_size = size.parse().context("DB_MAX_CONNECTIONS")?;
        }

        let mut worker = WorkerCommand::default();
        if let Ok(interpreter) = std::env::var("CALLHUB_WORKER_INTERPRETER") {
            worker.interpreter = interpreter;
        }
        if let Ok(dir) = std::env::var("CALLHUB_WORKER_SCRIPT_DIR") {
            worker.script_dir = PathBuf::from(dir);
        }

        let defaults = SupervisorConfig::default();
        let supervisor = SupervisorConfig {
            warmup_period: env_secs("CALLHUB_WARMUP_SECS", defaults.warmup_period)?,
            heartbeat_timeout: env_secs("CALLHUB_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout)?,
            graceful_stop_timeout: env_secs(
                "CALLHUB_GRACEFUL_STOP_SECS",
                defaults.graceful_stop_timeout,
            )?,
            eviction_delay: env_secs("CALLHUB_EVICTION_DELAY_SECS", defaults.eviction_delay)?,
            monitor_interval: env_secs("CALLHUB_MONITOR_INTERVAL_SECS", defaults.monitor_interval)?,
            ..defaults
        };

        let scaling = ScalingConfig {
            auto_scale_interval: env_secs(
                "CALLHUB_AUTO_SCALE_INTERVAL_SECS",
                ScalingConfig::default().auto_scale_interval,
            )?,
        };

        let defaults = CallConfig::default();
        let calls = CallConfig {
            sip_trunk_id: std::env::var("SIP_TRUNK_ID").unwrap_or_default(),
            no_answer_timeout: env_secs("CALLHUB_NO_ANSWER_TIMEOUT_SECS", defaults.no_answer_timeout)?,
            watchdog_poll_interval: env_secs(
                "CALLHUB_WATCHDOG_POLL_SECS",
                defaults.watchdog_poll_interval,
            )?,
            ..defaults
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database,
            livekit: LiveKitConfig::from_env(),
            worker,
            supervisor,
            scaling,
            calls,
        })
    }
}

fn parse_store_backend(value: &str) -> Result<StoreBackend> {
    match value.to_lowercase().as_str() {
        "memory" => Ok(StoreBackend::Memory),
        "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
        other => bail!("CALLHUB_STORE must be memory or postgres, got {other:?}"),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{name} must be a whole number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
