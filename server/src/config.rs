use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(name = "pubgoods-server", about = "Public goods game room server")]
pub struct ServerConfig {
    #[arg(long, env = "PUBGOODS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 9001)]
    pub port: u16,

    /// Rooms without any action for this long are evicted.
    #[arg(long, env = "PUBGOODS_ROOM_IDLE_TTL", default_value_t = 7200)]
    pub room_idle_ttl_secs: u64,

    #[arg(long, env = "PUBGOODS_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Emit logs as JSON lines instead of plain text.
    #[arg(long, env = "PUBGOODS_LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn room_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.room_idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // a zero period would make tokio's interval panic
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pubgoods_server=debug"));

    let base = fmt::layer().with_target(false).with_thread_ids(false);
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(base.json()).init();
    } else {
        registry.with(base).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::parse_from(["pubgoods-server"]);
        if std::env::var_os("PUBGOODS_ROOM_IDLE_TTL").is_none() {
            assert_eq!(cfg.room_idle_ttl(), Duration::from_secs(7200));
        }
        assert!(cfg.sweep_interval() >= Duration::from_secs(1));
    }

    #[test]
    fn flags_override() {
        let cfg = ServerConfig::parse_from([
            "pubgoods-server",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--sweep-interval-secs",
            "0",
            "--log-json",
        ]);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
        assert!(cfg.log_json);
    }
}
