use std::time::Duration;

use anyhow::Result;

/// Runtime configuration loaded from environment variables. Secrets and
/// env-specific values only; everything request-shaped lives in the registry.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub database_url: String,
    pub reconcile_interval: Duration,
    pub dispatch_max_attempts: u32,
    pub heartbeat_interval: Duration,
    pub auto_reply: Option<AutoReplyConfig>,
}

/// Auto-reply knobs. Present only when `AUTO_REPLY_TEXT` is set.
#[derive(Debug, Clone)]
pub struct AutoReplyConfig {
    pub text: String,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let auto_reply = std::env::var("AUTO_REPLY_TEXT")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|text| {
                let min_delay = Duration::from_secs(env_u64("AUTO_REPLY_MIN_DELAY_SECS", 30));
                let max_delay = Duration::from_secs(env_u64("AUTO_REPLY_MAX_DELAY_SECS", 120));
                AutoReplyConfig {
                    text,
                    min_delay,
                    // An inverted range collapses to a fixed delay.
                    max_delay: max_delay.max(min_delay),
                }
            });

        let config = Self {
            database_url: std::env::var("DATABASE_URL")?,
            reconcile_interval: Duration::from_secs(env_u64("RECONCILE_INTERVAL_SECS", 30)),
            dispatch_max_attempts: env_u64("DISPATCH_MAX_ATTEMPTS", 3).max(1) as u32,
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 300)),
            auto_reply,
        };

        config.log_values();
        Ok(config)
    }

    fn log_values(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  RECONCILE_INTERVAL_SECS: {}",
            self.reconcile_interval.as_secs()
        );
        tracing::info!("  DISPATCH_MAX_ATTEMPTS: {}", self.dispatch_max_attempts);
        tracing::info!(
            "  HEARTBEAT_INTERVAL_SECS: {}",
            self.heartbeat_interval.as_secs()
        );
        tracing::info!(
            "  AUTO_REPLY: {}",
            if self.auto_reply.is_some() { "enabled" } else { "disabled" }
        );
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
