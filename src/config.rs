//! Environment-driven configuration, loaded once at startup.
//!
//! Field list and defaults mirror the distilled `Settings` class this core
//! replaces: a `DATABASE_URL`/`REDIS_*` pair describing deployment topology
//! (accepted for parity, logged, and otherwise unused by the embedded
//! in-process store — see `store.rs` and `eventlog.rs`), AI thresholds, cache
//! and rate-limit knobs, and the two behavioral toggles `FAIL_OPEN`/`DRY_RUN`.

use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: String,

    pub ai_service_url: String,
    pub geoip_db_path: String,

    pub server_lat: f64,
    pub server_lon: f64,

    pub ai_threshold_low: f64,
    pub ai_threshold_high: f64,

    pub model_cache_ttl: u64,
    pub ip_reputation_ttl: u64,

    pub rate_limit_requests: u32,
    pub rate_limit_window: u64,

    pub ai_request_timeout: Duration,
    pub fail_open: bool,
    pub dry_run: bool,

    pub port: u16,
}

impl Config {
    /// Loads an optional `.env` file (best-effort — a missing file is not an
    /// error) then reads every variable, falling back to the documented
    /// default.
    pub fn load() -> Self {
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!(error = %e, "no .env file loaded");
        }

        Config {
            database_url: env_or(
                "DATABASE_URL",
                "sqlite://./aegisx_waf.db",
            ),
            redis_host: env_or("REDIS_HOST", "redis"),
            redis_port: env_parse("REDIS_PORT", 6379),
            redis_password: env_or("REDIS_PASSWORD", ""),

            ai_service_url: env_or("AI_SERVICE_URL", "http://ai-service:5001"),
            geoip_db_path: env_or("GEOIP_DB_PATH", "/app/geoip/GeoLite2-City.mmdb"),

            server_lat: env_parse("SERVER_LAT", 18.5204),
            server_lon: env_parse("SERVER_LON", 73.8567),

            ai_threshold_low: env_parse("AI_THRESHOLD_LOW", 0.3),
            ai_threshold_high: env_parse("AI_THRESHOLD_HIGH", 0.7),

            model_cache_ttl: env_parse("MODEL_CACHE_TTL", 300),
            ip_reputation_ttl: env_parse("IP_REPUTATION_TTL", 3600),

            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", 5),
            rate_limit_window: env_parse("RATE_LIMIT_WINDOW", 60),

            ai_request_timeout: Duration::from_secs(env_parse("AI_REQUEST_TIMEOUT", 5)),
            fail_open: env_parse("FAIL_OPEN", true),
            dry_run: env_parse("DRY_RUN", false),

            port: env_parse("PORT", 5000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        env::remove_var("AI_THRESHOLD_LOW");
        env::remove_var("AI_THRESHOLD_HIGH");
        env::remove_var("FAIL_OPEN");
        env::remove_var("DRY_RUN");
        let cfg = Config::load();
        assert_eq!(cfg.ai_threshold_low, 0.3);
        assert_eq!(cfg.ai_threshold_high, 0.7);
        assert!(cfg.fail_open);
        assert!(!cfg.dry_run);
        assert_eq!(cfg.port, 5000);
    }
}
