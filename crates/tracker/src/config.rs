use std::time::Duration;

/// Default tick of the polling worker.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default check budget: one hour at the default tick.
const DEFAULT_MAX_ATTEMPTS: u32 = 360;

const DEFAULT_INIT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RESTART_COOLDOWN_MS: u64 = 2000;
const DEFAULT_RESTART_ATTEMPTS: u32 = 3;

/// Tracker configuration loaded from environment variables.
///
/// All fields have defaults suitable for production; tests construct
/// the struct directly with short intervals.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Interval between polling sweeps, and the minimum time between two
    /// checks of the same job.
    pub tick_interval: Duration,
    /// Checks allowed before a job is failed with a timeout reason.
    pub max_attempts: u32,
    /// How long `initialize()` waits for the worker's readiness signal.
    pub init_timeout: Duration,
    /// How long `shutdown()` waits before force-terminating the worker.
    pub shutdown_timeout: Duration,
    /// Pause between a worker crash and the restart.
    pub restart_cooldown: Duration,
    /// Restart attempts before the orchestrator gives up and stays down.
    pub restart_attempts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            init_timeout: Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            restart_cooldown: Duration::from_millis(DEFAULT_RESTART_COOLDOWN_MS),
            restart_attempts: DEFAULT_RESTART_ATTEMPTS,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `POLL_INTERVAL_SECS`           | `10`    |
    /// | `MAX_POLL_ATTEMPTS`            | `360`   |
    /// | `WORKER_INIT_TIMEOUT_SECS`     | `10`    |
    /// | `WORKER_SHUTDOWN_TIMEOUT_SECS` | `5`     |
    /// | `WORKER_RESTART_COOLDOWN_MS`   | `2000`  |
    /// | `WORKER_RESTART_ATTEMPTS`      | `3`     |
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self {
            tick_interval: Duration::from_secs(
                env_or("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS).max(1),
            ),
            max_attempts: env_or("MAX_POLL_ATTEMPTS", DEFAULT_MAX_ATTEMPTS).max(1),
            init_timeout: Duration::from_secs(env_or(
                "WORKER_INIT_TIMEOUT_SECS",
                DEFAULT_INIT_TIMEOUT_SECS,
            )),
            shutdown_timeout: Duration::from_secs(env_or(
                "WORKER_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )),
            restart_cooldown: Duration::from_millis(env_or(
                "WORKER_RESTART_COOLDOWN_MS",
                DEFAULT_RESTART_COOLDOWN_MS,
            )),
            restart_attempts: env_or("WORKER_RESTART_ATTEMPTS", DEFAULT_RESTART_ATTEMPTS).max(1),
        }
    }
}

fn env_or<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 360);
        assert_eq!(config.init_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.restart_cooldown, Duration::from_secs(2));
    }

    #[test]
    fn unparseable_env_value_falls_back() {
        std::env::set_var("REELQ_TEST_BOGUS_U32", "many");
        assert_eq!(env_or("REELQ_TEST_BOGUS_U32", 7u32), 7);
        std::env::set_var("REELQ_TEST_GOOD_U32", " 12 ");
        assert_eq!(env_or("REELQ_TEST_GOOD_U32", 7u32), 12);
    }
}
