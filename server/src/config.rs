//! Runtime settings for the server.

use shared::{
    levels, CubeConfig, DEFAULT_PORT, HEARTBEAT_INTERVAL_MS, HEARTBEAT_MISS_THRESHOLD, TICK_RATE,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation steps per second.
    pub tick_rate: u32,
    pub max_clients: usize,
    pub heartbeat_interval: Duration,
    /// Unanswered pings tolerated before a connection is dropped.
    pub heartbeat_threshold: u32,
    pub ready_poll_interval: Duration,
    /// How long a match waits for members to finish loading.
    pub ready_timeout: Duration,
    /// Largest wall-clock delta fed into the tick accumulator at once.
    pub max_frame_delta: Duration,
    /// Built-in level played by every match.
    pub level: String,
    pub cube: CubeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tick_rate: TICK_RATE,
            max_clients: 64,
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            heartbeat_threshold: HEARTBEAT_MISS_THRESHOLD,
            ready_poll_interval: Duration::from_millis(100),
            ready_timeout: Duration::from_secs(30),
            max_frame_delta: Duration::from_millis(250),
            level: levels::DEFAULT_LEVEL.to_string(),
            cube: CubeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 9090);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_threshold, 3);
        assert_eq!(config.ready_poll_interval, Duration::from_millis(100));
        assert_eq!(config.address(), "127.0.0.1:9090");
        assert!(levels::text(&config.level).is_some());
    }

    #[test]
    fn test_tick_duration() {
        let config = ServerConfig {
            tick_rate: 50,
            ..ServerConfig::default()
        };
        assert_approx_eq!(config.tick_duration().as_secs_f64(), 0.02, 1e-9);
    }
}
