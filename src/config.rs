use crate::error::Result;
use anyhow::anyhow;
use rocket::figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enabled: bool,
    pub environments: Vec<String>,
    pub connection: String,
    pub track_queries: bool,
    pub track_request_time: bool,
    pub track_memory_usage: bool,
    pub ignore_routes: Vec<String>,
    pub sampling_rate: f64,
    pub track_status_codes: Vec<u16>,
    pub enable_logging: bool,
    /// Forces the host connection layout the injector probes for.
    pub layout_version: Option<String>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            environments: vec!["dev".to_string(), "test".to_string()],
            connection: "default".to_string(),
            track_queries: true,
            track_request_time: true,
            track_memory_usage: true,
            ignore_routes: vec!["metrics".to_string()],
            sampling_rate: 1.0,
            track_status_codes: vec![200, 404, 500, 503],
            enable_logging: true,
            layout_version: None,
        }
    }
}

impl PerformanceConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        if !figment.contains("performance") {
            return Ok(Self::default());
        }

        let config: Self = figment.extract_inner("performance")?;
        if !(0.0..=1.0).contains(&config.sampling_rate) {
            return Err(anyhow!(
                "performance.sampling_rate must be between 0 and 1, got {}",
                config.sampling_rate
            )
            .into());
        }

        Ok(config)
    }

    pub fn is_environment_tracked(&self, environment: &str) -> bool {
        self.environments.iter().any(|env| env == environment)
    }

    pub fn is_route_ignored(&self, route_name: &str) -> bool {
        self.ignore_routes.iter().any(|route| route == route_name)
    }

    pub fn should_record_status(&self, status: u16) -> bool {
        self.track_status_codes.contains(&status)
    }
}

pub fn current_environment() -> String {
    std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "dev".to_string())
}
