//! Health check utilities

use serde::Serialize;

/// Health check status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

/// Component health check trait
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self) -> HealthStatus;
}

/// Connection-based health check
pub struct ConnectionHealthCheck {
    name: String,
    check_fn: Box<dyn Fn() -> bool + Send + Sync>,
}

impl ConnectionHealthCheck {
    pub fn new<F>(name: impl Into<String>, check_fn: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check_fn: Box::new(check_fn),
        }
    }
}

impl HealthCheck for ConnectionHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> HealthStatus {
        if (self.check_fn)() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded {
                reason: "broker connection not established".to_string(),
            }
        }
    }
}

/// System health aggregator
#[derive(Default)]
pub struct HealthAggregator {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_check(mut self, check: Box<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn check_all(&self) -> Vec<(String, HealthStatus)> {
        self.checks
            .iter()
            .map(|check| (check.name().to_string(), check.check()))
            .collect()
    }

    pub fn overall_status(&self) -> HealthStatus {
        let results = self.check_all();

        let unhealthy: Vec<_> = results
            .iter()
            .filter_map(|(name, status)| match status {
                HealthStatus::Unhealthy { reason } => Some(format!("{}: {}", name, reason)),
                _ => None,
            })
            .collect();

        if !unhealthy.is_empty() {
            return HealthStatus::Unhealthy {
                reason: unhealthy.join(", "),
            };
        }

        let degraded: Vec<_> = results
            .iter()
            .filter_map(|(name, status)| match status {
                HealthStatus::Degraded { reason } => Some(format!("{}: {}", name, reason)),
                _ => None,
            })
            .collect();

        if !degraded.is_empty() {
            return HealthStatus::Degraded {
                reason: degraded.join(", "),
            };
        }

        HealthStatus::Healthy
    }
}
