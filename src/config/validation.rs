//! Configuration validation.
//!
//! Serde handles the syntax; this module checks the values. Every problem is
//! collected so a single run reports the whole list.

use std::net::SocketAddr;

use crate::config::schema::LbConfig;
use crate::load_balancer::backend::parse_address;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,

    #[error("invalid backend address `{address}`: {reason}")]
    InvalidBackend { address: String, reason: String },

    #[error("invalid {field} `{value}`")]
    InvalidSocketAddr { field: &'static str, value: String },

    #[error("health_check.path must start with '/' (got `{0}`)")]
    InvalidHealthPath(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &LbConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for address in &config.backends {
        if let Err(e) = parse_address(address) {
            errors.push(ValidationError::InvalidBackend {
                address: address.clone(),
                reason: e.to_string(),
            });
        }
    }

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        check_socket_addr(&mut errors, "listener.tls.bind_address", &tls.bind_address);
    }
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let health = &config.health_check;
    if !health.path.starts_with('/') {
        errors.push(ValidationError::InvalidHealthPath(health.path.clone()));
    }
    if health.interval_secs == 0 {
        errors.push(ValidationError::Zero("health_check.interval_secs"));
    }
    if health.timeout_secs == 0 {
        errors.push(ValidationError::Zero("health_check.timeout_secs"));
    }

    let limits = &config.rate_limit;
    if limits.enabled {
        if limits.capacity == 0 {
            errors.push(ValidationError::Zero("rate_limit.capacity"));
        }
        if limits.refill_per_sec == 0 {
            errors.push(ValidationError::Zero("rate_limit.refill_per_sec"));
        }
        if limits.sweep_interval_secs == 0 {
            errors.push(ValidationError::Zero("rate_limit.sweep_interval_secs"));
        }
        if limits.max_clients == 0 {
            errors.push(ValidationError::Zero("rate_limit.max_clients"));
        }
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero("circuit_breaker.failure_threshold"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidSocketAddr {
            field,
            value: value.to_string(),
        });
    }
}
