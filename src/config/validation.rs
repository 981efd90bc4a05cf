//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default network and subscriptions name known networks)
//! - Validate value ranges (chain ids, retry budgets, block ranges, metrics address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LedgerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::LedgerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &LedgerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.networks.is_empty() {
        errors.push(ValidationError::new("networks", "at least one network is required"));
    }

    let mut names = HashSet::new();
    for (i, network) in config.networks.iter().enumerate() {
        let field = format!("networks[{}]", i);
        if network.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !names.insert(network.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate network '{}'", network.name),
            ));
        }
        if network.chain_id == 0 {
            errors.push(ValidationError::new(format!("{}.chain_id", field), "must be non-zero"));
        }
        if let Err(e) = network.rpc_url.parse::<url::Url>() {
            errors.push(ValidationError::new(
                format!("{}.rpc_url", field),
                format!("invalid URL '{}': {}", network.rpc_url, e),
            ));
        }
        if network.rpc_timeout_secs == 0 {
            errors.push(ValidationError::new(
                format!("{}.rpc_timeout_secs", field),
                "must be greater than zero",
            ));
        }
    }

    if !config.networks.is_empty() && !names.contains(config.ledger.default_network.as_str()) {
        errors.push(ValidationError::new(
            "ledger.default_network",
            format!("unknown network '{}'", config.ledger.default_network),
        ));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            "must not exceed retry.max_delay_ms",
        ));
    }

    let mut signer_names = HashSet::new();
    for (i, signer) in config.signers.iter().enumerate() {
        if signer.key_env.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("signers[{}].key_env", i),
                "must name an environment variable",
            ));
        }
        if !signer_names.insert(signer.name.as_str()) {
            errors.push(ValidationError::new(
                format!("signers[{}].name", i),
                format!("duplicate signer '{}'", signer.name),
            ));
        }
    }
    if let Some(operator) = &config.ledger.operator {
        if !signer_names.contains(operator.as_str()) {
            errors.push(ValidationError::new(
                "ledger.operator",
                format!("unknown signer '{}'", operator),
            ));
        }
    }

    if config.transactions.gas_limit == 0 {
        errors.push(ValidationError::new("transactions.gas_limit", "must be greater than zero"));
    }
    let multiplier = config.transactions.gas_price_multiplier;
    if multiplier.is_nan() || multiplier <= 0.0 {
        errors.push(ValidationError::new(
            "transactions.gas_price_multiplier",
            "must be greater than zero",
        ));
    }
    if config.transactions.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "transactions.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    if config.events.max_block_range == 0 {
        errors.push(ValidationError::new("events.max_block_range", "must be greater than zero"));
    }
    if config.events.channel_capacity == 0 {
        errors.push(ValidationError::new("events.channel_capacity", "must be greater than zero"));
    }
    if config.events.poll_interval_ms == 0 {
        errors.push(ValidationError::new("events.poll_interval_ms", "must be greater than zero"));
    }
    for (i, sub) in config.events.subscriptions.iter().enumerate() {
        if let Some(network) = &sub.network {
            if !names.contains(network.as_str()) {
                errors.push(ValidationError::new(
                    format!("events.subscriptions[{}].network", i),
                    format!("unknown network '{}'", network),
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
