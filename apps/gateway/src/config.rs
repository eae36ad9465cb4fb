use std::{
    env,
    net::{AddrParseError, SocketAddr},
};

use thiserror::Error;

/// Gateway service configuration, read from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub build_sha: String,
    pub workflow_webhook_url: Option<String>,
    pub workflow_timeout_ms: u64,
    pub sync_response_grace_ms: u64,
    pub registry_retention_seconds: i64,
    pub registry_sweep_interval_seconds: u64,
    pub state_store_base_url: Option<String>,
    pub state_store_api_key: Option<String>,
    pub state_store_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid GATEWAY_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid GATEWAY_WORKFLOW_TIMEOUT_MS: {0}")]
    InvalidWorkflowTimeoutMs(String),
    #[error("invalid GATEWAY_SYNC_RESPONSE_GRACE_MS: {0}")]
    InvalidSyncResponseGraceMs(String),
    #[error("invalid GATEWAY_REGISTRY_RETENTION_SECONDS: {0}")]
    InvalidRegistryRetentionSeconds(String),
    #[error("invalid GATEWAY_REGISTRY_SWEEP_INTERVAL_SECONDS: {0}")]
    InvalidRegistrySweepIntervalSeconds(String),
    #[error("invalid GATEWAY_STATE_STORE_TIMEOUT_MS: {0}")]
    InvalidStateStoreTimeoutMs(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let service_name = lookup("GATEWAY_SERVICE_NAME")
            .unwrap_or_else(|| "studioflow-gateway".to_string());
        let bind_addr = lookup("GATEWAY_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:4200".to_string())
            .parse()?;
        let build_sha = lookup("GATEWAY_BUILD_SHA").unwrap_or_else(|| "dev".to_string());

        let workflow_webhook_url = lookup("GATEWAY_WORKFLOW_WEBHOOK_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());

        // The workflow ceiling has to cover jobs that legitimately run for many
        // minutes; anything shorter turns slow jobs into spurious pendings.
        let workflow_timeout_ms = parse_u64(
            &lookup,
            "GATEWAY_WORKFLOW_TIMEOUT_MS",
            900_000,
            ConfigError::InvalidWorkflowTimeoutMs,
        )?
        .clamp(1_000, 1_800_000);

        let sync_response_grace_ms = parse_u64(
            &lookup,
            "GATEWAY_SYNC_RESPONSE_GRACE_MS",
            2_500,
            ConfigError::InvalidSyncResponseGraceMs,
        )?
        .min(30_000);

        let registry_retention_seconds = lookup("GATEWAY_REGISTRY_RETENTION_SECONDS")
            .unwrap_or_else(|| "3600".to_string())
            .parse::<i64>()
            .map_err(|error| ConfigError::InvalidRegistryRetentionSeconds(error.to_string()))?
            .clamp(60, 86_400);

        let registry_sweep_interval_seconds = parse_u64(
            &lookup,
            "GATEWAY_REGISTRY_SWEEP_INTERVAL_SECONDS",
            3_600,
            ConfigError::InvalidRegistrySweepIntervalSeconds,
        )?
        .clamp(10, 86_400);

        let state_store_base_url = lookup("GATEWAY_STATE_STORE_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        let state_store_api_key = lookup("GATEWAY_STATE_STORE_API_KEY")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let state_store_timeout_ms = parse_u64(
            &lookup,
            "GATEWAY_STATE_STORE_TIMEOUT_MS",
            8_000,
            ConfigError::InvalidStateStoreTimeoutMs,
        )?
        .clamp(250, 120_000);

        Ok(Self {
            service_name,
            bind_addr,
            build_sha,
            workflow_webhook_url,
            workflow_timeout_ms,
            sync_response_grace_ms,
            registry_retention_seconds,
            registry_sweep_interval_seconds,
            state_store_base_url,
            state_store_api_key,
            state_store_timeout_ms,
        })
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
    wrap: impl FnOnce(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.parse::<u64>().map_err(|error| wrap(error.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, ConfigError};

    #[test]
    fn defaults_apply_without_env() {
        let config = Config::from_lookup(|_| None).expect("config parse");
        assert_eq!(config.service_name, "studioflow-gateway");
        assert_eq!(config.bind_addr.port(), 4200);
        assert_eq!(config.workflow_timeout_ms, 900_000);
        assert_eq!(config.sync_response_grace_ms, 2_500);
        assert_eq!(config.registry_retention_seconds, 3_600);
        assert!(config.workflow_webhook_url.is_none());
        assert!(config.state_store_base_url.is_none());
    }

    #[test]
    fn overrides_apply_and_clamp() {
        let values = HashMap::from([
            ("GATEWAY_WORKFLOW_WEBHOOK_URL", "https://workflow.example.com/webhook/chat/"),
            ("GATEWAY_WORKFLOW_TIMEOUT_MS", "100"),
            ("GATEWAY_REGISTRY_RETENTION_SECONDS", "5"),
            ("GATEWAY_STATE_STORE_BASE_URL", "https://db.example.com/"),
            ("GATEWAY_STATE_STORE_API_KEY", " key "),
        ]);
        let config =
            Config::from_lookup(|key| values.get(key).map(ToString::to_string)).expect("config");
        assert_eq!(
            config.workflow_webhook_url.as_deref(),
            Some("https://workflow.example.com/webhook/chat")
        );
        assert_eq!(config.workflow_timeout_ms, 1_000);
        assert_eq!(config.registry_retention_seconds, 60);
        assert_eq!(config.state_store_base_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.state_store_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn invalid_numeric_values_are_rejected() {
        let values = HashMap::from([("GATEWAY_WORKFLOW_TIMEOUT_MS", "not-a-number")]);
        let error = Config::from_lookup(|key| values.get(key).map(ToString::to_string))
            .expect_err("invalid value should fail");
        assert!(matches!(error, ConfigError::InvalidWorkflowTimeoutMs(_)));
    }
}
