#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::Config,
    registry::OperationRegistry,
    server::{build_router, AppState},
    workflow::WorkflowClient,
};

pub mod config;
pub mod registry;
pub mod server;
pub mod workflow;

pub fn build_gateway_state(config: Config) -> Result<AppState> {
    let registry = Arc::new(OperationRegistry::default());
    let workflow = match config.workflow_webhook_url.as_deref() {
        Some(url) => Some(Arc::new(WorkflowClient::new(
            url,
            config.workflow_timeout_ms,
        )?)),
        None => None,
    };
    let state_store = match (
        config.state_store_base_url.clone(),
        config.state_store_api_key.clone(),
    ) {
        (Some(base_url), Some(api_key)) => {
            let mut store_config = studioflow_state_store::StateStoreConfig::new(base_url, api_key);
            store_config.timeout_ms = config.state_store_timeout_ms;
            Some(Arc::new(studioflow_state_store::StateStoreClient::new(
                store_config,
            )?))
        }
        _ => None,
    };
    Ok(AppState::new(config, registry, workflow, state_store))
}

pub fn build_app(config: Config) -> Result<axum::Router> {
    let state = build_gateway_state(config)?;
    spawn_retention_sweeper(&state);
    Ok(build_router(state))
}

/// Periodic eviction of terminal records past the retention window. Pending
/// records are left for the status endpoint's expiry check.
fn spawn_retention_sweeper(state: &AppState) {
    let registry = state.registry();
    let retention = chrono::Duration::seconds(state.config().registry_retention_seconds);
    let interval = Duration::from_secs(state.config().registry_sweep_interval_seconds);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.sweep_expired(retention).await;
        }
    });
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        "gateway service listening"
    );
    axum::serve(listener, build_app(config)?).await?;
    Ok(())
}
