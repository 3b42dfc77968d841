//! Async front of the bridge, used by the protocol server.
//!
//! `send_request` blocks an OS thread, so it runs on tokio's blocking pool;
//! only the calling task is suspended while the host thread works.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::bridge::{Arguments, BridgeChannel, BridgeError, BridgeRequest, Outcome};
use crate::logger::BridgeTelemetry;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The operation ran on the host thread and failed.
    #[error("{0}")]
    Operation(String),

    #[error("bridge worker failed: {0}")]
    Join(String),
}

/// The seam between the protocol server and whatever executes tools.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<Value, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct Gateway {
    channel: Arc<BridgeChannel>,
    in_flight: Arc<Mutex<()>>,
}

impl Gateway {
    pub fn new(channel: Arc<BridgeChannel>) -> Self {
        Self {
            channel,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn channel(&self) -> &Arc<BridgeChannel> {
        &self.channel
    }

    /// Run `operation` on the host thread and return its value.
    pub async fn call(&self, operation: &str, arguments: Arguments) -> Result<Value, GatewayError> {
        BridgeTelemetry::global()
            .instrument_request(operation, || self.dispatch(operation, arguments))
            .await
    }

    async fn dispatch(&self, operation: &str, arguments: Arguments) -> Result<Value, GatewayError> {
        let request = BridgeRequest::new(operation, arguments);
        // the guard moves into the blocking task, so a caller that gives up
        // early cannot let a second request overlap the one still waiting
        let guard = self.in_flight.clone().lock_owned().await;
        let channel = self.channel.clone();

        let response = tokio::task::spawn_blocking(move || {
            let response = channel.send_request(request);
            drop(guard);
            response
        })
        .await
        .map_err(|e| GatewayError::Join(e.to_string()))??;

        match response.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(message) => Err(GatewayError::Operation(message)),
        }
    }
}

#[async_trait]
impl ToolDispatcher for Gateway {
    async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<Value, GatewayError> {
        self.call(name, arguments).await
    }
}
