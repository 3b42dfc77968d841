//! Start/stop ordering of the channel, poller and server for one session.

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use strum_macros::Display;
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::BridgeChannel;
use crate::config::{BridgeConfig, ConfigError};
use crate::gateway::Gateway;
use crate::host::HostScheduler;
use crate::operations::{catalog, resource_catalog};
use crate::poller::CooperativePoller;
use crate::registry::{HostAccess, OperationTable};
use crate::server::{Catalog, RpcServer, ServerError};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Session<H> {
    channel: Arc<BridgeChannel>,
    poller: CooperativePoller<H>,
    server: RpcServer,
}

/// Owns one bridge session at a time. Lives on the host thread.
pub struct ConnectionManager<H> {
    config: BridgeConfig,
    scheduler: HostScheduler<H>,
    table: Rc<OperationTable<H>>,
    session: Option<Session<H>>,
    state: ConnectionState,
}

impl<H> std::fmt::Debug for ConnectionManager<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("bind", &self.config.bind_addr())
            .field("local_addr", &self.session.as_ref().map(|s| s.server.local_addr()))
            .finish()
    }
}

impl<H: HostAccess + 'static> ConnectionManager<H> {
    pub fn new(config: BridgeConfig, scheduler: HostScheduler<H>, table: Rc<OperationTable<H>>) -> Self {
        Self {
            config,
            scheduler,
            table,
            session: None,
            state: ConnectionState::Stopped,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ConnectionState::Running
    }

    /// Address the server actually bound, useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|s| s.server.local_addr())
    }

    /// The live session's channel, if any.
    pub fn channel(&self) -> Option<&Arc<BridgeChannel>> {
        self.session.as_ref().map(|s| &s.channel)
    }

    /// Channel first, then the poller, then the server. No-op when running.
    pub fn start(&mut self) -> Result<(), ConnectionError> {
        if self.session.is_some() {
            return Ok(());
        }
        self.scheduler.assert_host_thread();
        self.config.validate()?;
        self.state = ConnectionState::Starting;

        let channel = Arc::new(BridgeChannel::new(self.config.response_timeout()));
        let mut poller = CooperativePoller::new(channel.clone(), self.table.clone(), self.scheduler.clone());
        poller.start(self.config.poll_interval());

        let gateway = Arc::new(Gateway::new(channel.clone()));
        let infos = self.table.infos();
        let published = Catalog {
            tools: catalog(&infos),
            resources: resource_catalog(&infos),
        };
        let server = match RpcServer::start(&self.config, gateway, published) {
            Ok(server) => server,
            Err(e) => {
                channel.shutdown();
                poller.stop();
                self.state = ConnectionState::Stopped;
                warn!(error = %e, "connection failed to start");
                return Err(e.into());
            }
        };

        info!(local_addr = %server.local_addr(), "connection running");
        self.session = Some(Session { channel, poller, server });
        self.state = ConnectionState::Running;
        Ok(())
    }

    /// Unblock waiters, stop the server, then stop polling. No-op when stopped.
    ///
    /// Returns `false` if the server thread outlived the grace period and was
    /// detached.
    pub fn stop(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return true;
        };
        self.state = ConnectionState::Stopping;

        // a worker parked in send_request must wake before the server waits on it
        session.channel.shutdown();
        let joined = session.server.stop();
        if !joined {
            warn!("server thread detached during shutdown");
        }
        session.poller.stop();

        self.state = ConnectionState::Stopped;
        info!("connection stopped");
        joined
    }

    pub fn restart(&mut self) -> Result<(), ConnectionError> {
        self.stop();
        self.start()
    }

    /// Store a new config, restarting the session if one was running.
    pub fn update_config(&mut self, config: BridgeConfig) -> Result<(), ConnectionError> {
        config.validate()?;
        let was_running = self.session.is_some();
        self.config = config;
        if was_running {
            self.restart()?;
        }
        Ok(())
    }
}

impl<H> Drop for ConnectionManager<H> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.channel.shutdown();
            session.server.stop();
            // dropping the poller cancels its timer
            drop(session.poller);
        }
    }
}
