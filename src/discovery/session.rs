use crate::discovery::explorer::Explorer;
use crate::domain::adapter::{AdapterError, BleAdapter};
use crate::domain::models::{
    Advertisement, ConnectionState, LinkEvent, PeripheralIdentity, ServiceNode,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Error)]
pub enum ExploreError {
    #[error("Connect request for {peripheral} failed: {source}")]
    Connect {
        peripheral: PeripheralIdentity,
        #[source]
        source: AdapterError,
    },
    #[error("Connection to {0} lost before exploration finished")]
    ConnectionLost(PeripheralIdentity),
}

/// Connection state shared between the engine, which feeds it adapter link
/// events, and the session waiting on it.
#[derive(Debug)]
pub struct SessionLink {
    state: watch::Sender<ConnectionState>,
}

impl Default for SessionLink {
    fn default() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { state }
    }
}

impl SessionLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: LinkEvent) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.state.send_modify(|state| {
            *state = state.apply(event);
            next = *state;
        });
        next
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// One peripheral's connection and exploration.
///
/// The link is left up after exploration; it only drops when the peripheral
/// or the adapter closes it.
pub struct PeripheralSession<A> {
    identity: PeripheralIdentity,
    advertisement: Advertisement,
    link: Arc<SessionLink>,
    adapter: Arc<A>,
    abort_on_disconnect: bool,
}

impl<A: BleAdapter> PeripheralSession<A> {
    pub fn new(
        identity: PeripheralIdentity,
        advertisement: Advertisement,
        link: Arc<SessionLink>,
        adapter: Arc<A>,
        abort_on_disconnect: bool,
    ) -> Self {
        Self {
            identity,
            advertisement,
            link,
            adapter,
            abort_on_disconnect,
        }
    }

    pub fn identity(&self) -> &PeripheralIdentity {
        &self.identity
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    pub fn state(&self) -> ConnectionState {
        self.link.current()
    }

    /// Connect, wait for the adapter to report the link, then walk the tree.
    ///
    /// Without `abort_on_disconnect` a dropped link leaves this future
    /// pending, exactly like any other request that never completes.
    pub async fn explore(&self, explorer: &Explorer<A>) -> Result<Vec<ServiceNode>, ExploreError> {
        let mut state = self.link.subscribe();
        self.connect().await?;
        self.wait_until_connected(&mut state).await?;
        info!(peripheral = %self.identity, "[connect]");

        if !self.abort_on_disconnect {
            return Ok(explorer.explore_services(&self.identity).await);
        }

        tokio::select! {
            services = explorer.explore_services(&self.identity) => Ok(services),
            _ = wait_for_state(&mut state, |s| s == ConnectionState::Disconnected) => {
                Err(ExploreError::ConnectionLost(self.identity.clone()))
            }
        }
    }

    async fn connect(&self) -> Result<(), ExploreError> {
        let state = self.link.apply(LinkEvent::ConnectRequested);
        debug!(peripheral = %self.identity, ?state, "Requesting connection");

        if let Err(source) = self.adapter.connect(&self.identity).await {
            self.link.apply(LinkEvent::Disconnected);
            return Err(ExploreError::Connect {
                peripheral: self.identity.clone(),
                source,
            });
        }
        Ok(())
    }

    async fn wait_until_connected(
        &self,
        state: &mut watch::Receiver<ConnectionState>,
    ) -> Result<(), ExploreError> {
        let reached = if self.abort_on_disconnect {
            wait_for_state(state, |s| s != ConnectionState::Connecting).await
        } else {
            wait_for_state(state, |s| s == ConnectionState::Connected).await
        };

        match reached {
            Some(ConnectionState::Connected) => Ok(()),
            _ => Err(ExploreError::ConnectionLost(self.identity.clone())),
        }
    }
}

/// `None` once the link's sender is gone
async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    mut accept: impl FnMut(ConnectionState) -> bool,
) -> Option<ConnectionState> {
    rx.wait_for(|s| accept(*s)).await.ok().map(|s| *s)
}
