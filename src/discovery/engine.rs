use crate::discovery::explorer::Explorer;
use crate::discovery::session::{PeripheralSession, SessionLink};
use crate::discovery::side_channel::{SideChannel, SideEvent};
use crate::domain::adapter::BleAdapter;
use crate::domain::adapter_state::{AdapterStateController, ScanCommand};
use crate::domain::dedup::SeenAddressSet;
use crate::domain::filter::AdvertisementFilter;
use crate::domain::models::{
    AdapterEvent, Advertisement, LinkEvent, PeripheralIdentity, ServiceNode,
};
use crate::domain::settings::DiscoveryConfig;
use crate::presentation::tree;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// The joined tree of one explored peripheral
#[derive(Debug, Clone)]
pub struct ExplorationReport {
    pub identity: PeripheralIdentity,
    pub advertisement: Advertisement,
    pub services: Vec<ServiceNode>,
}

impl ExplorationReport {
    pub fn render(&self) -> String {
        tree::render(&self.services)
    }
}

/// Receivers for everything the engine produces
pub struct EngineOutputs {
    pub reports: mpsc::UnboundedReceiver<ExplorationReport>,
    pub side_events: mpsc::UnboundedReceiver<SideEvent>,
}

/// Top-level orchestrator.
///
/// Consumes adapter events one at a time. Each accepted advertisement gets
/// its own task that stops scanning, connects and explores; the event loop
/// keeps running to feed link events to those tasks.
pub struct DiscoveryEngine<A: BleAdapter> {
    adapter: Arc<A>,
    controller: AdapterStateController,
    filter: AdvertisementFilter,
    seen: Arc<SeenAddressSet>,
    explorer: Arc<Explorer<A>>,
    /// Keyed by normalised address
    links: HashMap<String, Arc<SessionLink>>,
    abort_on_disconnect: bool,
    reports: mpsc::UnboundedSender<ExplorationReport>,
}

impl<A: BleAdapter> DiscoveryEngine<A> {
    pub fn new(adapter: Arc<A>, config: DiscoveryConfig) -> (Self, EngineOutputs) {
        let (side, side_events) = SideChannel::new();
        let (reports, reports_rx) = mpsc::unbounded_channel();
        let seen = Arc::new(SeenAddressSet::new());

        let engine = Self {
            explorer: Arc::new(Explorer::new(adapter.clone(), &config, side)),
            controller: AdapterStateController::new(
                config.scan_service_uuids.clone(),
                config.allow_duplicates,
            ),
            filter: AdvertisementFilter::new(
                config.target_address.clone(),
                config.name_pattern.clone(),
                seen.clone(),
            ),
            seen,
            adapter,
            links: HashMap::new(),
            abort_on_disconnect: config.abort_on_disconnect,
            reports,
        };

        let outputs = EngineOutputs {
            reports: reports_rx,
            side_events,
        };
        (engine, outputs)
    }

    /// Process adapter events until the adapter drops its sender
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Adapter event stream closed");
    }

    pub async fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => {
                info!("[stateChange] {}", state);
                if let Some(command) = self.controller.on_state_change(state) {
                    self.execute(command).await;
                }
            }
            AdapterEvent::ScanStarted => info!("[scanStart]"),
            AdapterEvent::ScanStopped => info!("[scanStop]"),
            AdapterEvent::Discovered {
                identity,
                advertisement,
            } => self.on_discovered(identity, advertisement),
            AdapterEvent::Connected(identity) => self.route_link(&identity, LinkEvent::Connected),
            AdapterEvent::Disconnected(identity) => {
                info!(peripheral = %identity, "[disconnect]");
                self.route_link(&identity, LinkEvent::Disconnected);
            }
        }
    }

    #[cfg(test)]
    fn seen(&self) -> &SeenAddressSet {
        &self.seen
    }

    async fn execute(&self, command: ScanCommand) {
        match command {
            ScanCommand::Start {
                service_filters,
                allow_duplicates,
            } => {
                if let Err(e) = self
                    .adapter
                    .start_scan(&service_filters, allow_duplicates)
                    .await
                {
                    warn!("[error] Scan start failed: {}", e);
                }
            }
            ScanCommand::Stop => {
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!("Scan stop failed: {}", e);
                }
            }
        }
    }

    fn on_discovered(&mut self, identity: PeripheralIdentity, advertisement: Advertisement) {
        let decision = self.filter.evaluate(&identity, &advertisement);
        if !decision.is_accept() {
            trace!(peripheral = %identity, ?decision, "Advertisement ignored");
            return;
        }

        log_advertisement(&identity, &advertisement);
        debug!(explored = self.seen.len(), "Peripheral claimed for exploration");

        let link = Arc::new(SessionLink::new());
        self.links.insert(identity.address.clone(), link.clone());

        let session = PeripheralSession::new(
            identity,
            advertisement,
            link,
            self.adapter.clone(),
            self.abort_on_disconnect,
        );
        let adapter = self.adapter.clone();
        let explorer = self.explorer.clone();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            // Advertisements already queued still arrive; the seen set handles those.
            if let Err(e) = adapter.stop_scan().await {
                warn!("Scan stop failed: {}", e);
            }

            match session.explore(&explorer).await {
                Ok(services) => {
                    info!(
                        peripheral = %session.identity(),
                        "Exploration finished with {} services",
                        services.len()
                    );
                    let _ = reports.send(ExplorationReport {
                        identity: session.identity().clone(),
                        advertisement: session.advertisement().clone(),
                        services,
                    });
                }
                Err(e) => warn!("Exploration failed: {}", e),
            }
        });
    }

    fn route_link(&self, identity: &PeripheralIdentity, event: LinkEvent) {
        match self.links.get(&identity.address) {
            Some(link) => {
                let state = link.apply(event);
                debug!(peripheral = %identity, ?state, "Link state changed");
            }
            None => debug!(peripheral = %identity, ?event, "Link event for unexplored peripheral"),
        }
    }
}

fn log_advertisement(identity: &PeripheralIdentity, advertisement: &Advertisement) {
    let label = advertisement
        .local_name
        .clone()
        .unwrap_or_else(|| identity.address.clone());
    info!("[discover] {}", label);
    info!(
        "  BT Address: {} (Type:{})",
        identity.address, identity.address_type
    );
    if let Some(data) = advertisement.manufacturer() {
        info!("  Data Company: {:#x}", data.company_id);
        info!("  Data Type: {:#x}", data.data_type);
        info!("  Data: {}", data.payload_hex());
    }
}
