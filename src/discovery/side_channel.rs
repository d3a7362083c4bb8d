//! Fire-and-forget output
//!
//! Included-service results, notification enable outcomes and value changes
//! are published here instead of being joined into the discovery tree. Events
//! arrive in completion order and carry no ordering guarantee relative to the
//! tree or to each other; consumers must not wait on them to finish a tree.

use crate::domain::adapter::AdapterError;
use crate::domain::assigned_numbers::display_uuid;
use crate::domain::models::{hex_string, PeripheralIdentity, ValueChange};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum SideEvent {
    IncludedServices {
        peripheral: PeripheralIdentity,
        service: Uuid,
        included: Vec<Uuid>,
    },
    IncludedServicesFailed {
        peripheral: PeripheralIdentity,
        service: Uuid,
        error: AdapterError,
    },
    /// Unfiltered characteristic discovery triggered by an included-service response
    FollowOnCharacteristics {
        peripheral: PeripheralIdentity,
        service: Uuid,
        count: usize,
    },
    FollowOnCharacteristicsFailed {
        peripheral: PeripheralIdentity,
        service: Uuid,
        error: AdapterError,
    },
    NotificationsEnabled {
        peripheral: PeripheralIdentity,
        characteristic: Uuid,
    },
    NotificationsFailed {
        peripheral: PeripheralIdentity,
        characteristic: Uuid,
        error: AdapterError,
    },
    ValueChanged {
        peripheral: PeripheralIdentity,
        characteristic: Uuid,
        change: ValueChange,
    },
}

impl SideEvent {
    pub fn log(&self) {
        match self {
            Self::IncludedServices {
                peripheral,
                service,
                included,
            } => {
                let included: Vec<String> = included.iter().map(display_uuid).collect();
                info!(
                    %peripheral,
                    service = %display_uuid(service),
                    "[includedServicesDiscover] {:?}",
                    included
                );
            }
            Self::IncludedServicesFailed {
                peripheral,
                service,
                error,
            } => {
                warn!(%peripheral, service = %display_uuid(service), "Included service discovery failed: {}", error);
            }
            Self::FollowOnCharacteristics {
                peripheral,
                service,
                count,
            } => {
                debug!(%peripheral, service = %display_uuid(service), "[characteristicsDiscover] {} characteristics", count);
            }
            Self::FollowOnCharacteristicsFailed {
                peripheral,
                service,
                error,
            } => {
                warn!(%peripheral, service = %display_uuid(service), "Characteristic discovery failed: {}", error);
            }
            Self::NotificationsEnabled {
                peripheral,
                characteristic,
            } => {
                info!(%peripheral, characteristic = %display_uuid(characteristic), "[notify on]");
            }
            Self::NotificationsFailed {
                peripheral,
                characteristic,
                error,
            } => {
                warn!(%peripheral, characteristic = %display_uuid(characteristic), "Enabling notifications failed: {}", error);
            }
            Self::ValueChanged {
                peripheral,
                characteristic,
                change,
            } => {
                info!(
                    %peripheral,
                    characteristic = %display_uuid(characteristic),
                    is_notification = change.is_notification,
                    "[on data] {}",
                    hex_string(&change.payload)
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SideChannel {
    tx: mpsc::UnboundedSender<SideEvent>,
}

impl SideChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SideEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Dropped silently once nobody listens
    pub fn publish(&self, event: SideEvent) {
        let _ = self.tx.send(event);
    }
}

/// Log every side event until all publishers are gone
pub async fn log_side_events(mut rx: mpsc::UnboundedReceiver<SideEvent>) {
    while let Some(event) = rx.recv().await {
        event.log();
    }
}
