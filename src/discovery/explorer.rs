//! GATT tree traversal
//!
//! Three nested fan-outs: services → characteristics → descriptors. Each
//! level dispatches its children in enumeration order, waits until every
//! child has finished, and only then assembles the parent node. Children may
//! complete in any order; the assembled list always follows dispatch order.
//!
//! ```text
//! explore_services ──┬─ explore_service ──┬─ explore_characteristic ── descriptors
//!                    │                    └─ explore_characteristic ── descriptors
//!                    └─ explore_service ── ...
//!          │
//!          └─ (per service, unjoined) included services → follow-on characteristics
//! ```

use crate::discovery::side_channel::{SideChannel, SideEvent};
use crate::domain::adapter::{BleAdapter, CharacteristicHandle, ServiceHandle};
use crate::domain::assigned_numbers::{self, display_uuid};
use crate::domain::models::{CharacteristicNode, DescriptorNode, PeripheralIdentity, ServiceNode};
use crate::domain::settings::DiscoveryConfig;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Explorer<A> {
    adapter: Arc<A>,
    target_service: Option<Uuid>,
    target_characteristic: Option<Uuid>,
    max_in_flight: Option<usize>,
    side: SideChannel,
}

impl<A: BleAdapter> Explorer<A> {
    pub fn new(adapter: Arc<A>, config: &DiscoveryConfig, side: SideChannel) -> Self {
        Self {
            adapter,
            target_service: config.target_service,
            target_characteristic: config.target_characteristic,
            max_in_flight: config.max_in_flight,
            side,
        }
    }

    /// Explore every service of a connected peripheral.
    ///
    /// Services outside the target filter produce no node. A child request
    /// that never completes keeps this future pending forever.
    pub async fn explore_services(&self, peripheral: &PeripheralIdentity) -> Vec<ServiceNode> {
        let services = match self.adapter.discover_services(peripheral).await {
            Ok(services) => services,
            Err(e) => {
                warn!(%peripheral, "Service discovery failed: {}", e);
                return Vec::new();
            }
        };
        info!(%peripheral, "[servicesDiscover] {} services", services.len());

        for service in &services {
            self.discover_included(service.clone());
        }

        let selected: Vec<ServiceHandle> = services
            .into_iter()
            .filter(|service| self.service_selected(service))
            .collect();

        fan_out(selected, self.max_in_flight, |service| {
            self.explore_service(service)
        })
        .await
    }

    pub async fn explore_service(&self, service: ServiceHandle) -> ServiceNode {
        let characteristics = match self.adapter.discover_characteristics(&service).await {
            Ok(characteristics) => characteristics,
            Err(e) => {
                warn!(
                    service = %display_uuid(&service.uuid),
                    "Characteristic discovery failed: {}", e
                );
                Vec::new()
            }
        };
        debug!(
            service = %display_uuid(&service.uuid),
            "[characteristicsDiscover] {} characteristics",
            characteristics.len()
        );

        let nodes = fan_out(characteristics, self.max_in_flight, |characteristic| {
            self.explore_characteristic(characteristic)
        })
        .await;

        ServiceNode::new(service.uuid, nodes)
    }

    /// Descriptor level. Subscribes first when the characteristic qualifies;
    /// the subscription runs on its own and is never awaited here.
    pub async fn explore_characteristic(
        &self,
        characteristic: CharacteristicHandle,
    ) -> CharacteristicNode {
        let subscribed = wants_subscription(self.target_characteristic, &characteristic)
            && self.subscribe(&characteristic);

        let descriptors = match self.adapter.discover_descriptors(&characteristic).await {
            Ok(descriptors) => descriptors
                .iter()
                .map(|d| DescriptorNode::new(d.uuid))
                .collect(),
            Err(e) => {
                warn!(
                    characteristic = %display_uuid(&characteristic.uuid),
                    "Descriptor discovery failed: {}", e
                );
                Vec::new()
            }
        };

        let assigned = assigned_numbers::characteristic(&characteristic.uuid);
        CharacteristicNode {
            uuid: characteristic.uuid,
            kind: assigned.map(|a| a.kind),
            name: assigned.map(|a| a.name),
            properties: characteristic.properties,
            descriptors,
            subscribed,
        }
    }

    fn service_selected(&self, service: &ServiceHandle) -> bool {
        self.target_service
            .map_or(true, |target| target == service.uuid)
    }

    /// Registers the value handler, then enables notifications in the
    /// background. Returns `false` when no handler could be registered; the
    /// CCCD is left alone in that case.
    fn subscribe(&self, characteristic: &CharacteristicHandle) -> bool {
        let peripheral = characteristic.peripheral.clone();
        let uuid = characteristic.uuid;

        let mut values = match self.adapter.value_changes(characteristic) {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    characteristic = %display_uuid(&uuid),
                    "Registering value handler failed: {}", e
                );
                return false;
            }
        };

        let side = self.side.clone();
        let forwarded_for = peripheral.clone();
        tokio::spawn(async move {
            while let Some(change) = values.recv().await {
                side.publish(SideEvent::ValueChanged {
                    peripheral: forwarded_for.clone(),
                    characteristic: uuid,
                    change,
                });
            }
        });

        let adapter = self.adapter.clone();
        let side = self.side.clone();
        let characteristic = characteristic.clone();
        tokio::spawn(async move {
            let event = match adapter.enable_notifications(&characteristic).await {
                Ok(()) => SideEvent::NotificationsEnabled {
                    peripheral,
                    characteristic: uuid,
                },
                Err(error) => SideEvent::NotificationsFailed {
                    peripheral,
                    characteristic: uuid,
                    error,
                },
            };
            side.publish(event);
        });
        true
    }

    fn discover_included(&self, service: ServiceHandle) {
        let adapter = self.adapter.clone();
        let side = self.side.clone();
        tokio::spawn(async move {
            let peripheral = service.peripheral.clone();
            let included = match adapter.discover_included_services(&service).await {
                Ok(included) => included,
                Err(error) => {
                    side.publish(SideEvent::IncludedServicesFailed {
                        peripheral,
                        service: service.uuid,
                        error,
                    });
                    return;
                }
            };
            side.publish(SideEvent::IncludedServices {
                peripheral: peripheral.clone(),
                service: service.uuid,
                included,
            });

            let event = match adapter.discover_characteristics(&service).await {
                Ok(characteristics) => SideEvent::FollowOnCharacteristics {
                    peripheral,
                    service: service.uuid,
                    count: characteristics.len(),
                },
                Err(error) => SideEvent::FollowOnCharacteristicsFailed {
                    peripheral,
                    service: service.uuid,
                    error,
                },
            };
            side.publish(event);
        });
    }
}

/// Subscribe only to characteristics that pass the filter and push values
/// through exactly one of notify or indicate.
pub fn wants_subscription(filter: Option<Uuid>, characteristic: &CharacteristicHandle) -> bool {
    filter.map_or(true, |uuid| uuid == characteristic.uuid)
        && characteristic.properties.is_push_only()
}

/// Run `f` over `items` concurrently and collect the outputs in input order.
async fn fan_out<T, F, Fut>(items: Vec<T>, max_in_flight: Option<usize>, f: F) -> Vec<Fut::Output>
where
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    match max_in_flight {
        Some(limit) => {
            stream::iter(items)
                .map(f)
                .buffered(limit.max(1))
                .collect()
                .await
        }
        None => join_all(items.into_iter().map(f)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::testing::{next_side_event, pochiru, Call, FakeAdapter};
    use crate::domain::assigned_numbers::{from_short, parse_uuid};
    use crate::domain::models::CharacteristicProperties as Props;
    use std::time::Duration;

    fn target_service() -> Uuid {
        parse_uuid("b3b3690150d34044808d50835b13a6cd").unwrap()
    }

    fn target_characteristic() -> Uuid {
        parse_uuid("b3b3910250d34044808d50835b13a6cd").unwrap()
    }

    fn config(service: Option<Uuid>, characteristic: Option<Uuid>) -> DiscoveryConfig {
        DiscoveryConfig {
            target_service: service,
            target_characteristic: characteristic,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_join_preserves_enumeration_order() {
        // first characteristic answers last
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x10, from_short(0x180a))
            .characteristic(0x10, 0x11, from_short(0x2a29), Props::READ)
            .characteristic(0x10, 0x14, from_short(0x2a24), Props::READ)
            .characteristic(0x10, 0x17, from_short(0x2a26), Props::READ)
            .descriptor(0x11, 0x12, from_short(0x2901))
            .descriptor(0x11, 0x13, from_short(0x2904))
            .descriptor(0x14, 0x15, from_short(0x2901))
            .descriptor(0x14, 0x16, from_short(0x2904))
            .descriptor(0x17, 0x18, from_short(0x2901))
            .descriptor(0x17, 0x19, from_short(0x2904))
            .descriptor_delay(0x11, 6)
            .descriptor_delay(0x14, 3)
            .build();
        let (side, _rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(None, None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;

        assert_eq!(adapter.descriptors_completed(), 3);
        assert_eq!(services.len(), 1);
        let service = &services[0];
        assert_eq!(service.name, Some("Device Information"));
        let uuids: Vec<Uuid> = service.characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(
            uuids,
            vec![from_short(0x2a29), from_short(0x2a24), from_short(0x2a26)]
        );
        for characteristic in &service.characteristics {
            let descriptors: Vec<Uuid> = characteristic.descriptors.iter().map(|d| d.uuid).collect();
            assert_eq!(descriptors, vec![from_short(0x2901), from_short(0x2904)]);
        }
    }

    #[tokio::test]
    async fn test_capped_fan_out_keeps_order() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x01, from_short(0x1800))
            .service(0x08, from_short(0x180f))
            .characteristic(0x01, 0x02, from_short(0x2a00), Props::READ)
            .characteristic(0x01, 0x04, from_short(0x2a01), Props::READ)
            .characteristic(0x08, 0x09, from_short(0x2a19), Props::READ | Props::NOTIFY)
            .descriptor_delay(0x02, 4)
            .build();
        let (side, _rx) = SideChannel::new();
        let config = DiscoveryConfig {
            max_in_flight: Some(1),
            ..Default::default()
        };
        let explorer = Explorer::new(adapter.clone(), &config, side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;

        let uuids: Vec<Uuid> = services.iter().map(|s| s.uuid).collect();
        assert_eq!(uuids, vec![from_short(0x1800), from_short(0x180f)]);
        assert_eq!(services[0].characteristics.len(), 2);
        assert_eq!(services[0].characteristics[0].uuid, from_short(0x2a00));
        assert_eq!(services[1].characteristics[0].name, Some("Battery Level"));
    }

    #[tokio::test]
    async fn test_service_filter_skips_non_matching() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x20, target_service())
            .service(0x30, from_short(0xffff))
            .characteristic(0x20, 0x21, target_characteristic(), Props::NOTIFY)
            .characteristic(0x30, 0x31, from_short(0x2a19), Props::READ)
            .build();
        let (side, _rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(Some(target_service()), None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].uuid, target_service());
        assert_eq!(services[0].characteristics.len(), 1);
        assert_eq!(adapter.count(&Call::DiscoverDescriptors(0x31)), 0);
    }

    #[tokio::test]
    async fn test_subscription_requires_single_push_flag() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x20, target_service())
            .characteristic(0x20, 0x21, target_characteristic(), Props::NOTIFY)
            .characteristic(0x20, 0x23, from_short(0x2a37), Props::READ | Props::NOTIFY)
            .characteristic(0x20, 0x25, from_short(0x2a1c), Props::INDICATE)
            .descriptor(0x23, 0x24, from_short(0x2902))
            .build();
        let (side, mut rx) = SideChannel::new();
        let explorer = Explorer::new(
            adapter.clone(),
            &config(None, Some(target_characteristic())),
            side,
        );
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;
        let chars = &services[0].characteristics;

        assert!(chars[0].subscribed);
        assert!(!chars[1].subscribed);
        assert_eq!(chars[1].descriptors.len(), 1);
        // indicate-only, but filtered out by UUID
        assert!(!chars[2].subscribed);

        assert_eq!(adapter.count(&Call::ValueChanges(0x21)), 1);
        assert_eq!(adapter.count(&Call::ValueChanges(0x23)), 0);
        assert_eq!(adapter.count(&Call::ValueChanges(0x25)), 0);
        assert_eq!(adapter.count(&Call::DiscoverDescriptors(0x23)), 1);

        let enabled = next_side_event(&mut rx, |e| {
            matches!(e, SideEvent::NotificationsEnabled { .. })
        })
        .await;
        assert!(matches!(
            enabled,
            Some(SideEvent::NotificationsEnabled { characteristic, .. }) if characteristic == target_characteristic()
        ));
        assert_eq!(adapter.count(&Call::EnableNotifications(0x23)), 0);
    }

    #[test]
    fn test_wants_subscription_without_filter() {
        let (id, _) = pochiru();
        let handle = |properties| CharacteristicHandle {
            peripheral: id.clone(),
            service_handle: 1,
            handle: 2,
            uuid: from_short(0x2a37),
            properties,
        };

        assert!(wants_subscription(None, &handle(Props::NOTIFY)));
        assert!(wants_subscription(None, &handle(Props::INDICATE)));
        assert!(!wants_subscription(None, &handle(Props::READ | Props::NOTIFY)));
        assert!(!wants_subscription(None, &handle(Props::READ)));
        assert!(!wants_subscription(
            Some(from_short(0x2a19)),
            &handle(Props::NOTIFY)
        ));
    }

    #[tokio::test]
    async fn test_value_changes_flow_to_side_channel() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x20, target_service())
            .characteristic(0x20, 0x21, target_characteristic(), Props::NOTIFY)
            .build();
        let (side, mut rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(None, None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;
        assert!(services[0].characteristics[0].subscribed);

        assert!(adapter.push_value(0x21, &[0x01, 0x02]));
        assert!(adapter.push_value(0x21, &[0x03]));

        let first = next_side_event(&mut rx, |e| matches!(e, SideEvent::ValueChanged { .. })).await;
        match first {
            Some(SideEvent::ValueChanged { change, .. }) => {
                assert_eq!(change.payload, vec![0x01, 0x02]);
                assert!(change.is_notification);
            }
            other => panic!("unexpected side event {:?}", other),
        }
        let second = next_side_event(&mut rx, |e| matches!(e, SideEvent::ValueChanged { .. })).await;
        assert!(matches!(
            second,
            Some(SideEvent::ValueChanged { change, .. }) if change.payload == vec![0x03]
        ));
    }

    #[tokio::test]
    async fn test_notify_failure_is_not_fatal() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x20, target_service())
            .characteristic(0x20, 0x21, target_characteristic(), Props::INDICATE)
            .descriptor(0x21, 0x22, from_short(0x2902))
            .fail_notify()
            .build();
        let (side, mut rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(None, None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;
        assert_eq!(services[0].characteristics[0].descriptors.len(), 1);

        let failed = next_side_event(&mut rx, |e| {
            matches!(e, SideEvent::NotificationsFailed { .. })
        })
        .await;
        assert!(failed.is_some());
        assert_eq!(adapter.count(&Call::EnableNotifications(0x21)), 1);
    }

    #[tokio::test]
    async fn test_failed_handler_registration_is_not_marked_subscribed() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x20, target_service())
            .characteristic(0x20, 0x21, target_characteristic(), Props::NOTIFY)
            .descriptor(0x21, 0x22, from_short(0x2902))
            .fail_value_changes()
            .build();
        let (side, _rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(None, None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;
        let characteristic = &services[0].characteristics[0];

        assert!(!characteristic.subscribed);
        assert_eq!(characteristic.descriptors.len(), 1);
        assert_eq!(adapter.count(&Call::ValueChanges(0x21)), 1);
        tokio::task::yield_now().await;
        assert_eq!(adapter.count(&Call::EnableNotifications(0x21)), 0);
    }

    #[tokio::test]
    async fn test_descriptor_failure_yields_empty_list() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x10, from_short(0x180f))
            .characteristic(0x10, 0x11, from_short(0x2a19), Props::READ)
            .descriptor(0x11, 0x12, from_short(0x2902))
            .fail_descriptors(0x11)
            .build();
        let (side, _rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(None, None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;

        assert_eq!(services[0].characteristics.len(), 1);
        assert!(services[0].characteristics[0].descriptors.is_empty());
    }

    #[tokio::test]
    async fn test_included_services_are_not_joined() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x20, target_service())
            .service(0x30, from_short(0xffff))
            .included(0x30, from_short(0x180f))
            .characteristic(0x30, 0x31, from_short(0x2a19), Props::READ)
            .characteristic(0x30, 0x33, from_short(0x2a00), Props::READ)
            .build();
        let (side, mut rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(Some(target_service()), None), side);
        let (id, _) = pochiru();

        let services = explorer.explore_services(&id).await;
        assert_eq!(services.len(), 1);
        assert!(services[0].characteristics.is_empty());

        // the non-matching service still gets included-service discovery
        let included = next_side_event(&mut rx, |e| {
            matches!(e, SideEvent::IncludedServices { service, .. } if *service == from_short(0xffff))
        })
        .await;
        assert!(matches!(
            included,
            Some(SideEvent::IncludedServices { included, .. }) if included == vec![from_short(0x180f)]
        ));

        let follow_on = next_side_event(&mut rx, |e| {
            matches!(e, SideEvent::FollowOnCharacteristics { service, .. } if *service == from_short(0xffff))
        })
        .await;
        assert!(matches!(
            follow_on,
            Some(SideEvent::FollowOnCharacteristics { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_stalled_characteristic_discovery_starves_join() {
        let (adapter, _, _) = FakeAdapter::builder()
            .service(0x10, from_short(0x1800))
            .service(0x20, from_short(0x1801))
            .service(0x30, from_short(0x180f))
            .characteristic(0x10, 0x11, from_short(0x2a00), Props::READ)
            .characteristic(0x30, 0x31, from_short(0x2a19), Props::READ)
            .stall_characteristics(0x20)
            .build();
        let (side, _rx) = SideChannel::new();
        let explorer = Explorer::new(adapter.clone(), &config(None, None), side);
        let (id, _) = pochiru();

        let result =
            tokio::time::timeout(Duration::from_millis(100), explorer.explore_services(&id)).await;

        assert!(result.is_err());
        // the other two services finished their work
        assert_eq!(adapter.descriptors_completed(), 2);
    }
}
