//! Depth-first text rendering of an explored peripheral

use crate::domain::assigned_numbers::display_uuid;
use crate::domain::models::{CharacteristicNode, DescriptorNode, ServiceNode};
use std::fmt;

const CHARACTERISTIC_INDENT: &str = "    ";
const DESCRIPTOR_INDENT: &str = "        ";

/// Borrowing view that renders a service tree, one line per node.
pub struct TreeView<'a> {
    services: &'a [ServiceNode],
}

impl<'a> TreeView<'a> {
    pub fn new(services: &'a [ServiceNode]) -> Self {
        Self { services }
    }
}

impl fmt::Display for TreeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for service in self.services {
            write_service(f, service)?;
            for characteristic in &service.characteristics {
                write_characteristic(f, characteristic)?;
                for descriptor in &characteristic.descriptors {
                    write_descriptor(f, descriptor)?;
                }
            }
        }
        writeln!(f, "END")
    }
}

pub fn render(services: &[ServiceNode]) -> String {
    TreeView::new(services).to_string()
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

fn write_service(f: &mut fmt::Formatter<'_>, node: &ServiceNode) -> fmt::Result {
    writeln!(
        f,
        "Service: {} {} {}",
        display_uuid(&node.uuid),
        or_dash(node.kind),
        or_dash(node.name)
    )
}

fn write_characteristic(f: &mut fmt::Formatter<'_>, node: &CharacteristicNode) -> fmt::Result {
    let properties =
        serde_json::to_string(&node.properties).map_err(|_| fmt::Error)?;
    write!(
        f,
        "{}Chara.: {} {} {} {}",
        CHARACTERISTIC_INDENT,
        display_uuid(&node.uuid),
        or_dash(node.kind),
        or_dash(node.name),
        properties
    )?;
    if node.subscribed {
        write!(f, " (subscribed)")?;
    }
    writeln!(f)
}

fn write_descriptor(f: &mut fmt::Formatter<'_>, node: &DescriptorNode) -> fmt::Result {
    writeln!(
        f,
        "{}Desc.: {} {} {}",
        DESCRIPTOR_INDENT,
        display_uuid(&node.uuid),
        or_dash(node.kind),
        or_dash(node.name)
    )
}
