//! Per-address advertisement merging
//!
//! Active scanning delivers the advertising packet and the scan response as
//! separate reports. A 128-bit service UUID and a local name rarely fit in
//! one 31-byte packet, so neither report alone is enough to filter on. Each
//! report is folded into one record per address and the service filter runs
//! against the merged record.

use crate::domain::models::Advertisement;
use std::collections::HashMap;
use uuid::Uuid;

/// What a single advertising or scan-response report carried
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementFragment {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    /// Raw manufacturer AD payload, company id first
    pub manufacturer_data: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct ScanRecord {
    local_name: Option<String>,
    service_uuids: Vec<Uuid>,
    manufacturer_data: Option<Vec<u8>>,
    forwarded: bool,
}

impl ScanRecord {
    /// Returns `true` when the fragment added or changed anything
    fn merge(&mut self, fragment: AdvertisementFragment) -> bool {
        let mut changed = false;

        if let Some(name) = fragment.local_name.filter(|n| !n.is_empty()) {
            if self.local_name.as_deref() != Some(name.as_str()) {
                self.local_name = Some(name);
                changed = true;
            }
        }

        for uuid in fragment.service_uuids {
            if !self.service_uuids.contains(&uuid) {
                self.service_uuids.push(uuid);
                changed = true;
            }
        }

        if let Some(data) = fragment.manufacturer_data {
            if self.manufacturer_data.as_ref() != Some(&data) {
                self.manufacturer_data = Some(data);
                changed = true;
            }
        }

        changed
    }

    fn advertises_any(&self, filters: &[Uuid]) -> bool {
        filters.is_empty() || self.service_uuids.iter().any(|u| filters.contains(u))
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            local_name: self.local_name.clone(),
            manufacturer_data: self.manufacturer_data.clone(),
        }
    }
}

/// Merged advertisements for one scan
#[derive(Debug)]
pub struct ScanRecords {
    service_filters: Vec<Uuid>,
    allow_duplicates: bool,
    records: HashMap<u64, ScanRecord>,
}

impl ScanRecords {
    /// An empty filter list lets every advertiser through
    pub fn new(service_filters: Vec<Uuid>, allow_duplicates: bool) -> Self {
        Self {
            service_filters,
            allow_duplicates,
            records: HashMap::new(),
        }
    }

    /// Fold one report into its address's record.
    ///
    /// Returns the merged advertisement when it should be reported: the
    /// record passes the service filter and is new, has changed since it was
    /// last reported, or duplicates are allowed.
    pub fn observe(&mut self, address: u64, fragment: AdvertisementFragment) -> Option<Advertisement> {
        let record = self.records.entry(address).or_default();
        let changed = record.merge(fragment);

        if !record.advertises_any(&self.service_filters) {
            return None;
        }
        if record.forwarded && !changed && !self.allow_duplicates {
            return None;
        }

        record.forwarded = true;
        Some(record.advertisement())
    }
}
