use crate::domain::dedup::SeenAddressSet;
use crate::domain::models::{Advertisement, PeripheralIdentity};
use regex::Regex;
use std::sync::Arc;

/// Outcome of evaluating one advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    AddressMismatch,
    NameMismatch,
    AlreadySeen,
}

impl FilterDecision {
    pub fn is_accept(self) -> bool {
        self == Self::Accept
    }
}

/// Decides which advertising peripherals get explored
pub struct AdvertisementFilter {
    target_address: Option<String>,
    name_pattern: Option<Regex>,
    seen: Arc<SeenAddressSet>,
}

impl AdvertisementFilter {
    pub fn new(
        target_address: Option<String>,
        name_pattern: Option<Regex>,
        seen: Arc<SeenAddressSet>,
    ) -> Self {
        Self {
            target_address,
            name_pattern,
            seen,
        }
    }

    /// Checks run cheapest first; the seen-set claim is last so rejected
    /// advertisements never occupy a slot.
    pub fn evaluate(
        &self,
        identity: &PeripheralIdentity,
        advertisement: &Advertisement,
    ) -> FilterDecision {
        if let Some(target) = &self.target_address {
            if !identity.matches_address(target) {
                return FilterDecision::AddressMismatch;
            }
        }

        if let Some(pattern) = &self.name_pattern {
            if !pattern.is_match(advertisement.name_or_empty()) {
                return FilterDecision::NameMismatch;
            }
        }

        if !self.seen.try_claim(identity) {
            return FilterDecision::AlreadySeen;
        }

        FilterDecision::Accept
    }
}
