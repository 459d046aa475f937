//! Desired set of addresses to block, mutated by decision events.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::decision::{AddressFamily, Decision, DecisionBatch};
use crate::validation::validate_ip_or_cidr;

/// Current desired IPv4 and IPv6 block sets.
///
/// Entries are present or absent: a second ban of the same value collapses
/// into the first. `modified` records any net change since the last
/// successful reconciliation.
#[derive(Debug, Default)]
pub struct AddressCache {
    ipv4: HashSet<String>,
    ipv6: HashSet<String>,
    use_ipv6: bool,
    modified: bool,
}

impl AddressCache {
    pub fn new(use_ipv6: bool) -> Self {
        Self {
            use_ipv6,
            ..Self::default()
        }
    }

    fn set(&self, family: AddressFamily) -> &HashSet<String> {
        match family {
            AddressFamily::V4 => &self.ipv4,
            AddressFamily::V6 => &self.ipv6,
        }
    }

    fn set_mut(&mut self, family: AddressFamily) -> &mut HashSet<String> {
        match family {
            AddressFamily::V4 => &mut self.ipv4,
            AddressFamily::V6 => &mut self.ipv6,
        }
    }

    /// Insert an address. Returns `true` when the cache changed.
    pub fn add(&mut self, address: &str) -> bool {
        let family = AddressFamily::of(address);
        if family == AddressFamily::V6 && !self.use_ipv6 {
            info!("Ignore adding address {} (IPv6 disabled)", address);
            return false;
        }

        if self.set_mut(family).insert(address.to_string()) {
            self.modified = true;
            true
        } else {
            warn!("Address {} already present", address);
            false
        }
    }

    /// Delete an address. Returns `true` when the cache changed.
    pub fn remove(&mut self, address: &str) -> bool {
        let family = AddressFamily::of(address);
        if family == AddressFamily::V6 && !self.use_ipv6 {
            info!("Ignore removing address {} (IPv6 disabled)", address);
            return false;
        }

        if self.set_mut(family).remove(address) {
            self.modified = true;
            true
        } else {
            warn!("{} not found in local cache", address);
            false
        }
    }

    /// Record an address that already exists remotely.
    ///
    /// Used while rebuilding the cache at startup; does not mark the cache
    /// as modified. IPv6 members are kept even with IPv6 disabled so that
    /// existing IPv6 groups are left as they are.
    pub fn seed(&mut self, family: AddressFamily, address: &str) {
        self.set_mut(family).insert(address.to_string());
    }

    /// Apply one stream batch: all deletions first, then all additions.
    pub fn apply(&mut self, batch: &DecisionBatch) {
        for decision in &batch.deleted {
            if let Some(value) = actionable(decision, "removing") {
                info!(
                    "removed decisions: IP: {} | Scenario: {} | Duration: {} | Scope : {}",
                    value, decision.scenario, decision.duration, decision.scope
                );
                self.remove(value);
            }
        }
        for decision in &batch.new {
            if let Some(value) = actionable(decision, "adding") {
                info!(
                    "new decisions from {}: IP: {} | Scenario: {} | Duration: {} | Scope : {}",
                    decision.origin, value, decision.scenario, decision.duration, decision.scope
                );
                self.add(value);
            }
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.set(AddressFamily::of(address)).contains(address)
    }

    pub fn len(&self, family: AddressFamily) -> usize {
        self.set(family).len()
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// Addresses of one family, in no particular order.
    pub fn addresses(&self, family: AddressFamily) -> impl Iterator<Item = &String> {
        self.set(family).iter()
    }

    pub fn use_ipv6(&self) -> bool {
        self.use_ipv6
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_clean(&mut self) {
        self.modified = false;
    }
}

/// The address of a decision the cache should act on, if any.
fn actionable<'a>(decision: &'a Decision, action: &str) -> Option<&'a str> {
    if !decision.is_ban() {
        debug!("Ignore {} decision type {}", action, decision.kind);
        return None;
    }
    let value = decision.value.trim();
    if let Err(e) = validate_ip_or_cidr(value) {
        warn!("Ignore {} decision: {}", action, e);
        return None;
    }
    Some(value)
}
