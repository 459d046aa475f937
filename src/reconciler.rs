//! Diff-based synchronization of the address cache onto the controller.
//!
//! One algorithm serves both address families and both policy modes:
//!
//! ```text
//! for each family:
//!   chunks = batch(sorted addresses, max_group_size)
//!   for each chunk index i:
//!     upsert group  <prefix>-<family>-i          (skip if membership unchanged)
//!     legacy: upsert rule <prefix>-<family>-i    (skip if it already references the group)
//!     zone:   upsert policy per (src, dst) pair  (same skip rule)
//!   for i = chunks.len().. while anything named for i exists:
//!     delete rule/policies, then the group
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::batcher::{batch, group_name, policy_name};
use crate::cache::AddressCache;
use crate::config::EngineSettings;
use crate::controller::{FirewallController, GroupSpec, RuleSpec, ZonePolicySpec};
use crate::decision::AddressFamily;
use crate::snapshot::{CachedGroup, CachedRef, FamilyState, PolicyMode, RemoteStateSnapshot};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ReconcileReport {
    /// True when every remote call of the pass succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Number of successful remote mutations.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Zone pair with resolved zone ids.
#[derive(Debug, Clone)]
struct ZonePair {
    src: String,
    dst: String,
    src_id: String,
    dst_id: String,
}

/// Kind of object that references a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Referrer {
    Rule,
    Policy,
}

impl Referrer {
    fn cache(self, state: &mut FamilyState) -> &mut HashMap<String, CachedRef> {
        match self {
            Referrer::Rule => &mut state.rules,
            Referrer::Policy => &mut state.policies,
        }
    }

    async fn delete(self, controller: &dyn FirewallController, id: &str) -> anyhow::Result<()> {
        match self {
            Referrer::Rule => controller.delete_rule(id).await,
            Referrer::Policy => controller.delete_zone_policy(id).await,
        }
    }
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Referrer::Rule => f.write_str("firewall rule"),
            Referrer::Policy => f.write_str("firewall policy"),
        }
    }
}

/// Desired rule or policy for one chunk.
enum ReferrerSpec {
    Rule(RuleSpec),
    Policy(ZonePolicySpec),
}

impl ReferrerSpec {
    fn kind(&self) -> Referrer {
        match self {
            ReferrerSpec::Rule(_) => Referrer::Rule,
            ReferrerSpec::Policy(_) => Referrer::Policy,
        }
    }

    fn name(&self) -> &str {
        match self {
            ReferrerSpec::Rule(spec) => &spec.name,
            ReferrerSpec::Policy(spec) => &spec.name,
        }
    }

    fn group_id(&self) -> &str {
        match self {
            ReferrerSpec::Rule(spec) => &spec.group_id,
            ReferrerSpec::Policy(spec) => &spec.group_id,
        }
    }

    /// Create or update the remote object, returning its id.
    async fn put(
        &self,
        controller: &dyn FirewallController,
        existing: Option<&str>,
    ) -> anyhow::Result<String> {
        let id = match (self, existing) {
            (ReferrerSpec::Rule(spec), Some(id)) => controller.update_rule(id, spec).await?.id,
            (ReferrerSpec::Rule(spec), None) => controller.create_rule(spec).await?.id,
            (ReferrerSpec::Policy(spec), Some(id)) => {
                controller.update_zone_policy(id, spec).await?.id
            }
            (ReferrerSpec::Policy(spec), None) => controller.create_zone_policy(spec).await?.id,
        };
        Ok(id)
    }
}

/// Pushes the desired address sets to the controller.
pub struct Reconciler {
    controller: Arc<dyn FirewallController>,
    settings: EngineSettings,
}

impl Reconciler {
    pub fn new(controller: Arc<dyn FirewallController>, settings: EngineSettings) -> Self {
        Self {
            controller,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one pass if the cache changed since the last clean pass.
    ///
    /// Failed remote calls are logged and leave the snapshot at the last
    /// known-good state so the next pass retries them.
    pub async fn reconcile(
        &self,
        cache: &AddressCache,
        snapshot: &mut RemoteStateSnapshot,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if !cache.is_modified() {
            debug!("No changes detected, skipping update");
            return report;
        }

        let pairs = self.zone_pairs(snapshot);
        for family in AddressFamily::ALL {
            self.reconcile_family(family, cache, snapshot, &pairs, &mut report)
                .await;
        }

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            failed = report.failed,
            "Reconciliation pass complete"
        );
        report
    }

    fn zone_pairs(&self, snapshot: &RemoteStateSnapshot) -> Vec<ZonePair> {
        if snapshot.mode() != PolicyMode::Zone {
            return Vec::new();
        }

        let mut pairs = Vec::new();
        for src in &self.settings.zone_src {
            for dst in &self.settings.zone_dst {
                match (snapshot.zone_id(src), snapshot.zone_id(dst)) {
                    (Some(src_id), Some(dst_id)) => pairs.push(ZonePair {
                        src: src.clone(),
                        dst: dst.clone(),
                        src_id: src_id.to_string(),
                        dst_id: dst_id.to_string(),
                    }),
                    _ => error!("Zone pair {} -> {} is not known to the controller", src, dst),
                }
            }
        }
        pairs
    }

    async fn reconcile_family(
        &self,
        family: AddressFamily,
        cache: &AddressCache,
        snapshot: &mut RemoteStateSnapshot,
        pairs: &[ZonePair],
        report: &mut ReconcileReport,
    ) {
        let mode = snapshot.mode();
        let chunks = batch(cache.addresses(family), self.settings.max_group_size);
        let count = chunks.len();
        info!("Number of {} groups needed: {}", family, count);

        let state = snapshot.family_mut(family);

        for (index, members) in chunks.into_iter().enumerate() {
            let Some(group_id) = self.upsert_group(family, index, members, state, report).await
            else {
                continue;
            };

            match mode {
                PolicyMode::Legacy => {
                    let spec = RuleSpec {
                        name: group_name(family, index),
                        family,
                        rule_index: self.rule_index(family, index),
                        group_id: group_id.clone(),
                        logging: self.settings.logging,
                    };
                    self.upsert_referrer(ReferrerSpec::Rule(spec), state, report)
                        .await;
                }
                PolicyMode::Zone => {
                    for pair in pairs {
                        let spec = ZonePolicySpec {
                            name: policy_name(family, &pair.src, &pair.dst, index),
                            family,
                            group_id: group_id.clone(),
                            source_zone_id: pair.src_id.clone(),
                            destination_zone_id: pair.dst_id.clone(),
                            logging: self.settings.logging,
                        };
                        self.upsert_referrer(ReferrerSpec::Policy(spec), state, report)
                            .await;
                    }
                }
            }
        }

        self.prune(family, count, pairs, state, report).await;
    }

    fn rule_index(&self, family: AddressFamily, index: usize) -> u32 {
        let start = match family {
            AddressFamily::V4 => self.settings.ipv4_start_rule_index,
            AddressFamily::V6 => self.settings.ipv6_start_rule_index,
        };
        start.saturating_add(u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Make the group at `index` hold `members`; returns its id on success.
    async fn upsert_group(
        &self,
        family: AddressFamily,
        index: usize,
        members: Vec<String>,
        state: &mut FamilyState,
        report: &mut ReconcileReport,
    ) -> Option<String> {
        let name = group_name(family, index);

        let existing = match state.groups.get(&name) {
            Some(cached) if cached.members == members => {
                debug!("Firewall group {} unchanged", name);
                report.unchanged += 1;
                return Some(cached.id.clone());
            }
            Some(cached) => Some(cached.id.clone()),
            None => None,
        };

        let spec = GroupSpec {
            name,
            family,
            members,
        };

        let result = match &existing {
            Some(id) => self.controller.update_group(id, &spec).await,
            None => self.controller.create_group(&spec).await,
        };

        match result {
            Ok(group) => {
                if existing.is_some() {
                    info!("Updated firewall group: {}", spec.name);
                    report.updated += 1;
                } else {
                    info!("Created firewall group: {}", spec.name);
                    report.created += 1;
                }
                let id = group.id;
                state.groups.insert(
                    spec.name,
                    CachedGroup {
                        id: id.clone(),
                        members: spec.members,
                    },
                );
                Some(id)
            }
            Err(e) => {
                error!("Failed to post firewall group {}: {:#}", spec.name, e);
                report.failed += 1;
                None
            }
        }
    }

    /// Point the rule or policy at its group unless it already does.
    async fn upsert_referrer(
        &self,
        spec: ReferrerSpec,
        state: &mut FamilyState,
        report: &mut ReconcileReport,
    ) {
        let kind = spec.kind();
        let cached = kind.cache(state).get(spec.name()).cloned();

        if let Some(cached) = &cached {
            if cached.group_id.as_deref() == Some(spec.group_id()) {
                debug!("{} {} unchanged", kind, spec.name());
                report.unchanged += 1;
                return;
            }
        }

        let existing = cached.as_ref().map(|c| c.id.as_str());
        match spec.put(self.controller.as_ref(), existing).await {
            Ok(id) => {
                if existing.is_some() {
                    info!("Updated {}: {}", kind, spec.name());
                    report.updated += 1;
                } else {
                    info!("Created {}: {}", kind, spec.name());
                    report.created += 1;
                }
                kind.cache(state).insert(
                    spec.name().to_string(),
                    CachedRef {
                        id,
                        group_id: Some(spec.group_id().to_string()),
                    },
                );
            }
            Err(e) => {
                error!("Failed to post {} {}: {:#}", kind, spec.name(), e);
                report.failed += 1;
            }
        }
    }

    /// Delete objects with an index of `count` or above.
    ///
    /// Indices are contiguous, so the scan stops at the first index with no
    /// group, rule or policy.
    async fn prune(
        &self,
        family: AddressFamily,
        count: usize,
        pairs: &[ZonePair],
        state: &mut FamilyState,
        report: &mut ReconcileReport,
    ) {
        for index in count.. {
            let name = group_name(family, index);

            let mut referrers = Vec::new();
            if state.rules.contains_key(&name) {
                referrers.push((Referrer::Rule, name.clone()));
            }
            for pair in pairs {
                let policy = policy_name(family, &pair.src, &pair.dst, index);
                if state.policies.contains_key(&policy) {
                    referrers.push((Referrer::Policy, policy));
                }
            }
            let group_id = state.groups.get(&name).map(|g| g.id.clone());

            if referrers.is_empty() && group_id.is_none() {
                break;
            }

            let mut still_referenced = false;
            for (kind, object) in referrers {
                let Some(id) = kind.cache(state).get(&object).map(|c| c.id.clone()) else {
                    continue;
                };
                match kind.delete(self.controller.as_ref(), &id).await {
                    Ok(()) => {
                        info!("Deleted old {}: {}", kind, object);
                        kind.cache(state).remove(&object);
                        report.deleted += 1;
                    }
                    Err(e) => {
                        error!("Failed to delete old {}: {}: {:#}", kind, object, e);
                        report.failed += 1;
                        still_referenced = true;
                    }
                }
            }

            let Some(group_id) = group_id else {
                continue;
            };
            if still_referenced {
                warn!("Keeping firewall group {} while it is still referenced", name);
                continue;
            }
            match self.controller.delete_group(&group_id).await {
                Ok(()) => {
                    info!("Deleted old firewall group: {}", name);
                    state.groups.remove(&name);
                    report.deleted += 1;
                }
                Err(e) => {
                    error!("Failed to delete old firewall group: {}: {:#}", name, e);
                    report.failed += 1;
                }
            }
        }
    }
}
