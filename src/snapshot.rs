//! Remote objects owned by the bouncer, indexed by name.
//!
//! Built once at startup from the controller and then kept up to date in
//! place by the reconciler, so later passes never list remote state again.

use std::collections::HashMap;
use tracing::info;

use crate::batcher::owner_family;
use crate::cache::AddressCache;
use crate::config::EngineSettings;
use crate::controller::{FirewallController, Zone};
use crate::decision::AddressFamily;
use crate::error::BouncerError;

/// How blocked groups are enforced on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// One firewall rule per group
    Legacy,
    /// One zone policy per group and (source zone, destination zone) pair
    Zone,
}

/// Last known state of a remote group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedGroup {
    pub id: String,
    /// Sorted membership
    pub members: Vec<String>,
}

/// Last known state of a rule or zone policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRef {
    pub id: String,
    pub group_id: Option<String>,
}

/// Objects of one address family, keyed by object name.
#[derive(Debug, Default)]
pub struct FamilyState {
    pub groups: HashMap<String, CachedGroup>,
    pub rules: HashMap<String, CachedRef>,
    pub policies: HashMap<String, CachedRef>,
}

#[derive(Debug)]
pub struct RemoteStateSnapshot {
    mode: PolicyMode,
    ipv4: FamilyState,
    ipv6: FamilyState,
    zones: HashMap<String, Zone>,
}

impl RemoteStateSnapshot {
    pub fn new(mode: PolicyMode) -> Self {
        Self {
            mode,
            ipv4: FamilyState::default(),
            ipv6: FamilyState::default(),
            zones: HashMap::new(),
        }
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn family(&self, family: AddressFamily) -> &FamilyState {
        match family {
            AddressFamily::V4 => &self.ipv4,
            AddressFamily::V6 => &self.ipv6,
        }
    }

    pub fn family_mut(&mut self, family: AddressFamily) -> &mut FamilyState {
        match family {
            AddressFamily::V4 => &mut self.ipv4,
            AddressFamily::V6 => &mut self.ipv6,
        }
    }

    pub fn zone_id(&self, name: &str) -> Option<&str> {
        self.zones.get(name).map(|z| z.id.as_str())
    }

    /// Enumerate the controller and rebuild the address cache from it.
    ///
    /// Members of existing bouncer groups are seeded into `cache` without
    /// marking it modified. In zone mode every configured source and
    /// destination zone must exist on the controller.
    pub async fn load(
        controller: &dyn FirewallController,
        settings: &EngineSettings,
        cache: &mut AddressCache,
    ) -> Result<Self, BouncerError> {
        let zone_mode = controller
            .is_zone_mode_enabled()
            .await
            .map_err(|e| BouncerError::enumerate("feature flags", e))?;
        info!("Zone Based Firewall: {}", zone_mode);

        if zone_mode && (settings.zone_src.is_empty() || settings.zone_dst.is_empty()) {
            return Err(BouncerError::ZonesNotConfigured);
        }

        let mode = if zone_mode {
            PolicyMode::Zone
        } else {
            PolicyMode::Legacy
        };
        let mut snapshot = Self::new(mode);

        let (groups, rules) = futures::try_join!(
            async {
                controller
                    .list_groups()
                    .await
                    .map_err(|e| BouncerError::enumerate("firewall groups", e))
            },
            async {
                controller
                    .list_rules()
                    .await
                    .map_err(|e| BouncerError::enumerate("firewall rules", e))
            },
        )?;

        for group in groups {
            let Some(family) = owner_family(&group.name) else {
                continue;
            };
            for member in &group.members {
                cache.seed(family, member);
            }
            let mut members = group.members;
            members.sort_unstable();
            snapshot.family_mut(family).groups.insert(
                group.name,
                CachedGroup {
                    id: group.id,
                    members,
                },
            );
        }

        for rule in rules {
            let Some(family) = owner_family(&rule.name) else {
                continue;
            };
            snapshot.family_mut(family).rules.insert(
                rule.name,
                CachedRef {
                    id: rule.id,
                    group_id: rule.group_id,
                },
            );
        }

        if zone_mode {
            let (policies, zones) = futures::try_join!(
                async {
                    controller
                        .list_zone_policies()
                        .await
                        .map_err(|e| BouncerError::enumerate("firewall policies", e))
                },
                async {
                    controller
                        .list_zones()
                        .await
                        .map_err(|e| BouncerError::enumerate("firewall zones", e))
                },
            )?;

            for policy in policies {
                let Some(family) = owner_family(&policy.name) else {
                    continue;
                };
                snapshot.family_mut(family).policies.insert(
                    policy.name,
                    CachedRef {
                        id: policy.id,
                        group_id: policy.group_id,
                    },
                );
            }

            snapshot.zones = zones.into_iter().map(|z| (z.name.clone(), z)).collect();

            for zone in &settings.zone_src {
                if !snapshot.zones.contains_key(zone) {
                    return Err(BouncerError::SourceZoneNotFound(zone.clone()));
                }
            }
            for zone in &settings.zone_dst {
                if !snapshot.zones.contains_key(zone) {
                    return Err(BouncerError::DestinationZoneNotFound(zone.clone()));
                }
            }
        }

        for family in AddressFamily::ALL {
            let state = snapshot.family(family);
            info!(
                groups = state.groups.len(),
                rules = state.rules.len(),
                policies = state.policies.len(),
                addresses = cache.len(family),
                "Loaded existing {} objects",
                family
            );
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::MemoryController;
    use crate::controller::MockFirewallController;

    fn settings() -> EngineSettings {
        EngineSettings {
            zone_src: vec!["External".to_string()],
            zone_dst: vec!["Internal".to_string(), "Vpn".to_string()],
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_load_legacy_seeds_cache() {
        let controller = MemoryController::new();
        let gid = controller.insert_group("cs-unifi-bouncer-ipv4-0", &["192.0.2.2", "192.0.2.1"]);
        controller.insert_rule("cs-unifi-bouncer-ipv4-0", &gid);
        controller.insert_group("cs-unifi-bouncer-ipv6-0", &["2001:db8::1"]);
        controller.insert_group("admin-allowlist", &["10.0.0.1"]);

        let mut cache = AddressCache::new(true);
        let snapshot = RemoteStateSnapshot::load(&controller, &settings(), &mut cache)
            .await
            .unwrap();

        assert_eq!(snapshot.mode(), PolicyMode::Legacy);
        let v4 = snapshot.family(AddressFamily::V4);
        assert_eq!(v4.groups["cs-unifi-bouncer-ipv4-0"].id, gid);
        assert_eq!(
            v4.groups["cs-unifi-bouncer-ipv4-0"].members,
            vec!["192.0.2.1", "192.0.2.2"]
        );
        assert_eq!(
            v4.rules["cs-unifi-bouncer-ipv4-0"].group_id.as_deref(),
            Some(gid.as_str())
        );
        assert_eq!(snapshot.family(AddressFamily::V6).groups.len(), 1);

        assert!(cache.contains("192.0.2.1"));
        assert!(cache.contains("2001:db8::1"));
        assert!(!cache.contains("10.0.0.1"));
        assert!(!cache.is_modified());
    }

    #[tokio::test]
    async fn test_load_zone_policies_keyed_by_family() {
        let controller = MemoryController::with_zones(&["External", "Internal", "Vpn"]);
        let g4 = controller.insert_group("cs-unifi-bouncer-ipv4-0", &["192.0.2.1"]);
        let g6 = controller.insert_group("cs-unifi-bouncer-ipv6-0", &["2001:db8::1"]);
        controller.insert_policy("cs-unifi-bouncer-ipv4-External->Internal-0", &g4, "External", "Internal");
        controller.insert_policy("cs-unifi-bouncer-ipv6-External->Internal-0", &g6, "External", "Internal");

        let mut cache = AddressCache::new(true);
        let snapshot = RemoteStateSnapshot::load(&controller, &settings(), &mut cache)
            .await
            .unwrap();

        assert_eq!(snapshot.mode(), PolicyMode::Zone);
        let v4 = &snapshot.family(AddressFamily::V4).policies;
        let v6 = &snapshot.family(AddressFamily::V6).policies;
        assert_eq!(v4.len(), 1);
        assert_eq!(v6.len(), 1);
        assert_eq!(
            v6["cs-unifi-bouncer-ipv6-External->Internal-0"].group_id.as_deref(),
            Some(g6.as_str())
        );
        assert!(snapshot.zone_id("Vpn").is_some());
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_source_zone() {
        let controller = MemoryController::with_zones(&["Internal", "Vpn"]);
        let mut cache = AddressCache::new(true);
        let err = RemoteStateSnapshot::load(&controller, &settings(), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, BouncerError::SourceZoneNotFound(ref z) if z == "External"));
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_destination_zone() {
        let controller = MemoryController::with_zones(&["External", "Internal"]);
        let mut cache = AddressCache::new(true);
        let err = RemoteStateSnapshot::load(&controller, &settings(), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, BouncerError::DestinationZoneNotFound(ref z) if z == "Vpn"));
    }

    #[tokio::test]
    async fn test_load_requires_zone_lists_in_zone_mode() {
        let controller = MemoryController::with_zones(&["External"]);
        let settings = EngineSettings {
            zone_dst: Vec::new(),
            ..settings()
        };
        let mut cache = AddressCache::new(true);
        let err = RemoteStateSnapshot::load(&controller, &settings, &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, BouncerError::ZonesNotConfigured));
    }

    #[tokio::test]
    async fn test_load_listing_failure_is_fatal() {
        let mut controller = MockFirewallController::new();
        controller
            .expect_is_zone_mode_enabled()
            .returning(|| Ok(false));
        controller
            .expect_list_groups()
            .returning(|| Err(anyhow::anyhow!("HTTP 401")));
        controller.expect_list_rules().returning(|| Ok(Vec::new()));

        let mut cache = AddressCache::new(true);
        let err = RemoteStateSnapshot::load(&controller, &settings(), &mut cache)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("firewall groups"));
        assert!(err.to_string().contains("HTTP 401"));
    }

    #[tokio::test]
    async fn test_load_feature_flag_failure_is_fatal() {
        let mut controller = MockFirewallController::new();
        controller
            .expect_is_zone_mode_enabled()
            .returning(|| Err(anyhow::anyhow!("timeout")));

        let mut cache = AddressCache::new(true);
        let err = RemoteStateSnapshot::load(&controller, &settings(), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, BouncerError::Enumerate { what: "feature flags", .. }));
    }
}
