//! Firewall controller abstraction.
//!
//! The reconciler only talks to the controller through [`FirewallController`];
//! [`UnifiClient`] is the production implementation.

mod unifi;

#[cfg(test)]
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

pub use unifi::UnifiClient;

use crate::decision::AddressFamily;

/// Remote address group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteGroup {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

/// Remote legacy firewall rule matching one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRule {
    pub id: String,
    pub name: String,
    /// First source group referenced by the rule
    pub group_id: Option<String>,
}

/// Remote zone-based policy matching one group between two zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteZonePolicy {
    pub id: String,
    pub name: String,
    pub group_id: Option<String>,
    pub source_zone_id: String,
    pub destination_zone_id: String,
}

/// Firewall zone known to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Desired contents of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub family: AddressFamily,
    pub members: Vec<String>,
}

/// Desired contents of a legacy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub name: String,
    pub family: AddressFamily,
    /// Position of the rule in the controller's rule list
    pub rule_index: u32,
    pub group_id: String,
    pub logging: bool,
}

/// Desired contents of a zone policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonePolicySpec {
    pub name: String,
    pub family: AddressFamily,
    pub group_id: String,
    pub source_zone_id: String,
    pub destination_zone_id: String,
    pub logging: bool,
}

/// Operations the bouncer needs from a firewall controller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FirewallController: Send + Sync {
    /// Whether the controller runs the zone-based firewall
    async fn is_zone_mode_enabled(&self) -> Result<bool>;

    async fn list_groups(&self) -> Result<Vec<RemoteGroup>>;
    async fn create_group(&self, spec: &GroupSpec) -> Result<RemoteGroup>;
    async fn update_group(&self, id: &str, spec: &GroupSpec) -> Result<RemoteGroup>;
    async fn delete_group(&self, id: &str) -> Result<()>;

    async fn list_rules(&self) -> Result<Vec<RemoteRule>>;
    async fn create_rule(&self, spec: &RuleSpec) -> Result<RemoteRule>;
    async fn update_rule(&self, id: &str, spec: &RuleSpec) -> Result<RemoteRule>;
    async fn delete_rule(&self, id: &str) -> Result<()>;

    async fn list_zone_policies(&self) -> Result<Vec<RemoteZonePolicy>>;
    async fn create_zone_policy(&self, spec: &ZonePolicySpec) -> Result<RemoteZonePolicy>;
    async fn update_zone_policy(&self, id: &str, spec: &ZonePolicySpec)
        -> Result<RemoteZonePolicy>;
    async fn delete_zone_policy(&self, id: &str) -> Result<()>;

    async fn list_zones(&self) -> Result<Vec<Zone>>;
}
