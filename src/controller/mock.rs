//! In-memory controller for tests.

use super::*;
use anyhow::{anyhow, bail};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// A remote call that changed (or tried to change) controller state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    CreateGroup(String),
    UpdateGroup(String),
    DeleteGroup(String),
    CreateRule(String),
    UpdateRule(String),
    DeleteRule(String),
    CreatePolicy(String),
    UpdatePolicy(String),
    DeletePolicy(String),
}

impl Call {
    /// Name of the object the call targets.
    pub fn name(&self) -> &str {
        match self {
            Call::CreateGroup(name)
            | Call::UpdateGroup(name)
            | Call::DeleteGroup(name)
            | Call::CreateRule(name)
            | Call::UpdateRule(name)
            | Call::DeleteRule(name)
            | Call::CreatePolicy(name)
            | Call::UpdatePolicy(name)
            | Call::DeletePolicy(name) => name,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Call::DeleteGroup(_) | Call::DeleteRule(_) | Call::DeletePolicy(_)
        )
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    zone_mode: bool,
    groups: BTreeMap<String, RemoteGroup>,
    rules: BTreeMap<String, RemoteRule>,
    policies: BTreeMap<String, RemoteZonePolicy>,
    zones: Vec<Zone>,
    calls: Vec<Call>,
    failing: HashSet<String>,
    failing_calls: HashSet<Call>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("id-{}", self.next_id)
    }

    /// Record a mutation and fail it if its object or the exact call is marked.
    fn record(&mut self, call: Call) -> Result<()> {
        let fails = self.failing.contains(call.name()) || self.failing_calls.contains(&call);
        self.calls.push(call.clone());
        if fails {
            bail!("injected failure for {:?}", call);
        }
        Ok(())
    }
}

/// Controller fake that keeps objects in memory and records every mutation.
#[derive(Default)]
pub struct MemoryController {
    state: Mutex<State>,
}

impl MemoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable zone mode with zones of the given names.
    pub fn with_zones(names: &[&str]) -> Self {
        let controller = Self::new();
        {
            let mut state = controller.state.lock().unwrap();
            state.zone_mode = true;
            for name in names {
                let id = state.next_id();
                state.zones.push(Zone {
                    id,
                    name: name.to_string(),
                });
            }
        }
        controller
    }

    /// Make every mutation of the object named `name` fail.
    pub fn fail_on(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    /// Make only this exact call fail, leaving other calls on the same object alone.
    pub fn fail_call(&self, call: Call) {
        self.state.lock().unwrap().failing_calls.insert(call);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing.clear();
        state.failing_calls.clear();
    }

    pub fn insert_group(&self, name: &str, members: &[&str]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.groups.insert(
            id.clone(),
            RemoteGroup {
                id: id.clone(),
                name: name.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        id
    }

    pub fn insert_rule(&self, name: &str, group_id: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.rules.insert(
            id.clone(),
            RemoteRule {
                id: id.clone(),
                name: name.to_string(),
                group_id: Some(group_id.to_string()),
            },
        );
        id
    }

    pub fn zone_id(&self, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.zones.iter().find(|z| z.name == name).map(|z| z.id.clone())
    }

    pub fn insert_policy(&self, name: &str, group_id: &str, src: &str, dst: &str) -> String {
        let source_zone_id = self.zone_id(src).unwrap_or_default();
        let destination_zone_id = self.zone_id(dst).unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.policies.insert(
            id.clone(),
            RemoteZonePolicy {
                id: id.clone(),
                name: name.to_string(),
                group_id: Some(group_id.to_string()),
                source_zone_id,
                destination_zone_id,
            },
        );
        id
    }

    pub fn groups(&self) -> Vec<RemoteGroup> {
        let mut groups: Vec<_> = self.state.lock().unwrap().groups.values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    pub fn group_by_name(&self, name: &str) -> Option<RemoteGroup> {
        self.groups().into_iter().find(|g| g.name == name)
    }

    pub fn rules(&self) -> Vec<RemoteRule> {
        let mut rules: Vec<_> = self.state.lock().unwrap().rules.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub fn policies(&self) -> Vec<RemoteZonePolicy> {
        let mut policies: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .policies
            .values()
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        policies
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Return and forget the calls recorded so far.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }
}

#[async_trait]
impl FirewallController for MemoryController {
    async fn is_zone_mode_enabled(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().zone_mode)
    }

    async fn list_groups(&self) -> Result<Vec<RemoteGroup>> {
        Ok(self.groups())
    }

    async fn create_group(&self, spec: &GroupSpec) -> Result<RemoteGroup> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::CreateGroup(spec.name.clone()))?;
        let id = state.next_id();
        let group = RemoteGroup {
            id: id.clone(),
            name: spec.name.clone(),
            members: spec.members.clone(),
        };
        state.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn update_group(&self, id: &str, spec: &GroupSpec) -> Result<RemoteGroup> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::UpdateGroup(spec.name.clone()))?;
        let group = state
            .groups
            .get_mut(id)
            .ok_or_else(|| anyhow!("no group with id {}", id))?;
        group.members = spec.members.clone();
        Ok(group.clone())
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .groups
            .get(id)
            .map(|g| g.name.clone())
            .ok_or_else(|| anyhow!("no group with id {}", id))?;
        state.record(Call::DeleteGroup(name.clone()))?;
        let referenced = state.rules.values().any(|r| r.group_id.as_deref() == Some(id))
            || state.policies.values().any(|p| p.group_id.as_deref() == Some(id));
        if referenced {
            bail!("group {} is still in use", name);
        }
        state.groups.remove(id);
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<RemoteRule>> {
        Ok(self.rules())
    }

    async fn create_rule(&self, spec: &RuleSpec) -> Result<RemoteRule> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::CreateRule(spec.name.clone()))?;
        let id = state.next_id();
        let rule = RemoteRule {
            id: id.clone(),
            name: spec.name.clone(),
            group_id: Some(spec.group_id.clone()),
        };
        state.rules.insert(id, rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, id: &str, spec: &RuleSpec) -> Result<RemoteRule> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::UpdateRule(spec.name.clone()))?;
        let rule = state
            .rules
            .get_mut(id)
            .ok_or_else(|| anyhow!("no rule with id {}", id))?;
        rule.group_id = Some(spec.group_id.clone());
        Ok(rule.clone())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .rules
            .get(id)
            .map(|r| r.name.clone())
            .ok_or_else(|| anyhow!("no rule with id {}", id))?;
        state.record(Call::DeleteRule(name))?;
        state.rules.remove(id);
        Ok(())
    }

    async fn list_zone_policies(&self) -> Result<Vec<RemoteZonePolicy>> {
        Ok(self.policies())
    }

    async fn create_zone_policy(&self, spec: &ZonePolicySpec) -> Result<RemoteZonePolicy> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::CreatePolicy(spec.name.clone()))?;
        let id = state.next_id();
        let policy = RemoteZonePolicy {
            id: id.clone(),
            name: spec.name.clone(),
            group_id: Some(spec.group_id.clone()),
            source_zone_id: spec.source_zone_id.clone(),
            destination_zone_id: spec.destination_zone_id.clone(),
        };
        state.policies.insert(id, policy.clone());
        Ok(policy)
    }

    async fn update_zone_policy(
        &self,
        id: &str,
        spec: &ZonePolicySpec,
    ) -> Result<RemoteZonePolicy> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::UpdatePolicy(spec.name.clone()))?;
        let policy = state
            .policies
            .get_mut(id)
            .ok_or_else(|| anyhow!("no policy with id {}", id))?;
        policy.group_id = Some(spec.group_id.clone());
        Ok(policy.clone())
    }

    async fn delete_zone_policy(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .policies
            .get(id)
            .map(|p| p.name.clone())
            .ok_or_else(|| anyhow!("no policy with id {}", id))?;
        state.record(Call::DeletePolicy(name))?;
        state.policies.remove(id);
        Ok(())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(self.state.lock().unwrap().zones.clone())
    }
}
