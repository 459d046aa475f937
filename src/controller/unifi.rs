//! UniFi Network controller client.
//!
//! Talks to a UniFi OS console through its `/proxy/network` API: the legacy
//! REST endpoints for firewall groups and rules, and the v2 endpoints for
//! zone-based policies, zones and feature flags.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    FirewallController, GroupSpec, RemoteGroup, RemoteRule, RemoteZonePolicy, RuleSpec, Zone,
    ZonePolicySpec,
};
use crate::config::{SecureString, UnifiConfig};
use crate::decision::AddressFamily;

const TIMEOUT_SECS: u64 = 30;

/// Feature flag reported once a site has migrated to zone-based firewalling.
const ZONE_FEATURE: &str = "ZONE_BASED_FIREWALL_MIGRATION";

const CSRF_HEADER: &str = "x-csrf-token";
const UPDATED_CSRF_HEADER: &str = "x-updated-csrf-token";

/// Envelope used by the legacy REST API.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meta: Meta,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    rc: String,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupDto {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(default)]
    group_members: Vec<String>,
}

impl From<GroupDto> for RemoteGroup {
    fn from(dto: GroupDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            members: dto.group_members,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleDto {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(default)]
    src_firewallgroup_ids: Vec<String>,
}

impl From<RuleDto> for RemoteRule {
    fn from(dto: RuleDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            group_id: dto.src_firewallgroup_ids.into_iter().next(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PolicyEndpointDto {
    #[serde(default)]
    zone_id: String,
    #[serde(default)]
    ip_group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyDto {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(default)]
    source: PolicyEndpointDto,
    #[serde(default)]
    destination: PolicyEndpointDto,
}

impl From<PolicyDto> for RemoteZonePolicy {
    fn from(dto: PolicyDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            group_id: dto.source.ip_group_id.filter(|id| !id.is_empty()),
            source_zone_id: dto.source.zone_id,
            destination_zone_id: dto.destination.zone_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZoneDto {
    #[serde(rename = "_id")]
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FeatureDto {
    feature: String,
}

/// Username and password for session logins.
struct Credentials {
    username: String,
    password: SecureString,
}

/// HTTP client for a UniFi OS console
pub struct UnifiClient {
    client: Client,
    host: String,
    site: String,
    api_key: Option<SecureString>,
    /// Set when authenticating by session instead of API key
    credentials: Option<Credentials>,
    csrf_token: RwLock<Option<String>>,
}

impl UnifiClient {
    /// Build the client and authenticate.
    ///
    /// With an API key every request carries `X-API-KEY`; otherwise a
    /// session is opened with username and password.
    pub async fn connect(config: &UnifiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("cs-unifi-bouncer/{}", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()
            .context("Failed to create HTTP client")?;

        let api_key = (!config.api_key.is_empty()).then(|| config.api_key.clone());
        let credentials = api_key.is_none().then(|| Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
        });

        let unifi = Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            site: config.site.clone(),
            api_key,
            credentials,
            csrf_token: RwLock::new(None),
        };

        if let Some(credentials) = &unifi.credentials {
            unifi.login(credentials).await?;
        }

        Ok(unifi)
    }

    async fn login(&self, credentials: &Credentials) -> Result<()> {
        info!("Logging in to {} as {}", self.host, credentials.username);
        let response = self
            .client
            .post(format!("{}/api/auth/login", self.host))
            .json(&json!({
                "username": credentials.username,
                "password": credentials.password.as_str(),
                "remember": true,
            }))
            .send()
            .await
            .context("Login request failed")?;

        if !response.status().is_success() {
            bail!("Login rejected: HTTP {}", response.status());
        }

        self.remember_csrf(response.headers(), CSRF_HEADER);
        Ok(())
    }

    fn remember_csrf(&self, headers: &HeaderMap, name: &str) {
        if let Some(token) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if let Ok(mut guard) = self.csrf_token.write() {
                *guard = Some(token.to_string());
            }
        }
    }

    fn legacy_url(&self, path: &str) -> String {
        format!("{}/proxy/network/api/s/{}/{}", self.host, self.site, path)
    }

    fn v2_url(&self, path: &str) -> String {
        format!(
            "{}/proxy/network/v2/api/site/{}/{}",
            self.host, self.site, path
        )
    }

    /// Send a request and fail on non-success status codes.
    ///
    /// An expired session (HTTP 401) triggers one new login and one resend.
    async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        let mut response = self.send(method.clone(), url, body).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(credentials) = &self.credentials {
                info!("Session expired, logging in again");
                self.login(credentials).await?;
                response = self.send(method.clone(), url, body).await?;
            }
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("{} {} returned HTTP {}: {}", method, url, status, text.trim());
        }
        Ok(response)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key.as_str());
        }
        let csrf = self.csrf_token.read().ok().and_then(|guard| guard.clone());
        if let Some(token) = csrf {
            request = request.header(CSRF_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;

        self.remember_csrf(response.headers(), UPDATED_CSRF_HEADER);
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.request(method.clone(), url, body).await?;
        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {} {}", method, url))
    }

    /// Call a legacy endpoint and unwrap its `{meta, data}` envelope.
    async fn legacy<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Vec<T>> {
        let url = self.legacy_url(path);
        let envelope: Envelope<T> = self.json(method, &url, body).await?;
        if envelope.meta.rc != "ok" {
            bail!(
                "{} rejected: {}",
                path,
                envelope.meta.msg.unwrap_or(envelope.meta.rc)
            );
        }
        Ok(envelope.data)
    }

    async fn legacy_one<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<T> {
        self.legacy(method, path, Some(body))
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("{} returned no object", path))
    }
}

fn group_body(spec: &GroupSpec) -> Value {
    let group_type = match spec.family {
        AddressFamily::V4 => "address-group",
        AddressFamily::V6 => "ipv6-address-group",
    };
    json!({
        "name": spec.name,
        "group_type": group_type,
        "group_members": spec.members,
    })
}

fn rule_body(spec: &RuleSpec) -> Value {
    let (ruleset, network_type) = match spec.family {
        AddressFamily::V4 => ("WAN_IN", "NETv4"),
        AddressFamily::V6 => ("WANv6_IN", "NETv6"),
    };
    json!({
        "name": spec.name,
        "enabled": true,
        "action": "drop",
        "ruleset": ruleset,
        "rule_index": spec.rule_index,
        "protocol": "all",
        "protocol_v6": "all",
        "protocol_match_excepted": false,
        "logging": spec.logging,
        "state_established": false,
        "state_invalid": false,
        "state_new": false,
        "state_related": false,
        "ipsec": "",
        "src_firewallgroup_ids": [spec.group_id],
        "src_networkconf_type": network_type,
        "dst_firewallgroup_ids": [],
        "dst_networkconf_type": network_type,
        "setting_preference": "auto",
    })
}

fn policy_body(spec: &ZonePolicySpec) -> Value {
    let ip_version = match spec.family {
        AddressFamily::V4 => "IPV4",
        AddressFamily::V6 => "IPV6",
    };
    json!({
        "name": spec.name,
        "enabled": true,
        "action": "BLOCK",
        "ip_version": ip_version,
        "protocol": "all",
        "logging": spec.logging,
        "create_allow_respond": false,
        "connection_state_type": "ALL",
        "connection_states": [],
        "match_ip_sec": false,
        "schedule": { "mode": "ALWAYS" },
        "source": {
            "zone_id": spec.source_zone_id,
            "matching_target": "IP",
            "matching_target_type": "OBJECT",
            "ip_group_id": spec.group_id,
            "port_matching_type": "ANY",
            "match_opposite_ips": false,
            "match_opposite_ports": false,
        },
        "destination": {
            "zone_id": spec.destination_zone_id,
            "matching_target": "ANY",
            "port_matching_type": "ANY",
            "match_opposite_ips": false,
            "match_opposite_ports": false,
        },
    })
}

#[async_trait]
impl FirewallController for UnifiClient {
    async fn is_zone_mode_enabled(&self) -> Result<bool> {
        let url = self.v2_url("site-feature-migration");
        let features: Vec<FeatureDto> = self.json(Method::GET, &url, None).await?;
        Ok(features.iter().any(|f| f.feature == ZONE_FEATURE))
    }

    async fn list_groups(&self) -> Result<Vec<RemoteGroup>> {
        let groups: Vec<GroupDto> = self
            .legacy(Method::GET, "rest/firewallgroup", None)
            .await?;
        Ok(groups.into_iter().map(RemoteGroup::from).collect())
    }

    async fn create_group(&self, spec: &GroupSpec) -> Result<RemoteGroup> {
        let group: GroupDto = self
            .legacy_one(Method::POST, "rest/firewallgroup", &group_body(spec))
            .await?;
        Ok(group.into())
    }

    async fn update_group(&self, id: &str, spec: &GroupSpec) -> Result<RemoteGroup> {
        let mut body = group_body(spec);
        body["_id"] = json!(id);
        let group: GroupDto = self
            .legacy_one(Method::PUT, &format!("rest/firewallgroup/{}", id), &body)
            .await?;
        Ok(group.into())
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        self.legacy::<Value>(Method::DELETE, &format!("rest/firewallgroup/{}", id), None)
            .await?;
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<RemoteRule>> {
        let rules: Vec<RuleDto> = self.legacy(Method::GET, "rest/firewallrule", None).await?;
        Ok(rules.into_iter().map(RemoteRule::from).collect())
    }

    async fn create_rule(&self, spec: &RuleSpec) -> Result<RemoteRule> {
        let rule: RuleDto = self
            .legacy_one(Method::POST, "rest/firewallrule", &rule_body(spec))
            .await?;
        Ok(rule.into())
    }

    async fn update_rule(&self, id: &str, spec: &RuleSpec) -> Result<RemoteRule> {
        let mut body = rule_body(spec);
        body["_id"] = json!(id);
        let rule: RuleDto = self
            .legacy_one(Method::PUT, &format!("rest/firewallrule/{}", id), &body)
            .await?;
        Ok(rule.into())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        self.legacy::<Value>(Method::DELETE, &format!("rest/firewallrule/{}", id), None)
            .await?;
        Ok(())
    }

    async fn list_zone_policies(&self) -> Result<Vec<RemoteZonePolicy>> {
        let url = self.v2_url("firewall-policies");
        let policies: Vec<PolicyDto> = self.json(Method::GET, &url, None).await?;
        Ok(policies.into_iter().map(RemoteZonePolicy::from).collect())
    }

    async fn create_zone_policy(&self, spec: &ZonePolicySpec) -> Result<RemoteZonePolicy> {
        let url = self.v2_url("firewall-policies");
        let policy: PolicyDto = self
            .json(Method::POST, &url, Some(&policy_body(spec)))
            .await?;
        Ok(policy.into())
    }

    async fn update_zone_policy(
        &self,
        id: &str,
        spec: &ZonePolicySpec,
    ) -> Result<RemoteZonePolicy> {
        let url = self.v2_url(&format!("firewall-policies/{}", id));
        let mut body = policy_body(spec);
        body["_id"] = json!(id);
        let policy: PolicyDto = self.json(Method::PUT, &url, Some(&body)).await?;
        Ok(policy.into())
    }

    async fn delete_zone_policy(&self, id: &str) -> Result<()> {
        let url = self.v2_url("firewall-policies/batch-delete");
        self.request(Method::POST, &url, Some(&json!([id]))).await?;
        Ok(())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let url = self.v2_url("firewall/zone");
        let zones: Vec<ZoneDto> = self.json(Method::GET, &url, None).await?;
        Ok(zones
            .into_iter()
            .map(|z| Zone {
                id: z.id,
                name: z.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            headers,
            body.len(),
            body
        )
    }

    /// Answer one connection per canned response and return the raw requests.
    async fn serve(listener: TcpListener, responses: Vec<String>) -> Vec<String> {
        let mut requests = Vec::new();
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length: "))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(canned.as_bytes()).await.unwrap();
            requests.push(String::from_utf8_lossy(&request).into_owned());
        }
        requests
    }

    fn session_config(host: String) -> UnifiConfig {
        UnifiConfig {
            host,
            username: "bouncer".to_string(),
            password: SecureString::from("hunter2"),
            ..UnifiConfig::default()
        }
    }

    const GROUPS: &str = r#"{"meta":{"rc":"ok"},"data":[{"_id":"g1","name":"cs-unifi-bouncer-ipv4-0","group_members":["192.0.2.1"]}]}"#;

    #[tokio::test]
    async fn test_expired_session_logs_in_again() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve(
            listener,
            vec![
                response("200 OK", "x-csrf-token: first\r\n", "{}"),
                response("401 Unauthorized", "", ""),
                response("200 OK", "x-csrf-token: second\r\n", "{}"),
                response("200 OK", "", GROUPS),
            ],
        ));

        let client = UnifiClient::connect(&session_config(host)).await.unwrap();
        let groups = client.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "g1");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/auth/login "));
        assert!(requests[1].starts_with("GET /proxy/network/api/s/default/rest/firewallgroup "));
        assert!(requests[2].starts_with("POST /api/auth/login "));
        assert!(requests[3].to_ascii_lowercase().contains("x-csrf-token: second"));
    }

    #[tokio::test]
    async fn test_api_key_does_not_log_in_on_401() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve(listener, vec![response("401 Unauthorized", "", "")]));

        let config = UnifiConfig {
            host,
            api_key: SecureString::from("key"),
            ..UnifiConfig::default()
        };
        let client = UnifiClient::connect(&config).await.unwrap();
        let err = client.list_groups().await.unwrap_err();
        assert!(err.to_string().contains("401"));

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].to_ascii_lowercase().contains("x-api-key: key"));
    }

    #[test]
    fn test_group_body_family_type() {
        let spec = GroupSpec {
            name: "cs-unifi-bouncer-ipv6-0".to_string(),
            family: AddressFamily::V6,
            members: vec!["2001:db8::1".to_string()],
        };
        let body = group_body(&spec);
        assert_eq!(body["group_type"], "ipv6-address-group");
        assert_eq!(body["group_members"][0], "2001:db8::1");
    }

    #[test]
    fn test_rule_body_references_group() {
        let spec = RuleSpec {
            name: "cs-unifi-bouncer-ipv4-2".to_string(),
            family: AddressFamily::V4,
            rule_index: 22002,
            group_id: "g1".to_string(),
            logging: true,
        };
        let body = rule_body(&spec);
        assert_eq!(body["ruleset"], "WAN_IN");
        assert_eq!(body["rule_index"], 22002);
        assert_eq!(body["action"], "drop");
        assert_eq!(body["src_firewallgroup_ids"][0], "g1");
        assert_eq!(body["logging"], true);
    }

    #[test]
    fn test_policy_body_zones() {
        let spec = ZonePolicySpec {
            name: "cs-unifi-bouncer-ipv4-External->Internal-0".to_string(),
            family: AddressFamily::V4,
            group_id: "g1".to_string(),
            source_zone_id: "z-ext".to_string(),
            destination_zone_id: "z-int".to_string(),
            logging: false,
        };
        let body = policy_body(&spec);
        assert_eq!(body["action"], "BLOCK");
        assert_eq!(body["ip_version"], "IPV4");
        assert_eq!(body["source"]["zone_id"], "z-ext");
        assert_eq!(body["source"]["ip_group_id"], "g1");
        assert_eq!(body["destination"]["zone_id"], "z-int");
    }

    #[test]
    fn test_parse_group_envelope() {
        let json = r#"{"meta":{"rc":"ok"},"data":[
            {"_id":"abc","name":"cs-unifi-bouncer-ipv4-0","group_type":"address-group",
             "group_members":["192.0.2.1","192.0.2.2"],"site_id":"s"}
        ]}"#;
        let envelope: Envelope<GroupDto> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.meta.rc, "ok");
        let group = RemoteGroup::from(envelope.data.into_iter().next().unwrap());
        assert_eq!(group.id, "abc");
        assert_eq!(group.members.len(), 2);
    }

    #[test]
    fn test_parse_error_envelope() {
        let json = r#"{"meta":{"rc":"error","msg":"api.err.Invalid"}}"#;
        let envelope: Envelope<GroupDto> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.meta.msg.as_deref(), Some("api.err.Invalid"));
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn test_rule_without_groups() {
        let json = r#"{"_id":"r1","name":"cs-unifi-bouncer-ipv4-0"}"#;
        let rule = RemoteRule::from(serde_json::from_str::<RuleDto>(json).unwrap());
        assert!(rule.group_id.is_none());
    }

    #[test]
    fn test_parse_policy() {
        let json = r#"{"_id":"p1","name":"cs-unifi-bouncer-ipv6-External->Vpn-0",
            "source":{"zone_id":"z1","ip_group_id":"g9","matching_target":"IP"},
            "destination":{"zone_id":"z2","matching_target":"ANY"}}"#;
        let policy = RemoteZonePolicy::from(serde_json::from_str::<PolicyDto>(json).unwrap());
        assert_eq!(policy.group_id.as_deref(), Some("g9"));
        assert_eq!(policy.source_zone_id, "z1");
        assert_eq!(policy.destination_zone_id, "z2");
    }
}
