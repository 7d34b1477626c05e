//! Daemon configuration synthesis
//!
//! [`ConfigParams::build`] produces the complete configuration document for
//! one host: the reality inbound on 443, a loopback-only stats inbound so
//! traffic counters stay reachable after provisioning, and the routing
//! rules tying them together. Synthesis is pure; the client list is
//! regenerated from the identity slice on every call, in input order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{INBOUND_PORT, STATS_SERVER};

/// Flow tag every issued credential uses.
pub const CLIENT_FLOW: &str = "xtls-rprx-vision";

/// Tag of the reality inbound; the control API addresses users through it.
pub const REALITY_INBOUND_TAG: &str = "reality-in";

/// Tag of the loopback stats inbound.
pub const API_INBOUND_TAG: &str = "api-in";

/// Tag of the grpc API handler that stats-inbound traffic routes to.
pub const API_OUTBOUND_TAG: &str = "api";

/// A credential authorized to use the reality inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub id: Uuid,
    pub email: String,
}

impl ClientIdentity {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

/// Inputs to configuration synthesis.
#[derive(Debug, Clone)]
pub struct ConfigParams<'a> {
    pub mask_domain: &'a str,
    pub private_key: &'a str,
    pub clients: &'a [ClientIdentity],
}

impl ConfigParams<'_> {
    /// Synthesize the full configuration document.
    pub fn build(&self) -> ProxyConfig {
        let stats_port = STATS_SERVER
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8081);

        ProxyConfig {
            log: LogConfig {
                loglevel: "info".to_string(),
            },
            api: ApiConfig {
                tag: API_OUTBOUND_TAG.to_string(),
                services: vec!["HandlerService".to_string(), "StatsService".to_string()],
            },
            stats: StatsConfig {},
            policy: PolicyConfig {
                levels: PolicyLevels {
                    zero: LevelPolicy {
                        stats_user_uplink: true,
                        stats_user_downlink: true,
                    },
                },
            },
            inbounds: vec![
                Inbound {
                    listen: "0.0.0.0".to_string(),
                    port: INBOUND_PORT,
                    protocol: "vless".to_string(),
                    tag: REALITY_INBOUND_TAG.to_string(),
                    settings: InboundSettings {
                        clients: Some(self.clients.iter().map(ClientEntry::from).collect()),
                        decryption: Some("none".to_string()),
                        address: None,
                    },
                    stream_settings: Some(StreamSettings {
                        network: "tcp".to_string(),
                        security: "reality".to_string(),
                        reality_settings: RealitySettings {
                            show: false,
                            dest: format!("{}:443", self.mask_domain),
                            xver: 0,
                            server_names: vec![self.mask_domain.to_string()],
                            private_key: self.private_key.to_string(),
                            min_client_ver: String::new(),
                            max_client_ver: String::new(),
                            max_time_diff: 0,
                            short_ids: vec![String::new()],
                        },
                    }),
                    sniffing: Some(Sniffing {
                        enabled: true,
                        dest_override: vec![
                            "http".to_string(),
                            "tls".to_string(),
                            "quic".to_string(),
                        ],
                    }),
                },
                Inbound {
                    listen: "127.0.0.1".to_string(),
                    port: stats_port,
                    protocol: "dokodemo-door".to_string(),
                    tag: API_INBOUND_TAG.to_string(),
                    settings: InboundSettings {
                        clients: None,
                        decryption: None,
                        address: Some("127.0.0.1".to_string()),
                    },
                    stream_settings: None,
                    sniffing: None,
                },
            ],
            outbounds: vec![
                Outbound {
                    protocol: "freedom".to_string(),
                    tag: "direct".to_string(),
                },
                Outbound {
                    protocol: "blackhole".to_string(),
                    tag: "block".to_string(),
                },
            ],
            routing: RoutingConfig {
                domain_strategy: "IPIfNonMatch".to_string(),
                rules: vec![
                    RoutingRule {
                        rule_type: "field".to_string(),
                        inbound_tag: Some(vec![API_INBOUND_TAG.to_string()]),
                        protocol: None,
                        outbound_tag: API_OUTBOUND_TAG.to_string(),
                    },
                    RoutingRule {
                        rule_type: "field".to_string(),
                        inbound_tag: None,
                        protocol: Some("bittorrent".to_string()),
                        outbound_tag: "block".to_string(),
                    },
                ],
            },
        }
    }
}

/// The daemon's full configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub log: LogConfig,
    pub api: ApiConfig,
    pub stats: StatsConfig,
    pub policy: PolicyConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub routing: RoutingConfig,
}

impl ProxyConfig {
    /// Serialize for upload to the remote config path.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub tag: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub levels: PolicyLevels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyLevels {
    #[serde(rename = "0")]
    pub zero: LevelPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPolicy {
    pub stats_user_uplink: bool,
    pub stats_user_downlink: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub listen: String,
    pub port: u16,
    pub protocol: String,
    pub tag: String,
    pub settings: InboundSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Sniffing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<ClientEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decryption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Per-client entry in the reality inbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub id: Uuid,
    pub email: String,
    pub flow: String,
}

impl From<&ClientIdentity> for ClientEntry {
    fn from(identity: &ClientIdentity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            flow: CLIENT_FLOW.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    pub reality_settings: RealitySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    pub show: bool,
    pub dest: String,
    pub xver: u8,
    pub server_names: Vec<String>,
    pub private_key: String,
    pub min_client_ver: String,
    pub max_client_ver: String,
    pub max_time_diff: u32,
    pub short_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    pub enabled: bool,
    pub dest_override: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub protocol: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    pub domain_strategy: String,
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_tag: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub outbound_tag: String,
}
