//! Policy record data structures and identity tagging
//!
//! This module defines the desired-state records the manager persists and
//! reconciles against the host facilities:
//!
//! - [`FirewallRule`]: packet-filter rules in the input/forward chains
//! - [`PortForwardRule`]: DNAT port forwards (each expands into a NAT artifact
//!   plus a forward-accept artifact when planned)
//! - [`StaticRoute`]: kernel routing table entries, optionally persisted
//!
//! Every record owns a stable [`IdentityTag`] derived from its primary key.
//! The tag is embedded verbatim as the artifact's comment in the live
//! facility and is the only contract the state parser relies on to correlate
//! live artifacts back to stored records.
//!
//! # Limits
//!
//! Stores are limited to [`MAX_RECORDS`] records per collection to prevent
//! memory exhaustion from malformed policy files.

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum number of records allowed in a single store collection
///
/// Limit prevents memory exhaustion from malformed/malicious policy files.
/// 1000 records is well beyond typical use cases (most gateways have <50).
pub const MAX_RECORDS: usize = 1000;

/// Default firewall rule priority (lower applies first)
pub const DEFAULT_PRIORITY: u32 = 100;

/// Default route metric, matching the facility default the manager was
/// deployed with
pub const DEFAULT_METRIC: u32 = 100;

/// Network protocol for firewall rules
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Transmission Control Protocol
    #[strum(serialize = "tcp")]
    Tcp,
    /// User Datagram Protocol
    #[strum(serialize = "udp")]
    Udp,
    /// Internet Control Message Protocol
    #[strum(serialize = "icmp")]
    Icmp,
    /// Match all protocols
    #[strum(serialize = "all")]
    All,
}

impl Protocol {
    /// Returns lowercase protocol name as a static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "all",
        }
    }

    /// Returns `true` if the protocol supports destination-port filtering.
    ///
    /// Only TCP and UDP use ports; ICMP and "all" rules must not carry them.
    pub const fn supports_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

/// Transport protocol for port forwards (DNAT requires a port, so only
/// TCP/UDP are representable)
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum ForwardProtocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
}

impl ForwardProtocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            ForwardProtocol::Tcp => "tcp",
            ForwardProtocol::Udp => "udp",
        }
    }
}

/// Rule action (Accept, Drop, or Reject)
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Accept the packet (allow it through)
    #[default]
    #[strum(serialize = "accept")]
    Accept,
    /// Drop the packet silently (no response sent)
    #[strum(serialize = "drop")]
    Drop,
    /// Reject the packet and send ICMP unreachable response
    #[strum(serialize = "reject")]
    Reject,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Drop => "drop",
            Action::Reject => "reject",
        }
    }
}

/// Filter chain a firewall rule attaches to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Traffic addressed to this host
    #[default]
    #[strum(serialize = "input")]
    Input,
    /// Traffic routed through this host
    #[strum(serialize = "forward")]
    Forward,
}

impl Chain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Chain::Input => "input",
            Chain::Forward => "forward",
        }
    }
}

/// Inclusive destination port range; a single port is `start == end`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_port =
            |p: &str| p.parse::<u16>().map_err(|_| format!("invalid port: {p}"));
        match s.split_once('-') {
            Some((start, end)) => Ok(Self {
                start: parse_port(start)?,
                end: parse_port(end)?,
            }),
            None => {
                let port = parse_port(s)?;
                Ok(Self::single(port))
            }
        }
    }
}

/// Lifecycle state of a policy record.
///
/// `Draft → Validated → Applying → {Active, Failed}`,
/// `Active → Removing → Removed`. `Failed` is recoverable only by re-editing
/// and re-validating; there is no automatic transition out of it.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    #[default]
    #[strum(serialize = "draft")]
    Draft,
    #[strum(serialize = "validated")]
    Validated,
    #[strum(serialize = "applying")]
    Applying,
    #[strum(serialize = "active")]
    Active,
    #[strum(serialize = "failed")]
    Failed,
    #[strum(serialize = "removing")]
    Removing,
    #[strum(serialize = "removed")]
    Removed,
}

/// Stable identity label embedded in every artifact the manager creates.
///
/// Rendered as `<record-type>:<record-id>` (e.g.
/// `firewallrule:9f8d9a1c-...`), carried in the facility's comment field, and
/// parsed back out of live dumps to attribute artifacts to stored records.
/// Artifacts whose comment does not parse as a tag are surfaced as unmanaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum IdentityTag {
    FirewallRule(Uuid),
    PortForward(Uuid),
    StaticRoute(Uuid),
    /// The single source-NAT masquerade artifact owned by system settings
    Masquerade,
    /// The IP-forwarding sysctl pair owned by system settings
    Forwarding,
}

impl fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityTag::FirewallRule(id) => write!(f, "firewallrule:{id}"),
            IdentityTag::PortForward(id) => write!(f, "portforward:{id}"),
            IdentityTag::StaticRoute(id) => write!(f, "staticroute:{id}"),
            IdentityTag::Masquerade => write!(f, "system:masquerade"),
            IdentityTag::Forwarding => write!(f, "system:forwarding"),
        }
    }
}

impl FromStr for IdentityTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("not an identity tag: {s}"))?;
        match kind {
            "system" if rest == "masquerade" => Ok(IdentityTag::Masquerade),
            "system" if rest == "forwarding" => Ok(IdentityTag::Forwarding),
            "firewallrule" | "portforward" | "staticroute" => {
                let id = Uuid::parse_str(rest)
                    .map_err(|e| format!("invalid record id in tag {s}: {e}"))?;
                Ok(match kind {
                    "firewallrule" => IdentityTag::FirewallRule(id),
                    "portforward" => IdentityTag::PortForward(id),
                    _ => IdentityTag::StaticRoute(id),
                })
            }
            _ => Err(format!("unknown record type in tag: {s}")),
        }
    }
}

impl From<IdentityTag> for String {
    fn from(tag: IdentityTag) -> Self {
        tag.to_string()
    }
}

impl TryFrom<String> for IdentityTag {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Packet-filter rule in the managed table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirewallRule {
    pub id: Uuid,
    /// Display name (sanitized, not the facility comment - that is the tag)
    pub name: String,
    pub protocol: Protocol,
    /// Source address or network; `None` matches any source
    pub source: Option<IpNetwork>,
    /// Destination port or range; required iff protocol is TCP or UDP
    pub ports: Option<PortRange>,
    pub action: Action,
    #[serde(default)]
    pub chain: Chain,
    /// Lower priority applies first; ties broken by creation order
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub owner: String,
    #[serde(default)]
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FirewallRule {
    /// Creates an enabled draft rule owned by `owner` with defaults for
    /// priority and chain.
    pub fn new(name: impl Into<String>, protocol: Protocol, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            protocol,
            source: None,
            ports: None,
            action: Action::Accept,
            chain: Chain::Input,
            priority: DEFAULT_PRIORITY,
            enabled: true,
            owner: owner.into(),
            state: RecordState::Draft,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn tag(&self) -> IdentityTag {
        IdentityTag::FirewallRule(self.id)
    }
}

/// Port-forward (DNAT) rule.
///
/// Plans always expand this into two artifacts: a destination-NAT rewrite in
/// the NAT prerouting stage and a matching accept in the forward stage. The
/// pair shares this record's tag and is applied/removed together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortForwardRule {
    pub id: Uuid,
    pub name: String,
    pub external_port: u16,
    pub protocol: ForwardProtocol,
    pub internal_host: IpAddr,
    pub internal_port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub owner: String,
    #[serde(default)]
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl PortForwardRule {
    pub fn new(
        name: impl Into<String>,
        external_port: u16,
        protocol: ForwardProtocol,
        internal_host: IpAddr,
        internal_port: u16,
        owner: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            external_port,
            protocol,
            internal_host,
            internal_port,
            enabled: true,
            owner: owner.into(),
            state: RecordState::Draft,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn tag(&self) -> IdentityTag {
        IdentityTag::PortForward(self.id)
    }
}

/// Static routing table entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticRoute {
    pub id: Uuid,
    pub name: String,
    pub destination: IpNetwork,
    /// Next hop; `None` for interface-direct routes
    pub gateway: Option<IpAddr>,
    pub interface: String,
    #[serde(default = "default_metric")]
    pub metric: u32,
    /// Also write a persist artifact so the route survives a reboot
    #[serde(default)]
    pub persistent: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub owner: String,
    #[serde(default)]
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl StaticRoute {
    pub fn new(
        name: impl Into<String>,
        destination: IpNetwork,
        gateway: Option<IpAddr>,
        interface: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            destination,
            gateway,
            interface: interface.into(),
            metric: DEFAULT_METRIC,
            persistent: false,
            enabled: true,
            owner: owner.into(),
            state: RecordState::Draft,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn tag(&self) -> IdentityTag {
        IdentityTag::StaticRoute(self.id)
    }
}

/// Host-level router settings owned by the manager (recovered from the
/// original deployment: IP forwarding sysctls and the egress masquerade rule)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemSettings {
    #[serde(default)]
    pub ipv4_forwarding: bool,
    #[serde(default)]
    pub ipv6_forwarding: bool,
    #[serde(default)]
    pub nat_enabled: bool,
    /// Egress interface for the masquerade rule (e.g. the WAN uplink)
    #[serde(default)]
    pub nat_interface: String,
}

/// The complete desired state the policy store persists
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyState {
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
    #[serde(default)]
    pub port_forwards: Vec<PortForwardRule>,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
    #[serde(default)]
    pub system: SystemSettings,
}

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled firewall rules in apply order: ascending priority, then
    /// creation order for ties. The facility evaluates top-to-bottom and
    /// first-match-wins for terminating actions, so this order is load-bearing.
    pub fn ordered_firewall_rules(&self) -> Vec<&FirewallRule> {
        let mut rules: Vec<&FirewallRule> =
            self.firewall_rules.iter().filter(|r| r.enabled).collect();
        rules.sort_by_key(|r| (r.priority, r.created_at));
        rules
    }

    /// Looks up any record by its identity tag.
    pub fn find_tag(&self, tag: IdentityTag) -> bool {
        match tag {
            IdentityTag::FirewallRule(id) => self.firewall_rules.iter().any(|r| r.id == id),
            IdentityTag::PortForward(id) => self.port_forwards.iter().any(|r| r.id == id),
            IdentityTag::StaticRoute(id) => self.static_routes.iter().any(|r| r.id == id),
            IdentityTag::Masquerade => self.system.nat_enabled,
            IdentityTag::Forwarding => {
                self.system.ipv4_forwarding || self.system.ipv6_forwarding
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

fn default_metric() -> u32 {
    DEFAULT_METRIC
}
