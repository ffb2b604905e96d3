//! Firewall rule, policy and group data structures
//!
//! This module defines the records the driver consumes: individual match+action
//! rules, the ordered policies that hold them, and the firewall groups that
//! bind an ingress and/or egress policy to a set of router ports.
//!
//! # Rule Structure
//!
//! A [`FirewallRule`] represents a single rule with:
//! - An action (Allow/Deny/Reject)
//! - Optional protocol filtering (TCP, UDP, ICMP, ICMPv6)
//! - An IP version (rules are single-stack; dual-stack policies carry one
//!   rule per version)
//! - Optional source/destination CIDR filtering
//! - Optional source/destination port ranges (TCP/UDP only)
//! - Enable/disable state
//!
//! Ordering is not a rule property: a rule's 1-based position is derived from
//! its place in the owning policy's list and is recomputed on every mutation.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::core::rule_constraints;

/// Maximum number of rules allowed in a single policy
///
/// Limit prevents memory exhaustion from malformed/malicious input.
/// 1000 rules is well beyond typical use cases.
pub const MAX_POLICY_RULES: usize = 1000;

/// Network protocol for firewall rules
///
/// `Copy` trait allows efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Protocol {
    /// Transmission Control Protocol
    #[strum(serialize = "tcp")]
    Tcp,
    /// User Datagram Protocol
    #[strum(serialize = "udp")]
    Udp,
    /// Internet Control Message Protocol (IPv4)
    #[strum(serialize = "icmp")]
    Icmp,
    /// Internet Control Message Protocol version 6
    #[strum(serialize = "icmpv6")]
    Icmpv6,
}

impl Protocol {
    /// Returns the lowercase protocol name as a static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Icmpv6 => "icmpv6",
        }
    }
}

/// Rule action (Allow, Deny, or Reject)
///
/// Controls what happens when a packet matches the rule. Allow maps to an
/// accept verb in the generated chain, Deny to a silent drop, Reject to a
/// drop with an ICMP unreachable response.
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
pub enum Action {
    #[default]
    #[strum(serialize = "allow")]
    Allow,
    #[strum(serialize = "deny")]
    Deny,
    #[strum(serialize = "reject")]
    Reject,
}

impl Action {
    /// Returns the lowercase action name as a static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Reject => "reject",
        }
    }
}

/// IP version a rule applies to
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
pub enum IpVersion {
    #[default]
    #[strum(serialize = "v4")]
    V4,
    #[strum(serialize = "v6")]
    V6,
}

impl IpVersion {
    /// Short tag used in generated chain names
    pub const fn tag(self) -> &'static str {
        match self {
            IpVersion::V4 => "v4",
            IpVersion::V6 => "v6",
        }
    }

    /// Address-family name as understood by conntrack (`-f`)
    pub const fn family(self) -> &'static str {
        match self {
            IpVersion::V4 => "ipv4",
            IpVersion::V6 => "ipv6",
        }
    }

    /// Numeric version (4 or 6)
    pub const fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Traffic direction relative to the protected network
///
/// Ingress is traffic entering the tenant network, egress is traffic leaving
/// it. Each direction of a firewall group carries its own policy and its own
/// generated chains.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Direction {
    #[strum(serialize = "ingress")]
    Ingress,
    #[strum(serialize = "egress")]
    Egress,
}

impl Direction {
    /// Single-letter tag used in generated chain names
    pub const fn tag(self) -> &'static str {
        match self {
            Direction::Ingress => "i",
            Direction::Egress => "o",
        }
    }
}

/// Lifecycle status of a firewall group
///
/// Owned and transitioned by the control plane; the driver treats it as
/// read-only vocabulary.
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
pub enum FirewallStatus {
    #[default]
    #[strum(serialize = "PENDING_CREATE")]
    PendingCreate,
    #[strum(serialize = "PENDING_UPDATE")]
    PendingUpdate,
    #[strum(serialize = "PENDING_DELETE")]
    PendingDelete,
    #[strum(serialize = "ACTIVE")]
    Active,
    #[strum(serialize = "DOWN")]
    Down,
    #[strum(serialize = "INACTIVE")]
    Inactive,
    #[strum(serialize = "ERROR")]
    Error,
}

/// Inclusive port range; a single port is a range with `start == end`
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
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// One match+action predicate, owned by at most one policy at a time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub action: Action,
    /// Protocol filter; `None` matches any protocol
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub ip_version: IpVersion,
    /// Source CIDR filter; must agree with `ip_version`
    #[serde(default)]
    pub source: Option<IpNetwork>,
    /// Destination CIDR filter; must agree with `ip_version`
    #[serde(default)]
    pub destination: Option<IpNetwork>,
    /// Source port filter; only meaningful for TCP/UDP
    #[serde(default)]
    pub source_port: Option<PortRange>,
    /// Destination port filter; only meaningful for TCP/UDP
    #[serde(default)]
    pub destination_port: Option<PortRange>,
}

impl FirewallRule {
    /// Checks the field combinations that cannot be enforced by the type
    /// system: ports without a port-capable protocol, and address literals
    /// whose family disagrees with the rule's IP version.
    pub fn validate(&self) -> Result<()> {
        if (self.source_port.is_some() || self.destination_port.is_some())
            && !rule_constraints::protocol_supports_ports(self.protocol)
        {
            return Err(Error::validation(
                "protocol",
                "port filters require the tcp or udp protocol",
            ));
        }
        if let Some(src) = self.source
            && !rule_constraints::address_matches_version(&src, self.ip_version)
        {
            return Err(Error::validation(
                "source_ip_address",
                format!("address family does not match ip version {}", self.ip_version),
            ));
        }
        if let Some(dst) = self.destination
            && !rule_constraints::address_matches_version(&dst, self.ip_version)
        {
            return Err(Error::validation(
                "destination_ip_address",
                format!("address family does not match ip version {}", self.ip_version),
            ));
        }
        for (field, range) in [
            ("source_port", self.source_port),
            ("destination_port", self.destination_port),
        ] {
            if let Some(range) = range
                && (range.start == 0 || range.start > range.end)
            {
                return Err(Error::validation(field, "malformed port range"));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// An ordered, first-match-wins list of rule ids
///
/// `rule_ids` is the single source of truth for ordering; positions are the
/// 1-based indexes into it. The `audited` flag is cleared by any mutation of
/// the list or of a member rule's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallPolicy {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub rule_ids: Vec<Uuid>,
    #[serde(default)]
    pub audited: bool,
}

impl FirewallPolicy {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rule_ids: Vec::new(),
            audited: false,
        }
    }
}

/// The bindable unit attaching an ingress and/or egress policy to ports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallGroup {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub ingress_policy_id: Option<Uuid>,
    #[serde(default)]
    pub egress_policy_id: Option<Uuid>,
    #[serde(default)]
    pub status: FirewallStatus,
    /// Ports the group is bound to, across all routers
    #[serde(default)]
    pub ports: Vec<Uuid>,
}

/// Driver-facing materialization of a firewall group
///
/// Policies are resolved into their ordered rule lists so the driver works
/// from a self-contained, read-only snapshot per apply call. This is also the
/// shape retained as the "last applied" record used for conntrack diffing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallGroupView {
    pub id: Uuid,
    pub admin_state_up: bool,
    pub ingress_rules: Vec<FirewallRule>,
    pub egress_rules: Vec<FirewallRule>,
}

impl FirewallGroupView {
    /// The ordered rule list for one direction
    pub fn rules(&self, direction: Direction) -> &[FirewallRule] {
        match direction {
            Direction::Ingress => &self.ingress_rules,
            Direction::Egress => &self.egress_rules,
        }
    }
}
