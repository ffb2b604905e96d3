//! Rule translation: semantic rules to filter-rule specifications
//!
//! A [`FilterRule`] is the specification handed to a filter table: a
//! conjunction of optional match conditions plus a terminal verb. User rules
//! are produced by [`translate`]; the connection-tracking structural rules
//! and forwarding jump rules come from the dedicated constructors.
//!
//! Every generated policy chain starts with the same two structural rules,
//! in this fixed order:
//!
//! 1. drop packets whose tracked connection state is invalid
//! 2. accept packets belonging to established or related connections
//!
//! The ordering guarantees return traffic of already-permitted flows is
//! accepted before the user rule list is consulted.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::model::{Action, FirewallRule, PortRange, Protocol};
use crate::core::rule_constraints;

/// Connection-tracking state match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtState {
    Invalid,
    EstablishedRelated,
}

impl CtState {
    const fn as_str(self) -> &'static str {
        match self {
            CtState::Invalid => "INVALID",
            CtState::EstablishedRelated => "ESTABLISHED,RELATED",
        }
    }
}

/// Terminal verb of a filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Accept,
    Drop,
    Reject,
    /// Continue evaluation in the named chain
    Jump(String),
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Accept => write!(f, "ACCEPT"),
            Verb::Drop => write!(f, "DROP"),
            Verb::Reject => write!(f, "REJECT"),
            Verb::Jump(target) => write!(f, "{target}"),
        }
    }
}

/// One rule in a filter chain: optional match conditions combined
/// conjunctively, then a verb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<IpNetwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<IpNetwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<PortRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<PortRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct_state: Option<CtState>,
    pub verb: Verb,
}

impl FilterRule {
    fn bare(verb: Verb) -> Self {
        Self {
            in_interface: None,
            out_interface: None,
            protocol: None,
            source: None,
            destination: None,
            source_port: None,
            destination_port: None,
            ct_state: None,
            verb,
        }
    }

    /// Structural rule: drop packets in an invalid tracked state.
    pub fn drop_invalid() -> Self {
        Self {
            ct_state: Some(CtState::Invalid),
            ..Self::bare(Verb::Drop)
        }
    }

    /// Structural rule: accept established/related return traffic.
    pub fn accept_established() -> Self {
        Self {
            ct_state: Some(CtState::EstablishedRelated),
            ..Self::bare(Verb::Accept)
        }
    }

    /// Unconditional drop, the sole content of the default-deny chain.
    pub fn drop_all() -> Self {
        Self::bare(Verb::Drop)
    }

    /// Jump for traffic entering through `interface`.
    pub fn jump_in(interface: &str, target: &str) -> Self {
        Self {
            in_interface: Some(interface.to_string()),
            ..Self::bare(Verb::Jump(target.to_string()))
        }
    }

    /// Jump for traffic leaving through `interface`.
    pub fn jump_out(interface: &str, target: &str) -> Self {
        Self {
            out_interface: Some(interface.to_string()),
            ..Self::bare(Verb::Jump(target.to_string()))
        }
    }
}

impl fmt::Display for FilterRule {
    /// Renders the canonical text form. The output is deterministic, so
    /// structural equality and text equality agree; chain contents can be
    /// compared either way.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(8);
        if let Some(ref interface) = self.in_interface {
            parts.push(format!("-i {interface}"));
        }
        if let Some(ref interface) = self.out_interface {
            parts.push(format!("-o {interface}"));
        }
        if let Some(protocol) = self.protocol {
            parts.push(format!("-p {protocol}"));
        }
        if let Some(port) = self.destination_port {
            parts.push(format!("--dport {port}"));
        }
        if let Some(port) = self.source_port {
            parts.push(format!("--sport {port}"));
        }
        if let Some(source) = self.source {
            parts.push(format!("-s {source}"));
        }
        if let Some(destination) = self.destination {
            parts.push(format!("-d {destination}"));
        }
        if let Some(state) = self.ct_state {
            parts.push(format!("-m state --state {}", state.as_str()));
        }
        parts.push(format!("-j {}", self.verb));
        write!(f, "{}", parts.join(" "))
    }
}

/// Translates one semantic rule into a filter-rule specification.
///
/// Disabled rules are never translated and yield `None`. Port matchers are
/// emitted only when the protocol is TCP or UDP; every other condition is
/// carried over independently, all combined conjunctively.
pub fn translate(rule: &FirewallRule) -> Option<FilterRule> {
    if !rule.enabled {
        return None;
    }

    let ports_apply = rule_constraints::protocol_supports_ports(rule.protocol);
    let verb = match rule.action {
        Action::Allow => Verb::Accept,
        Action::Deny => Verb::Drop,
        Action::Reject => Verb::Reject,
    };

    Some(FilterRule {
        in_interface: None,
        out_interface: None,
        protocol: rule.protocol,
        source: rule.source,
        destination: rule.destination,
        source_port: if ports_apply { rule.source_port } else { None },
        destination_port: if ports_apply {
            rule.destination_port
        } else {
            None
        },
        ct_state: None,
        verb,
    })
}
