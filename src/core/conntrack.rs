//! Connection-tracking invalidation
//!
//! Rebuilding chains does not terminate connections the old rule set already
//! admitted: the established/related structural rule keeps them flowing.
//! After a policy change the driver therefore flushes the tracked
//! connections the change could affect.
//!
//! Which entries to flush is computed by diffing the previously applied rule
//! lists against the current ones, independently per direction: rules whose
//! content changed (both the old and new version count), rules that were
//! removed, and rules that were added. A brand-new firewall has no previous
//! state and flushes the whole namespace instead.
//!
//! Flush filters match on protocol, IP version and ports only; address
//! fields are not part of the filter, so entries differing only by address
//! are flushed together. Invalidation is best-effort: failures are logged
//! by the caller and never fail the apply.

use serde::{Deserialize, Serialize};
use std::process::Command;

use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::model::{
    Direction, FirewallGroupView, FirewallRule, IpVersion, PortRange, Protocol,
};

/// Overrides the `ip` executable used for namespace-scoped conntrack
/// invocations. Lets tests point at a mock without touching a real kernel.
pub const IP_COMMAND_ENV: &str = "L3FW_IP_COMMAND";

/// Filter for a conntrack flush.
///
/// Only protocol, IP version and port fields are available as match keys;
/// an empty filter flushes every tracked connection in the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConntrackFilter {
    pub protocol: Option<Protocol>,
    pub ip_version: Option<IpVersion>,
    pub destination_port: Option<PortRange>,
    pub source_port: Option<PortRange>,
}

impl ConntrackFilter {
    /// Derives the flush filter for one rule.
    pub fn from_rule(rule: &FirewallRule) -> Self {
        Self {
            protocol: rule.protocol,
            ip_version: Some(rule.ip_version),
            destination_port: rule.destination_port,
            source_port: rule.source_port,
        }
    }

    /// Renders the conntrack command-line arguments for this filter.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(protocol) = self.protocol {
            args.push("-p".to_string());
            args.push(protocol.as_str().to_string());
        }
        if let Some(version) = self.ip_version {
            args.push("-f".to_string());
            args.push(version.family().to_string());
        }
        if let Some(port) = self.destination_port {
            args.push("--dport".to_string());
            args.push(port.to_string());
        }
        if let Some(port) = self.source_port {
            args.push("--sport".to_string());
            args.push(port.to_string());
        }
        args
    }
}

/// Executes conntrack flushes against a namespace.
///
/// A `None` filter flushes all tracked connections. Implementations must
/// treat a "no matching entries" outcome as success.
pub trait ConntrackBackend {
    fn flush(&mut self, namespace: &str, filter: Option<&ConntrackFilter>) -> Result<()>;
}

/// Backend invoking `ip netns exec <namespace> conntrack -D` as a blocking
/// child process.
#[derive(Debug, Clone, Default)]
pub struct CommandConntrack;

impl ConntrackBackend for CommandConntrack {
    fn flush(&mut self, namespace: &str, filter: Option<&ConntrackFilter>) -> Result<()> {
        let program =
            std::env::var(IP_COMMAND_ENV).unwrap_or_else(|_| "ip".to_string());
        let mut command = Command::new(program);
        command.args(["netns", "exec", namespace, "conntrack", "-D"]);
        if let Some(filter) = filter {
            command.args(filter.args());
        }

        debug!(namespace, ?filter, "flushing conntrack entries");
        let output = command.output()?;
        match output.status.code() {
            // conntrack exits 1 when nothing matched the filter; for an
            // invalidation pass that is a success, not an error.
            Some(0 | 1) => Ok(()),
            code => Err(Error::Command {
                message: format!("conntrack -D failed in namespace {namespace}"),
                stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                exit_code: code,
            }),
        }
    }
}

/// Rules present in both rule sets under the same id but with different
/// content; both the previous and the current version are returned, so both
/// the old and new match keys get flushed.
pub fn changed_rules(
    previous: &FirewallGroupView,
    current: &FirewallGroupView,
) -> Vec<FirewallRule> {
    let mut changed = Vec::new();
    for direction in [Direction::Ingress, Direction::Egress] {
        for previous_rule in previous.rules(direction) {
            for current_rule in current.rules(direction) {
                if previous_rule.id == current_rule.id && previous_rule != current_rule {
                    changed.push(previous_rule.clone());
                    changed.push(current_rule.clone());
                }
            }
        }
    }
    changed
}

/// Rules present previously but absent from the current rule sets,
/// per direction.
pub fn removed_rules(
    previous: &FirewallGroupView,
    current: &FirewallGroupView,
) -> Vec<FirewallRule> {
    let mut removed = Vec::new();
    for direction in [Direction::Ingress, Direction::Egress] {
        let current_ids: Vec<_> = current.rules(direction).iter().map(|rule| rule.id).collect();
        removed.extend(
            previous
                .rules(direction)
                .iter()
                .filter(|rule| !current_ids.contains(&rule.id))
                .cloned(),
        );
    }
    removed
}

/// Rules absent previously but present now: the removal computation with
/// the two rule sets' roles swapped.
pub fn added_rules(previous: &FirewallGroupView, current: &FirewallGroupView) -> Vec<FirewallRule> {
    removed_rules(current, previous)
}

/// The full set of rules whose tracked connections must be invalidated for
/// an update: changed (both versions), added, and removed.
pub fn rules_to_flush(
    previous: &FirewallGroupView,
    current: &FirewallGroupView,
) -> Vec<FirewallRule> {
    let mut rules = changed_rules(previous, current);
    rules.extend(added_rules(previous, current));
    rules.extend(removed_rules(previous, current));
    rules
}
