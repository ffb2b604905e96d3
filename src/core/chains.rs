//! Chain synthesis: firewall groups to filter-chain sets
//!
//! For one firewall group and one filter context, synthesis produces:
//!
//! 1. A shared default-deny chain ([`DEFAULT_POLICY_CHAIN`]) holding a
//!    single unconditional drop.
//! 2. A policy chain per direction and IP version, named from the direction
//!    tag, the version tag and the group id (`iv4<group-id>`), containing
//!    the two connection-tracking structural rules followed by the enabled
//!    rules of the matching direction and version, in policy order.
//! 3. Jump rules in the forwarding chain, per attached port, steering
//!    traffic on the port's interface into the policy chains, plus trailing
//!    catch-all jumps into the default-deny chain.
//!
//! Ingress policy matches traffic *leaving* the internal interface: from the
//! filtering point's perspective, traffic entering the tenant network goes
//! out through the router's internal interface. Egress is the inverse.
//!
//! Installation always replaces wholesale: prior chains (including the
//! default-deny chain) are removed and recreated on every call, never
//! patched, so a partial earlier state can't leak into the result.

use tracing::debug;
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::model::{Direction, FirewallGroupView, IpVersion};
use crate::core::table::{FORWARD_CHAIN, FilterTable};
use crate::core::targets::{FilterContext, InterfacePrefix};
use crate::core::translate::{self, FilterRule};

/// Shared default-deny chain; one per filter context, not per group.
pub const DEFAULT_POLICY_CHAIN: &str = "fw-default-policy";

/// Interface names are truncated to the kernel naming limit; matches use
/// the truncated string exactly.
pub const MAX_INTERFACE_LEN: usize = 14;

const VERSIONS: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];
const DIRECTIONS: [Direction; 2] = [Direction::Ingress, Direction::Egress];

/// Deterministic per-group chain name; distinct across groups, directions
/// and IP versions.
pub fn chain_name(direction: Direction, version: IpVersion, group_id: Uuid) -> String {
    format!("{}{}{}", direction.tag(), version.tag(), group_id)
}

/// Interface name for a port under a target's naming convention, truncated
/// to [`MAX_INTERFACE_LEN`].
pub fn interface_name(prefix: InterfacePrefix, port_id: Uuid) -> String {
    let mut name = format!("{}{}", prefix.as_str(), port_id);
    name.truncate(MAX_INTERFACE_LEN);
    name
}

/// Installs the full chain set for a firewall group: default-deny chain,
/// per-direction policy chains, and forwarding jumps, replacing any prior
/// state for this group.
pub fn install<T: FilterTable>(
    ctx: &mut FilterContext<T>,
    if_prefix: InterfacePrefix,
    firewall: &FirewallGroupView,
    ports: &[Uuid],
) -> Result<()> {
    debug!(
        firewall_group = %firewall.id,
        namespace = %ctx.namespace,
        "installing firewall chains"
    );
    remove_group_chains(ctx, firewall.id);
    remove_default_chains(ctx);
    add_default_policy_chains(ctx)?;
    add_group_chains(ctx, firewall)?;
    add_jump_rules(ctx, if_prefix, firewall.id, ports)
}

/// Installs only the default-deny chain and its forwarding jumps, removing
/// any policy chains for this group. Used when the group is administratively
/// down: traffic on its ports is dropped regardless of policy content.
pub fn install_default_only<T: FilterTable>(
    ctx: &mut FilterContext<T>,
    if_prefix: InterfacePrefix,
    group_id: Uuid,
    ports: &[Uuid],
) -> Result<()> {
    debug!(
        firewall_group = %group_id,
        namespace = %ctx.namespace,
        "installing default-deny policy only"
    );
    remove_group_chains(ctx, group_id);
    remove_default_chains(ctx);
    add_default_policy_chains(ctx)?;
    // The group chains are gone, so only the default-deny jumps attach.
    add_jump_rules(ctx, if_prefix, group_id, ports)
}

/// Removes everything this group contributed to a filter context.
pub fn uninstall<T: FilterTable>(ctx: &mut FilterContext<T>, group_id: Uuid) {
    debug!(
        firewall_group = %group_id,
        namespace = %ctx.namespace,
        "removing firewall chains"
    );
    remove_group_chains(ctx, group_id);
    remove_default_chains(ctx);
}

fn remove_group_chains<T: FilterTable>(ctx: &mut FilterContext<T>, group_id: Uuid) {
    for version in VERSIONS {
        for direction in DIRECTIONS {
            let name = chain_name(direction, version, group_id);
            ctx.table_mut(version).remove_chain(&name);
        }
    }
}

fn remove_default_chains<T: FilterTable>(ctx: &mut FilterContext<T>) {
    for version in VERSIONS {
        ctx.table_mut(version).remove_chain(DEFAULT_POLICY_CHAIN);
    }
}

fn add_default_policy_chains<T: FilterTable>(ctx: &mut FilterContext<T>) -> Result<()> {
    for version in VERSIONS {
        let table = ctx.table_mut(version);
        table.add_chain(DEFAULT_POLICY_CHAIN);
        table.add_rule(DEFAULT_POLICY_CHAIN, FilterRule::drop_all())?;
    }
    Ok(())
}

/// Creates the per-direction policy chains and fills them: the two
/// structural rules first, then the enabled rules of the matching direction
/// and IP version, translated in policy order. Order is first-match-wins
/// and is never resorted.
fn add_group_chains<T: FilterTable>(
    ctx: &mut FilterContext<T>,
    firewall: &FirewallGroupView,
) -> Result<()> {
    for version in VERSIONS {
        for direction in DIRECTIONS {
            let name = chain_name(direction, version, firewall.id);
            let table = ctx.table_mut(version);
            table.add_chain(&name);
            table.add_rule(&name, FilterRule::drop_invalid())?;
            table.add_rule(&name, FilterRule::accept_established())?;
        }
    }

    for direction in DIRECTIONS {
        for rule in firewall.rules(direction) {
            let Some(spec) = translate::translate(rule) else {
                continue;
            };
            let name = chain_name(direction, rule.ip_version, firewall.id);
            ctx.table_mut(rule.ip_version).add_rule(&name, spec)?;
        }
    }
    Ok(())
}

/// Wires the forwarding chain to the policy chains: per port, per version
/// and direction, a jump matched on the port's interface name — then the
/// trailing catch-all jumps into the default-deny chain for traffic no
/// policy chain claimed.
fn add_jump_rules<T: FilterTable>(
    ctx: &mut FilterContext<T>,
    if_prefix: InterfacePrefix,
    group_id: Uuid,
    ports: &[Uuid],
) -> Result<()> {
    for version in VERSIONS {
        for direction in DIRECTIONS {
            let name = chain_name(direction, version, group_id);
            let table = ctx.table_mut(version);
            if !table.has_chain(&name) {
                continue;
            }
            for port in ports {
                let interface = interface_name(if_prefix, *port);
                let jump = match direction {
                    Direction::Ingress => FilterRule::jump_out(&interface, &name),
                    Direction::Egress => FilterRule::jump_in(&interface, &name),
                };
                table.add_rule(FORWARD_CHAIN, jump)?;
            }
        }
    }

    for port in ports {
        let interface = interface_name(if_prefix, *port);
        for version in VERSIONS {
            let table = ctx.table_mut(version);
            table.add_rule(
                FORWARD_CHAIN,
                FilterRule::jump_out(&interface, DEFAULT_POLICY_CHAIN),
            )?;
            table.add_rule(
                FORWARD_CHAIN,
                FilterRule::jump_in(&interface, DEFAULT_POLICY_CHAIN),
            )?;
        }
    }
    Ok(())
}
