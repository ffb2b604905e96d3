//! Firewall driver: apply orchestration
//!
//! The [`FirewallDriver`] trait is the surface the agent calls: create,
//! update and delete of a firewall group, plus the default-deny-only apply
//! used when a group is administratively down. Each operation works over a
//! list of apply entries (a router context plus the group's ports on that
//! router), fans out to the resolved filter contexts, rebuilds chains
//! wholesale per context, commits, and triggers conntrack invalidation.
//!
//! [`FilterTableDriver`] is the chain-based implementation. It keeps one
//! piece of state: the last applied rule view per firewall-group id, used to
//! diff rule sets on update. The store lives in process memory only; after a
//! restart the first update of a group is treated as a fresh create for
//! diffing purposes.
//!
//! Execution is synchronous and runs to completion within the calling
//! context. Callers must serialize operations touching the same router
//! namespace; operations on different targets are independent.
//!
//! Failure semantics: any table or process failure during an apply is
//! logged with the firewall-group id and surfaced as the opaque
//! [`Error::Driver`]. Conntrack invalidation failures are logged and
//! swallowed; stale tracked connections are a best-effort cleanup, not a
//! correctness requirement for the filter state itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use crate::core::chains;
use crate::core::conntrack::{self, ConntrackBackend, ConntrackFilter};
use crate::core::error::{Error, Result};
use crate::core::model::FirewallGroupView;
use crate::core::table::FilterTable;
use crate::core::targets::{AgentMode, RouterContext, resolve_targets};

/// One router the firewall group must be applied on, with the group's ports
/// hosted there.
#[derive(Debug)]
pub struct ApplyEntry<T> {
    pub router: RouterContext<T>,
    pub ports: Vec<Uuid>,
}

/// Driver surface for firewall-group lifecycle operations.
///
/// The complete rule view is delivered on every call and applied atomically
/// per filter context; rules are never patched individually. Alternate
/// packet-filter backends implement this same trait.
pub trait FirewallDriver<T: FilterTable> {
    /// Applies a new firewall group. When the group is administratively
    /// down, only the default-deny policy is installed.
    fn create_firewall_group(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()>;

    /// Replaces a group's chains with the current rule view and invalidates
    /// tracked connections affected by the rule diff.
    fn update_firewall_group(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()>;

    /// Removes everything the group contributed to its filter contexts.
    fn delete_firewall_group(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()>;

    /// Installs the default-deny policy only, dropping all traffic on the
    /// group's ports regardless of policy content.
    fn apply_default_policy(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
struct AppliedState {
    view: FirewallGroupView,
    #[allow(dead_code)] // recorded for operators inspecting driver state
    applied_at: DateTime<Utc>,
}

/// Chain-based firewall driver over [`FilterTable`] contexts.
pub struct FilterTableDriver<C> {
    conntrack: C,
    last_applied: HashMap<Uuid, AppliedState>,
}

impl<C: ConntrackBackend> FilterTableDriver<C> {
    pub fn new(conntrack: C) -> Self {
        Self {
            conntrack,
            last_applied: HashMap::new(),
        }
    }

    /// The last applied rule view for a group, if any.
    pub fn last_applied(&self, group_id: Uuid) -> Option<&FirewallGroupView> {
        self.last_applied.get(&group_id).map(|state| &state.view)
    }

    fn record_applied(&mut self, view: &FirewallGroupView) {
        self.last_applied.insert(
            view.id,
            AppliedState {
                view: view.clone(),
                applied_at: Utc::now(),
            },
        );
    }

    /// Logs the underlying cause with the group id and erases it for the
    /// caller.
    fn funnel(group_id: Uuid, context: &str, source: &Error) -> Error {
        error!(firewall_group = %group_id, error = %source, "{context}");
        Error::Driver {
            firewall_group: group_id,
        }
    }

    fn setup_all<T: FilterTable>(
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()> {
        for entry in apply_list.iter_mut() {
            for target in resolve_targets(mode, &mut entry.router) {
                chains::install(target.ctx, target.if_prefix, firewall, &entry.ports)?;
                // apply the changes immediately (no deferred batching)
                target.ctx.commit_now()?;
            }
        }
        Ok(())
    }

    fn default_only_all<T: FilterTable>(
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        group_id: Uuid,
    ) -> Result<()> {
        for entry in apply_list.iter_mut() {
            for target in resolve_targets(mode, &mut entry.router) {
                chains::install_default_only(target.ctx, target.if_prefix, group_id, &entry.ports)?;
                target.ctx.commit_now()?;
            }
        }
        Ok(())
    }

    fn remove_all<T: FilterTable>(
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        group_id: Uuid,
    ) -> Result<()> {
        for entry in apply_list.iter_mut() {
            for target in resolve_targets(mode, &mut entry.router) {
                chains::uninstall(target.ctx, group_id);
                target.ctx.commit_now()?;
            }
        }
        Ok(())
    }

    /// Flushes without a filter: all tracked connections in every resolved
    /// namespace. Used when there is no previous rule view to diff against.
    fn flush_conntrack_all<T: FilterTable>(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
    ) {
        for entry in apply_list.iter_mut() {
            for target in resolve_targets(mode, &mut entry.router) {
                self.flush_logged(&target.ctx.namespace, None);
            }
        }
    }

    /// Flushes only the entries affected by the rule diff between the
    /// previous and current views.
    fn flush_conntrack_diff<T: FilterTable>(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        previous: &FirewallGroupView,
        current: &FirewallGroupView,
    ) {
        let rules = conntrack::rules_to_flush(previous, current);
        if rules.is_empty() {
            return;
        }
        for entry in apply_list.iter_mut() {
            for target in resolve_targets(mode, &mut entry.router) {
                for rule in &rules {
                    let filter = ConntrackFilter::from_rule(rule);
                    self.flush_logged(&target.ctx.namespace, Some(&filter));
                }
            }
        }
    }

    fn flush_logged(&mut self, namespace: &str, filter: Option<&ConntrackFilter>) {
        if let Err(err) = self.conntrack.flush(namespace, filter) {
            // Best-effort cleanup; never fails the apply.
            error!(namespace, error = %err, "conntrack invalidation failed");
        }
    }
}

impl<T: FilterTable, C: ConntrackBackend> FirewallDriver<T> for FilterTableDriver<C> {
    fn create_firewall_group(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()> {
        debug!(firewall_group = %firewall.id, "creating firewall group");
        if !firewall.admin_state_up {
            return self.apply_default_policy(mode, apply_list, firewall);
        }
        Self::setup_all(mode, apply_list, firewall)
            .map_err(|err| Self::funnel(firewall.id, "failed to create firewall group", &err))?;
        // New firewall: no previous rule view, flush everything tracked.
        self.flush_conntrack_all(mode, apply_list);
        self.record_applied(firewall);
        Ok(())
    }

    fn update_firewall_group(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()> {
        debug!(firewall_group = %firewall.id, "updating firewall group");
        if firewall.admin_state_up {
            match self.last_applied.get(&firewall.id).map(|s| s.view.clone()) {
                Some(previous) => {
                    self.flush_conntrack_diff(mode, apply_list, &previous, firewall);
                }
                None => self.flush_conntrack_all(mode, apply_list),
            }
            Self::setup_all(mode, apply_list, firewall)
                .map_err(|err| Self::funnel(firewall.id, "failed to update firewall group", &err))?;
        } else {
            Self::default_only_all(mode, apply_list, firewall.id).map_err(|err| {
                Self::funnel(firewall.id, "failed to update firewall group", &err)
            })?;
        }
        self.record_applied(firewall);
        Ok(())
    }

    fn delete_firewall_group(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()> {
        debug!(firewall_group = %firewall.id, "deleting firewall group");
        Self::remove_all(mode, apply_list, firewall.id)
            .map_err(|err| Self::funnel(firewall.id, "failed to delete firewall group", &err))?;
        self.last_applied.remove(&firewall.id);
        Ok(())
    }

    fn apply_default_policy(
        &mut self,
        mode: AgentMode,
        apply_list: &mut [ApplyEntry<T>],
        firewall: &FirewallGroupView,
    ) -> Result<()> {
        debug!(firewall_group = %firewall.id, "applying default policy");
        Self::default_only_all(mode, apply_list, firewall.id).map_err(|err| {
            Self::funnel(firewall.id, "failed to apply default policy", &err)
        })
    }
}
