//! Apply-target resolution for distributed-router topologies
//!
//! A firewall group is enforced in one or more isolated filter contexts
//! (network namespaces), each with its own interface-name convention. For a
//! plain router there is exactly one: the router namespace, matching on
//! internal (`qr-`) interfaces. Distributed routers fan out:
//!
//! - on the agent hosting the SNAT side, the SNAT namespace with `sg-`
//!   interfaces (only if that namespace exists for the router);
//! - wherever floating-ip-backed distributed ports are present, the router
//!   namespace with `rfp-` interfaces.
//!
//! A router therefore resolves to zero, one or two targets, and the same
//! firewall must be synthesized against each of them independently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::model::IpVersion;
use crate::core::table::FilterTable;

/// Operating mode of the agent performing the apply
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
pub enum AgentMode {
    /// Centralized routing; one namespace per router
    #[default]
    #[strum(serialize = "legacy")]
    Legacy,
    /// Distributed routing on a compute node
    #[strum(serialize = "dvr")]
    Dvr,
    /// Distributed routing on the network node hosting the SNAT namespace
    #[strum(serialize = "dvr_snat")]
    DvrSnat,
}

/// Interface-name convention of one apply target
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
pub enum InterfacePrefix {
    /// Router internal interface
    #[strum(serialize = "qr-")]
    Internal,
    /// SNAT-side internal interface
    #[strum(serialize = "sg-")]
    Snat,
    /// Router-to-floating-ip link
    #[strum(serialize = "rfp-")]
    RouterToFip,
}

impl InterfacePrefix {
    pub const fn as_str(self) -> &'static str {
        match self {
            InterfacePrefix::Internal => "qr-",
            InterfacePrefix::Snat => "sg-",
            InterfacePrefix::RouterToFip => "rfp-",
        }
    }
}

/// One isolated filter context: a namespace and its v4/v6 filter tables.
#[derive(Debug, Clone)]
pub struct FilterContext<T> {
    /// Namespace identifier, also the conntrack flush target
    pub namespace: String,
    pub v4: T,
    pub v6: T,
}

impl<T> FilterContext<T> {
    pub fn new(namespace: impl Into<String>, v4: T, v6: T) -> Self {
        Self {
            namespace: namespace.into(),
            v4,
            v6,
        }
    }

    /// The filter table for one IP version.
    pub fn table_mut(&mut self, version: IpVersion) -> &mut T {
        match version {
            IpVersion::V4 => &mut self.v4,
            IpVersion::V6 => &mut self.v6,
        }
    }
}

impl<T: FilterTable> FilterContext<T> {
    /// Commits both address families.
    pub fn commit_now(&mut self) -> Result<()> {
        self.v4.commit_now()?;
        self.v6.commit_now()
    }
}

/// Router-side state an apply operates on.
///
/// Carries the filter contexts the agent holds for the router. The SNAT
/// context only exists on the agent hosting the SNAT namespace.
#[derive(Debug, Clone)]
pub struct RouterContext<T> {
    pub router_id: Uuid,
    pub distributed: bool,
    /// Number of floating-ip-backed distributed ports on this router
    pub dist_fip_count: usize,
    /// The router namespace tables
    pub tables: FilterContext<T>,
    /// The SNAT namespace tables, when hosted here
    pub snat_tables: Option<FilterContext<T>>,
}

impl<T> RouterContext<T> {
    /// A non-distributed router with a single namespace.
    pub fn legacy(router_id: Uuid, tables: FilterContext<T>) -> Self {
        Self {
            router_id,
            distributed: false,
            dist_fip_count: 0,
            tables,
            snat_tables: None,
        }
    }
}

/// One resolved apply target: a filter context plus the interface-name
/// convention used to match traffic there.
pub struct ResolvedTarget<'a, T> {
    pub ctx: &'a mut FilterContext<T>,
    pub if_prefix: InterfacePrefix,
}

/// Enumerates the filter contexts a firewall group must be applied to.
///
/// With distributed routers the relevant namespaces differ depending on
/// which agent is applying (network or compute node). On the network node
/// both the SNAT namespace and a fip-backed router namespace can be in
/// play, so the result is a list and the caller applies to each entry.
pub fn resolve_targets<'a, T>(
    mode: AgentMode,
    router: &'a mut RouterContext<T>,
) -> Vec<ResolvedTarget<'a, T>> {
    if !router.distributed {
        return vec![ResolvedTarget {
            ctx: &mut router.tables,
            if_prefix: InterfacePrefix::Internal,
        }];
    }

    let RouterContext {
        dist_fip_count,
        tables,
        snat_tables,
        ..
    } = router;

    let mut targets = Vec::new();
    if mode == AgentMode::DvrSnat
        && let Some(snat) = snat_tables.as_mut()
    {
        targets.push(ResolvedTarget {
            ctx: snat,
            if_prefix: InterfacePrefix::Snat,
        });
    }
    if *dist_fip_count > 0 {
        targets.push(ResolvedTarget {
            ctx: tables,
            if_prefix: InterfacePrefix::RouterToFip,
        });
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::MemoryTable;

    fn context(namespace: &str) -> FilterContext<MemoryTable> {
        FilterContext::new(namespace, MemoryTable::new(), MemoryTable::new())
    }

    fn distributed_router(
        dist_fip_count: usize,
        snat: Option<FilterContext<MemoryTable>>,
    ) -> RouterContext<MemoryTable> {
        RouterContext {
            router_id: Uuid::new_v4(),
            distributed: true,
            dist_fip_count,
            tables: context("qrouter-ns"),
            snat_tables: snat,
        }
    }

    #[test]
    fn test_legacy_router_single_internal_target() {
        let mut router = RouterContext::legacy(Uuid::new_v4(), context("qrouter-ns"));
        let targets = resolve_targets(AgentMode::Legacy, &mut router);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].if_prefix, InterfacePrefix::Internal);
        assert_eq!(targets[0].ctx.namespace, "qrouter-ns");
    }

    #[test]
    fn test_dvr_snat_with_snat_namespace() {
        let mut router = distributed_router(0, Some(context("snat-ns")));
        let targets = resolve_targets(AgentMode::DvrSnat, &mut router);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].if_prefix, InterfacePrefix::Snat);
        assert_eq!(targets[0].ctx.namespace, "snat-ns");
    }

    #[test]
    fn test_dvr_snat_without_snat_namespace_resolves_nothing() {
        let mut router = distributed_router(0, None);
        let targets = resolve_targets(AgentMode::DvrSnat, &mut router);
        assert!(targets.is_empty());
    }

    #[test]
    fn test_fip_ports_add_router_to_fip_target() {
        let mut router = distributed_router(2, None);
        let targets = resolve_targets(AgentMode::Dvr, &mut router);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].if_prefix, InterfacePrefix::RouterToFip);
    }

    #[test]
    fn test_network_node_can_resolve_both_targets() {
        let mut router = distributed_router(1, Some(context("snat-ns")));
        let targets = resolve_targets(AgentMode::DvrSnat, &mut router);
        let prefixes: Vec<_> = targets.iter().map(|t| t.if_prefix).collect();
        assert_eq!(
            prefixes,
            vec![InterfacePrefix::Snat, InterfacePrefix::RouterToFip]
        );
    }

    #[test]
    fn test_snat_namespace_ignored_outside_dvr_snat_mode() {
        let mut router = distributed_router(0, Some(context("snat-ns")));
        let targets = resolve_targets(AgentMode::Dvr, &mut router);
        assert!(targets.is_empty());
    }
}
