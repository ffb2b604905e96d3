//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode; the integration test suite
//! carries its own copies.

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use crate::core::conntrack::{ConntrackBackend, ConntrackFilter};
use crate::core::driver::ApplyEntry;
use crate::core::error::Result;
use crate::core::model::{
    Action, FirewallGroupView, FirewallRule, IpVersion, PortRange, Protocol,
};
use crate::core::table::MemoryTable;
use crate::core::targets::{FilterContext, RouterContext};

/// Creates a TCP rule with an optional destination port.
pub fn tcp_rule(name: &str, action: Action, dport: Option<u16>) -> FirewallRule {
    FirewallRule {
        id: Uuid::new_v4(),
        name: name.to_string(),
        enabled: true,
        action,
        protocol: Some(Protocol::Tcp),
        ip_version: IpVersion::V4,
        source: None,
        destination: None,
        source_port: None,
        destination_port: dport.map(PortRange::single),
    }
}

/// Creates a driver-facing group view with the given rule lists.
pub fn group_view(
    admin_state_up: bool,
    ingress_rules: Vec<FirewallRule>,
    egress_rules: Vec<FirewallRule>,
) -> FirewallGroupView {
    FirewallGroupView {
        id: Uuid::new_v4(),
        admin_state_up,
        ingress_rules,
        egress_rules,
    }
}

/// Creates an apply entry for a non-distributed router with in-memory
/// tables and `port_count` attached ports.
pub fn legacy_entry(namespace: &str, port_count: usize) -> ApplyEntry<MemoryTable> {
    let tables = FilterContext::new(namespace, MemoryTable::new(), MemoryTable::new());
    ApplyEntry {
        router: RouterContext::legacy(Uuid::new_v4(), tables),
        ports: (0..port_count).map(|_| Uuid::new_v4()).collect(),
    }
}

/// Conntrack backend that records every flush instead of executing it.
///
/// Clones share the same recording, so a test can keep a handle while the
/// driver owns the backend.
#[derive(Debug, Default, Clone)]
pub struct RecordingConntrack {
    flushes: Rc<RefCell<Vec<(String, Option<ConntrackFilter>)>>>,
}

impl RecordingConntrack {
    pub fn flushes(&self) -> Vec<(String, Option<ConntrackFilter>)> {
        self.flushes.borrow().clone()
    }

    pub fn clear(&self) {
        self.flushes.borrow_mut().clear();
    }
}

impl ConntrackBackend for RecordingConntrack {
    fn flush(&mut self, namespace: &str, filter: Option<&ConntrackFilter>) -> Result<()> {
        self.flushes
            .borrow_mut()
            .push((namespace.to_string(), filter.cloned()));
        Ok(())
    }
}
