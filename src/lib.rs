//! l3fw - L3 perimeter firewall driver
//!
//! Compiles declarative, ordered firewall policies into packet-filter chains
//! applied across one or more network-namespace-scoped filter contexts, and
//! keeps connection-tracking state consistent as policy changes.
//!
//! # Architecture
//!
//! - [`core::policy`] - Ordered rule lists with anchor-based insertion
//! - [`core::translate`] - Rule translation into filter-rule specifications
//! - [`core::chains`] - Chain-set synthesis per filter context
//! - [`core::targets`] - Apply-target resolution (distributed-router fan-out)
//! - [`core::driver`] - Apply orchestration and snapshot-based diffing
//! - [`core::conntrack`] - Connection-tracking invalidation
//! - [`validators`] - Input validation and parsing
//!
//! # Safety Properties
//!
//! - Chains are always replaced wholesale, never patched, so a target never
//!   exposes a partially-updated rule set
//! - Edits are staged and committed atomically per filter context
//! - Traffic not claimed by any policy chain falls through to a shared
//!   default-deny chain
//! - An administratively-down group forces a fully-closed result regardless
//!   of its policy content

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod core;
pub mod validators;

// Re-export commonly used types
pub use core::driver::{ApplyEntry, FilterTableDriver, FirewallDriver};
pub use core::error::{Error, Result};
pub use core::model::{FirewallGroup, FirewallGroupView, FirewallPolicy, FirewallRule};
pub use core::policy::PolicyStore;
