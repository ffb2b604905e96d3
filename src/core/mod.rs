//! Core firewall driver functionality
//!
//! This module contains the types and logic for compiling firewall policies
//! into filter chains and applying them across namespaces. It provides:
//!
//! - [`model`]: Rule, policy and group records, and the driver-facing view
//! - [`policy`]: Ordered rule-list maintenance with anchor-based insertion
//! - [`translate`]: Rule translation into filter-rule specifications
//! - [`table`]: The filter-table capability trait and in-memory staging table
//! - [`chains`]: Chain-set synthesis for one filter context
//! - [`targets`]: Apply-target resolution for distributed routers
//! - [`conntrack`]: Rule diffing and connection-tracking invalidation
//! - [`driver`]: The apply-orchestration driver
//! - [`rule_constraints`]: Business rules for valid field combinations
//! - [`error`]: Error types for driver operations

pub mod chains;
pub mod conntrack;
pub mod driver;
pub mod error;
pub mod model;
pub mod policy;
pub mod rule_constraints;
pub mod table;
pub mod targets;
pub mod translate;

#[cfg(test)]
pub mod test_helpers;
