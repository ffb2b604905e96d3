//! Filter-table capability boundary
//!
//! The driver never talks to a packet filter directly; it edits chains
//! through the [`FilterTable`] trait and makes the edits effective with
//! [`FilterTable::commit_now`]. Real backends (an iptables-save/restore
//! wrapper, an nftables JSON feed) implement the same trait; the crate ships
//! [`MemoryTable`], a staging table that buffers edits in memory and keeps a
//! separate copy of the last committed state.
//!
//! Edits are cheap local mutations; nothing is observable until commit. This
//! is what lets the driver tear chains down and rebuild them wholesale
//! without the target ever passing through a more-permissive intermediate
//! state.

use std::collections::BTreeMap;

use crate::core::error::{Error, Result};
use crate::core::translate::{FilterRule, Verb};

/// One network filter table (one address family in one namespace).
pub trait FilterTable {
    /// Adds an empty chain. Adding an existing chain is a no-op.
    fn add_chain(&mut self, name: &str);

    /// Appends a rule to a chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lookup`] if the chain does not exist.
    fn add_rule(&mut self, chain: &str, rule: FilterRule) -> Result<()>;

    /// Removes a chain, its rules, and every jump rule in other chains that
    /// targets it. Removing a missing chain is a no-op.
    fn remove_chain(&mut self, name: &str);

    /// Names of all chains currently present (pending state).
    fn chain_names(&self) -> Vec<String>;

    /// Returns whether a chain is currently present.
    fn has_chain(&self, name: &str) -> bool {
        self.chain_names().iter().any(|chain| chain == name)
    }

    /// Makes all pending edits effective immediately.
    fn commit_now(&mut self) -> Result<()>;
}

/// In-memory staging filter table.
///
/// Pending edits live in `pending`; `commit_now` publishes them to
/// `applied`, which models the state the kernel would be enforcing. The
/// forwarding chain exists from the start, like a real filter table's
/// builtin chains.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pending: BTreeMap<String, Vec<FilterRule>>,
    applied: BTreeMap<String, Vec<FilterRule>>,
    commits: usize,
}

/// Builtin forwarding chain present in every filter table.
pub const FORWARD_CHAIN: &str = "FORWARD";

impl MemoryTable {
    pub fn new() -> Self {
        let mut builtin = BTreeMap::new();
        builtin.insert(FORWARD_CHAIN.to_string(), Vec::new());
        Self {
            applied: builtin.clone(),
            pending: builtin,
            commits: 0,
        }
    }

    /// The committed rules of a chain, if the chain exists.
    pub fn applied_rules(&self, chain: &str) -> Option<&[FilterRule]> {
        self.applied.get(chain).map(Vec::as_slice)
    }

    /// Names of all committed chains.
    pub fn applied_chain_names(&self) -> Vec<String> {
        self.applied.keys().cloned().collect()
    }

    /// Number of commits performed on this table.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// The committed state as a whole, for content comparison.
    pub fn applied_state(&self) -> &BTreeMap<String, Vec<FilterRule>> {
        &self.applied
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterTable for MemoryTable {
    fn add_chain(&mut self, name: &str) {
        self.pending.entry(name.to_string()).or_default();
    }

    fn add_rule(&mut self, chain: &str, rule: FilterRule) -> Result<()> {
        match self.pending.get_mut(chain) {
            Some(rules) => {
                rules.push(rule);
                Ok(())
            }
            None => Err(Error::Lookup(format!("chain {chain} does not exist"))),
        }
    }

    fn remove_chain(&mut self, name: &str) {
        if self.pending.remove(name).is_none() {
            return;
        }
        // Strip jump rules referencing the removed chain so the forwarding
        // chain never accumulates stale jumps across rebuilds.
        for rules in self.pending.values_mut() {
            rules.retain(|rule| !matches!(&rule.verb, Verb::Jump(target) if target == name));
        }
    }

    fn chain_names(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    fn commit_now(&mut self) -> Result<()> {
        self.applied = self.pending.clone();
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rule_to_missing_chain_fails() {
        let mut table = MemoryTable::new();
        let err = table.add_rule("nope", FilterRule::drop_all()).unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    #[test]
    fn test_forward_chain_is_builtin() {
        let mut table = MemoryTable::new();
        assert!(table.has_chain(FORWARD_CHAIN));
        table
            .add_rule(FORWARD_CHAIN, FilterRule::jump_in("qr-x", "target"))
            .unwrap();
    }

    #[test]
    fn test_edits_invisible_until_commit() {
        let mut table = MemoryTable::new();
        table.add_chain("fw-test");
        table.add_rule("fw-test", FilterRule::drop_all()).unwrap();

        assert!(table.applied_rules("fw-test").is_none());
        table.commit_now().unwrap();
        assert_eq!(table.applied_rules("fw-test").unwrap().len(), 1);
        assert_eq!(table.commit_count(), 1);
    }

    #[test]
    fn test_remove_chain_strips_jump_references() {
        let mut table = MemoryTable::new();
        table.add_chain("fw-test");
        table.add_rule("fw-test", FilterRule::drop_all()).unwrap();
        table
            .add_rule(FORWARD_CHAIN, FilterRule::jump_in("qr-x", "fw-test"))
            .unwrap();
        table
            .add_rule(FORWARD_CHAIN, FilterRule::jump_out("qr-x", "other"))
            .unwrap();

        table.remove_chain("fw-test");
        assert!(!table.has_chain("fw-test"));
        let forward: Vec<_> = table.pending[FORWARD_CHAIN]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(forward, vec!["-o qr-x -j other".to_string()]);
    }

    #[test]
    fn test_remove_missing_chain_is_noop() {
        let mut table = MemoryTable::new();
        table
            .add_rule(FORWARD_CHAIN, FilterRule::jump_in("qr-x", "ghost"))
            .unwrap();
        table.remove_chain("ghost");
        // The jump is left alone: nothing named "ghost" was removed.
        assert_eq!(table.pending[FORWARD_CHAIN].len(), 1);
    }

    #[test]
    fn test_add_existing_chain_keeps_rules() {
        let mut table = MemoryTable::new();
        table.add_chain("fw-test");
        table.add_rule("fw-test", FilterRule::drop_all()).unwrap();
        table.add_chain("fw-test");
        assert_eq!(table.pending["fw-test"].len(), 1);
    }
}
