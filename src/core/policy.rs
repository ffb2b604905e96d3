//! Policy storage and ordered rule-list maintenance
//!
//! A [`PolicyStore`] holds rule and policy records and maintains the ordered
//! membership between them. Ordering is first-match-wins and
//! position-significant: after any mutation the 1-based positions of a
//! policy's rules are exactly `1..=N` in list order.
//!
//! Insertion is anchor-based: a new rule lands immediately before an
//! `insert_before` anchor, immediately after an `insert_after` anchor, or at
//! the head of the list when no anchor is given. When both anchors are
//! supplied, `insert_before` wins and `insert_after` is ignored.
//!
//! Any mutation of a policy's rule list, or of a member rule's content,
//! clears the policy's `audited` flag.

use std::collections::HashMap;

use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::core::model::{
    FirewallGroup, FirewallGroupView, FirewallPolicy, FirewallRule, MAX_POLICY_RULES,
};

/// In-memory store of rules, policies, and their ordered membership.
#[derive(Debug, Default, Clone)]
pub struct PolicyStore {
    rules: HashMap<Uuid, FirewallRule>,
    policies: HashMap<Uuid, FirewallPolicy>,
    /// rule id -> owning policy id; a rule belongs to at most one policy
    owner: HashMap<Uuid, Uuid>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a rule record after validating its field
    /// combinations. Replacing a rule that belongs to a policy clears that
    /// policy's `audited` flag, since its effective content changed.
    pub fn upsert_rule(&mut self, rule: FirewallRule) -> Result<()> {
        rule.validate()?;
        if let Some(policy_id) = self.owner.get(&rule.id).copied()
            && let Some(policy) = self.policies.get_mut(&policy_id)
        {
            policy.audited = false;
        }
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    /// Registers an empty policy.
    pub fn add_policy(&mut self, id: Uuid, name: impl Into<String>) -> Result<()> {
        if self.policies.contains_key(&id) {
            return Err(Error::validation(
                "firewall_policy_id",
                format!("policy {id} already exists"),
            ));
        }
        self.policies.insert(id, FirewallPolicy::new(id, name));
        Ok(())
    }

    pub fn rule(&self, id: Uuid) -> Result<&FirewallRule> {
        self.rules
            .get(&id)
            .ok_or_else(|| Error::not_found("firewall rule", id))
    }

    pub fn policy(&self, id: Uuid) -> Result<&FirewallPolicy> {
        self.policies
            .get(&id)
            .ok_or_else(|| Error::not_found("firewall policy", id))
    }

    /// The policy currently owning a rule, if any.
    pub fn owner_of(&self, rule_id: Uuid) -> Option<Uuid> {
        self.owner.get(&rule_id).copied()
    }

    /// Inserts a rule into a policy's ordered list.
    ///
    /// Anchor semantics: `before` places the rule immediately ahead of the
    /// anchor and takes precedence over `after`; `after` places it
    /// immediately following the anchor; with no anchor the rule is placed
    /// at the head of the list.
    ///
    /// A rule already attached to another policy is detached from it first
    /// (re-association). Inserting a rule that is already a member of this
    /// policy, or naming an anchor that is not a member, is a validation
    /// error.
    pub fn insert_rule(
        &mut self,
        policy_id: Uuid,
        rule_id: Uuid,
        before: Option<Uuid>,
        after: Option<Uuid>,
    ) -> Result<()> {
        self.rule(rule_id)?;
        let policy = self
            .policies
            .get(&policy_id)
            .ok_or_else(|| Error::not_found("firewall policy", policy_id))?;

        if self.owner.get(&rule_id) == Some(&policy_id) {
            return Err(Error::validation(
                "firewall_rule_id",
                format!("rule {rule_id} is already associated with policy {policy_id}"),
            ));
        }
        if policy.rule_ids.len() >= MAX_POLICY_RULES {
            return Err(Error::validation(
                "firewall_rules",
                format!("policy rule limit reached ({MAX_POLICY_RULES})"),
            ));
        }

        // insert_before wins when both anchors are given
        let (anchor, place_before) = match (before, after) {
            (Some(anchor), _) => (Some(anchor), true),
            (None, Some(anchor)) => (Some(anchor), false),
            (None, None) => (None, true),
        };

        let index = match anchor {
            Some(anchor_id) => {
                let Some(anchor_index) = policy.rule_ids.iter().position(|id| *id == anchor_id)
                else {
                    return Err(Error::validation(
                        "firewall_rule_id",
                        format!("anchor rule {anchor_id} is not associated with policy {policy_id}"),
                    ));
                };
                if place_before {
                    anchor_index
                } else {
                    anchor_index + 1
                }
            }
            None => 0,
        };

        // Re-association: detach from the previous owner before attaching here.
        if let Some(previous) = self.owner.get(&rule_id).copied() {
            self.detach(previous, rule_id);
        }

        let Some(policy) = self.policies.get_mut(&policy_id) else {
            return Err(Error::not_found("firewall policy", policy_id));
        };
        policy.rule_ids.insert(index, rule_id);
        policy.audited = false;
        self.owner.insert(rule_id, policy_id);
        Ok(())
    }

    /// Removes a rule from a policy's ordered list.
    pub fn remove_rule(&mut self, policy_id: Uuid, rule_id: Uuid) -> Result<()> {
        let policy = self
            .policies
            .get_mut(&policy_id)
            .ok_or_else(|| Error::not_found("firewall policy", policy_id))?;
        let Some(index) = policy.rule_ids.iter().position(|id| *id == rule_id) else {
            return Err(Error::not_found("firewall rule", rule_id));
        };
        policy.rule_ids.remove(index);
        policy.audited = false;
        self.owner.remove(&rule_id);
        Ok(())
    }

    /// The ordered rule id sequence of a policy.
    pub fn rule_ids(&self, policy_id: Uuid) -> Result<&[Uuid]> {
        Ok(&self.policy(policy_id)?.rule_ids)
    }

    /// The 1-based position of a member rule.
    pub fn position(&self, policy_id: Uuid, rule_id: Uuid) -> Result<usize> {
        self.policy(policy_id)?
            .rule_ids
            .iter()
            .position(|id| *id == rule_id)
            .map(|index| index + 1)
            .ok_or_else(|| Error::not_found("firewall rule", rule_id))
    }

    /// Marks a policy as audited; cleared again by the next mutation.
    pub fn set_audited(&mut self, policy_id: Uuid, audited: bool) -> Result<()> {
        let policy = self
            .policies
            .get_mut(&policy_id)
            .ok_or_else(|| Error::not_found("firewall policy", policy_id))?;
        policy.audited = audited;
        Ok(())
    }

    /// The policy's rules, cloned in list order.
    pub fn ordered_rules(&self, policy_id: Uuid) -> Result<Vec<FirewallRule>> {
        self.policy(policy_id)?
            .rule_ids
            .iter()
            .map(|id| self.rule(*id).cloned())
            .collect()
    }

    /// Resolves a firewall group's policy references into the
    /// driver-facing view with materialized rule lists.
    pub fn materialize(&self, group: &FirewallGroup) -> Result<FirewallGroupView> {
        let ingress_rules = match group.ingress_policy_id {
            Some(policy_id) => self.ordered_rules(policy_id)?,
            None => Vec::new(),
        };
        let egress_rules = match group.egress_policy_id {
            Some(policy_id) => self.ordered_rules(policy_id)?,
            None => Vec::new(),
        };
        Ok(FirewallGroupView {
            id: group.id,
            admin_state_up: group.admin_state_up,
            ingress_rules,
            egress_rules,
        })
    }

    fn detach(&mut self, policy_id: Uuid, rule_id: Uuid) {
        if let Some(policy) = self.policies.get_mut(&policy_id) {
            policy.rule_ids.retain(|id| *id != rule_id);
            policy.audited = false;
        }
        self.owner.remove(&rule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::tcp_rule;
    use crate::core::model::Action;
    use proptest::prelude::*;

    fn store_with_policy() -> (PolicyStore, Uuid) {
        let mut store = PolicyStore::new();
        let policy_id = Uuid::new_v4();
        store.add_policy(policy_id, "test policy").unwrap();
        (store, policy_id)
    }

    fn add_rule(store: &mut PolicyStore, name: &str) -> Uuid {
        let rule = tcp_rule(name, Action::Allow, Some(22));
        let id = rule.id;
        store.upsert_rule(rule).unwrap();
        id
    }

    #[test]
    fn test_insert_without_anchor_prepends() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let r2 = add_rule(&mut store, "r2");

        store.insert_rule(policy, r1, None, None).unwrap();
        store.insert_rule(policy, r2, None, None).unwrap();

        assert_eq!(store.rule_ids(policy).unwrap(), &[r2, r1]);
        assert_eq!(store.position(policy, r2).unwrap(), 1);
        assert_eq!(store.position(policy, r1).unwrap(), 2);
    }

    #[test]
    fn test_insert_after_places_following_anchor() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let r2 = add_rule(&mut store, "r2");
        let r3 = add_rule(&mut store, "r3");

        store.insert_rule(policy, r1, None, None).unwrap();
        store.insert_rule(policy, r2, None, Some(r1)).unwrap();
        store.insert_rule(policy, r3, None, Some(r1)).unwrap();

        assert_eq!(store.rule_ids(policy).unwrap(), &[r1, r3, r2]);
    }

    #[test]
    fn test_insert_before_wins_over_after() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let r5 = add_rule(&mut store, "r5");
        let r6 = add_rule(&mut store, "r6");

        store.insert_rule(policy, r1, None, None).unwrap();
        store.insert_rule(policy, r5, None, Some(r1)).unwrap();
        // Both anchors name r5; the rule must land immediately before it.
        store.insert_rule(policy, r6, Some(r5), Some(r5)).unwrap();
        assert_eq!(store.rule_ids(policy).unwrap(), &[r1, r6, r5]);
    }

    #[test]
    fn test_insert_before_wins_when_anchors_disagree() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let r2 = add_rule(&mut store, "r2");
        let r3 = add_rule(&mut store, "r3");

        store.insert_rule(policy, r1, None, None).unwrap();
        store.insert_rule(policy, r2, None, Some(r1)).unwrap();
        // before=r1, after=r2: the after anchor is ignored entirely.
        store.insert_rule(policy, r3, Some(r1), Some(r2)).unwrap();
        assert_eq!(store.rule_ids(policy).unwrap(), &[r3, r1, r2]);
    }

    #[test]
    fn test_insert_duplicate_is_validation_error() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");

        store.insert_rule(policy, r1, None, None).unwrap();
        let err = store.insert_rule(policy, r1, None, None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_insert_unknown_anchor_is_validation_error() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let stranger = add_rule(&mut store, "stranger");

        let err = store
            .insert_rule(policy, r1, Some(stranger), None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_insert_unknown_rule_is_not_found() {
        let (mut store, policy) = store_with_policy();
        let err = store
            .insert_rule(policy, Uuid::new_v4(), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_reassociation_detaches_from_previous_policy() {
        let (mut store, first) = store_with_policy();
        let second = Uuid::new_v4();
        store.add_policy(second, "second").unwrap();
        let r1 = add_rule(&mut store, "r1");

        store.insert_rule(first, r1, None, None).unwrap();
        store.set_audited(first, true).unwrap();

        store.insert_rule(second, r1, None, None).unwrap();
        assert!(store.rule_ids(first).unwrap().is_empty());
        assert_eq!(store.rule_ids(second).unwrap(), &[r1]);
        assert_eq!(store.owner_of(r1), Some(second));
        // Losing a member dirties the previous policy's audit state too.
        assert!(!store.policy(first).unwrap().audited);
    }

    #[test]
    fn test_remove_nonmember_is_not_found() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let err = store.remove_rule(policy, r1).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_mutations_clear_audited() {
        let (mut store, policy) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let r2 = add_rule(&mut store, "r2");

        store.insert_rule(policy, r1, None, None).unwrap();
        store.set_audited(policy, true).unwrap();
        store.insert_rule(policy, r2, None, None).unwrap();
        assert!(!store.policy(policy).unwrap().audited);

        store.set_audited(policy, true).unwrap();
        store.remove_rule(policy, r2).unwrap();
        assert!(!store.policy(policy).unwrap().audited);

        store.set_audited(policy, true).unwrap();
        let mut updated = store.rule(r1).unwrap().clone();
        updated.destination_port = Some(crate::core::model::PortRange::single(80));
        store.upsert_rule(updated).unwrap();
        assert!(!store.policy(policy).unwrap().audited);
    }

    #[test]
    fn test_materialize_resolves_policies_in_order() {
        let (mut store, ingress) = store_with_policy();
        let r1 = add_rule(&mut store, "r1");
        let r2 = add_rule(&mut store, "r2");
        store.insert_rule(ingress, r1, None, None).unwrap();
        store.insert_rule(ingress, r2, None, Some(r1)).unwrap();

        let group = FirewallGroup {
            id: Uuid::new_v4(),
            name: "fwg".to_string(),
            admin_state_up: true,
            ingress_policy_id: Some(ingress),
            egress_policy_id: None,
            status: crate::core::model::FirewallStatus::PendingCreate,
            ports: vec![],
        };
        let view = store.materialize(&group).unwrap();
        assert_eq!(view.ingress_rules.len(), 2);
        assert_eq!(view.ingress_rules[0].id, r1);
        assert_eq!(view.ingress_rules[1].id, r2);
        assert!(view.egress_rules.is_empty());
    }

    proptest! {
        /// After any sequence of inserts and removes the positions of a
        /// policy's rules are exactly 1..=N in list order.
        #[test]
        fn positions_are_contiguous(ops in proptest::collection::vec(0..3u8, 1..40)) {
            let (mut store, policy) = store_with_policy();
            let mut pool: Vec<Uuid> = Vec::new();

            for (step, op) in ops.into_iter().enumerate() {
                match op {
                    // insert a fresh rule at the head
                    0 => {
                        let id = add_rule(&mut store, &format!("rule-{step}"));
                        store.insert_rule(policy, id, None, None).unwrap();
                        pool.push(id);
                    }
                    // insert a fresh rule after some existing member
                    1 => {
                        let id = add_rule(&mut store, &format!("rule-{step}"));
                        let anchor = pool.first().copied();
                        store.insert_rule(policy, id, None, anchor).unwrap();
                        pool.push(id);
                    }
                    // remove the oldest member, if any
                    _ => {
                        if !pool.is_empty() {
                            let id = pool.remove(0);
                            store.remove_rule(policy, id).unwrap();
                        }
                    }
                }

                let ids = store.rule_ids(policy).unwrap().to_vec();
                for (index, id) in ids.iter().enumerate() {
                    prop_assert_eq!(store.position(policy, *id).unwrap(), index + 1);
                }
                prop_assert_eq!(ids.len(), pool.len());
            }
        }
    }
}
