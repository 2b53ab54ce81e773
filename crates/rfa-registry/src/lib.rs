#![deny(warnings)]

//! Contract catalog, assignment resolution and override store.
//!
//! All records live in one [`Registry`] value. Each mutating operation checks
//! its inputs before touching any record, so a failed call leaves the registry
//! unchanged. Account computations borrow the registry immutably for their
//! whole duration and therefore always see a single consistent snapshot.

mod assignments;
mod catalog;
mod entities;
mod overrides;
mod resolution;
mod shared;

pub use assignments::*;
pub use catalog::*;
pub use entities::*;
pub use overrides::*;
pub use resolution::*;
pub use shared::*;

use rfa_core::{
    Assignment, AssignmentId, Contract, ContractId, ContractRule, ContractScope, Override,
    OverrideId, OverrideKey, RuleId, TargetType, TierSchedule, ValidationError,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// No active default contract is configured for the scope.
    #[error("no active default contract for scope {0}")]
    NoDefaultContract(ContractScope),
    /// No active contract at all exists in the scope.
    #[error("no active contract for scope {0}")]
    NoActiveContract(ContractScope),
    /// Records loaded from storage break a registry invariant.
    #[error("inconsistent records: {0}")]
    Integrity(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

fn not_found(kind: &'static str, id: u64) -> RegistryError {
    RegistryError::NotFound { kind, id }
}

/// In-memory owner of every contract, rule, assignment and override.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    contracts: BTreeMap<ContractId, Contract>,
    rules: BTreeMap<RuleId, ContractRule>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    overrides: BTreeMap<OverrideId, Override>,
    assignment_index: BTreeMap<(TargetType, String), AssignmentId>,
    override_index: BTreeMap<OverrideKey, OverrideId>,
    next_contract: u64,
    next_rule: u64,
    next_assignment: u64,
    next_override: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from stored records, checking every cross-record
    /// invariant. Schedules are already validated by their own deserialization.
    pub fn from_records(
        contracts: Vec<Contract>,
        rules: Vec<ContractRule>,
        assignments: Vec<Assignment>,
        overrides: Vec<Override>,
    ) -> Result<Self> {
        let mut reg = Registry::new();

        let mut defaults = BTreeSet::new();
        for c in contracts {
            if c.is_default && !defaults.insert(c.scope) {
                return Err(RegistryError::Integrity(format!(
                    "more than one default contract for scope {}",
                    c.scope
                )));
            }
            reg.next_contract = reg.next_contract.max(c.id.0);
            reg.contracts.insert(c.id, c);
        }

        let mut rule_keys = BTreeSet::new();
        for r in rules {
            if !reg.contracts.contains_key(&r.contract_id) {
                return Err(RegistryError::Integrity(format!(
                    "rule {} references unknown contract {}",
                    r.id, r.contract_id
                )));
            }
            if !rule_keys.insert((r.contract_id, r.key.clone())) {
                return Err(ValidationError::DuplicateRule(r.key).into());
            }
            reg.next_rule = reg.next_rule.max(r.id.0);
            reg.rules.insert(r.id, r);
        }

        for a in assignments {
            if !reg.contracts.contains_key(&a.contract_id) {
                return Err(RegistryError::Integrity(format!(
                    "assignment {} references unknown contract {}",
                    a.id, a.contract_id
                )));
            }
            let key = (a.target_type, a.target_value.clone());
            if reg.assignment_index.insert(key, a.id).is_some() {
                return Err(RegistryError::Integrity(format!(
                    "duplicate assignment for {} {}",
                    a.target_type, a.target_value
                )));
            }
            reg.next_assignment = reg.next_assignment.max(a.id.0);
            reg.assignments.insert(a.id, a);
        }

        for o in overrides {
            if reg.override_index.insert(o.key(), o.id).is_some() {
                return Err(RegistryError::Integrity(format!(
                    "duplicate override for {} {} {} {}",
                    o.target_type, o.target_value, o.field_key, o.tier_type
                )));
            }
            reg.next_override = reg.next_override.max(o.id.0);
            reg.overrides.insert(o.id, o);
        }

        Ok(reg)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn rules(&self) -> impl Iterator<Item = &ContractRule> {
        self.rules.values()
    }

    pub fn overrides(&self) -> impl Iterator<Item = &Override> {
        self.overrides.values()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// The rule schedule a contract defines for one field, if any.
    pub fn contract_schedule(
        &self,
        contract_id: ContractId,
        field_key: &str,
        tier_type: rfa_core::TierType,
    ) -> Option<&TierSchedule> {
        self.rules
            .values()
            .find(|r| r.contract_id == contract_id && r.key == field_key)
            .and_then(|r| r.schedule(tier_type))
    }

    fn alloc_contract(&mut self) -> ContractId {
        self.next_contract += 1;
        ContractId(self.next_contract)
    }

    fn alloc_rule(&mut self) -> RuleId {
        self.next_rule += 1;
        RuleId(self.next_rule)
    }

    fn alloc_assignment(&mut self) -> AssignmentId {
        self.next_assignment += 1;
        AssignmentId(self.next_assignment)
    }

    fn alloc_override(&mut self) -> OverrideId {
        self.next_override += 1;
        OverrideId(self.next_override)
    }
}
