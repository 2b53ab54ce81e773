//! Contract and contract-rule management.

use crate::{not_found, Registry, RegistryError, Result};
use chrono::Utc;
use rfa_core::{
    field, is_tri_field, normalize_field_key, require_text, standard_rules, tri_fields,
    validate_bonus_groups, Contract, ContractId, ContractRule, ContractScope, FieldInfo,
    MarketingRule, RuleDraft, RuleId, RulePatch, RuleScope, ValidationError,
    STANDARD_CONTRACT_DESCRIPTION, STANDARD_CONTRACT_NAME,
};
use rfa_engine::normalize_marketing_rules;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Partial update of a contract. Absent fields are left unchanged; an empty
/// `description` clears it.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContractPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scope: Option<ContractScope>,
    pub is_active: Option<bool>,
    pub use_combined_global_rate: Option<bool>,
    pub marketing_rules: Option<BTreeMap<String, MarketingRule>>,
}

/// What a contract deletion removed along with the contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeletedContract {
    pub id: ContractId,
    pub rules: usize,
    pub assignments: usize,
}

fn description(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Registry {
    pub fn create_contract(
        &mut self,
        name: &str,
        description_text: Option<&str>,
        scope: ContractScope,
    ) -> Result<Contract> {
        let name = require_text("name", name)?.to_string();
        let id = self.alloc_contract();
        let now = Utc::now();
        let contract = Contract {
            id,
            name,
            description: description(description_text),
            scope,
            is_default: false,
            is_active: true,
            use_combined_global_rate: false,
            marketing_rules: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        info!(contract = %id, name = %contract.name, %scope, "contract created");
        self.contracts.insert(id, contract.clone());
        Ok(contract)
    }

    pub fn contract(&self, id: ContractId) -> Result<&Contract> {
        self.contracts.get(&id).ok_or(not_found("contract", id.0))
    }

    /// All contracts, default ones first, then by name.
    pub fn list_contracts(&self) -> Vec<&Contract> {
        let mut all: Vec<&Contract> = self.contracts.values().collect();
        all.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    /// The default contract of a scope, active or not.
    pub fn default_contract(&self, scope: ContractScope) -> Option<&Contract> {
        self.contracts
            .values()
            .find(|c| c.scope == scope && c.is_default)
    }

    pub fn update_contract(&mut self, id: ContractId, patch: ContractPatch) -> Result<Contract> {
        let current = self.contract(id)?;
        let name = match &patch.name {
            Some(n) => Some(require_text("name", n)?.to_string()),
            None => None,
        };
        if let Some(scope) = patch.scope {
            if current.is_default && scope != current.scope {
                return Err(RegistryError::InvalidOperation(format!(
                    "contract {id} is the default for {}; its scope cannot change",
                    current.scope
                )));
            }
        }
        let marketing = match patch.marketing_rules {
            Some(rules) => Some(normalize_marketing_rules(rules)?),
            None => None,
        };

        let contract = self
            .contracts
            .get_mut(&id)
            .ok_or(not_found("contract", id.0))?;
        if let Some(name) = name {
            contract.name = name;
        }
        if let Some(d) = patch.description {
            contract.description = description(Some(&d));
        }
        if let Some(scope) = patch.scope {
            contract.scope = scope;
        }
        if let Some(active) = patch.is_active {
            contract.is_active = active;
        }
        if let Some(combined) = patch.use_combined_global_rate {
            contract.use_combined_global_rate = combined;
        }
        if let Some(rules) = marketing {
            contract.marketing_rules = rules;
        }
        contract.updated_at = Utc::now();
        info!(contract = %id, "contract updated");
        Ok(contract.clone())
    }

    /// Copy a contract and all its rules under a new id. The copy is never
    /// the default.
    pub fn duplicate_contract(&mut self, id: ContractId) -> Result<Contract> {
        let source = self.contract(id)?.clone();
        let source_rules: Vec<ContractRule> = self
            .rules
            .values()
            .filter(|r| r.contract_id == id)
            .cloned()
            .collect();

        let new_id = self.alloc_contract();
        let now = Utc::now();
        let copy = Contract {
            id: new_id,
            name: format!("{} (copy)", source.name),
            is_default: false,
            created_at: now,
            updated_at: now,
            ..source
        };
        self.contracts.insert(new_id, copy.clone());
        for rule in source_rules {
            let rule_id = self.alloc_rule();
            self.rules.insert(
                rule_id,
                ContractRule {
                    id: rule_id,
                    contract_id: new_id,
                    created_at: now,
                    updated_at: now,
                    ..rule
                },
            );
        }
        info!(source = %id, contract = %new_id, "contract duplicated");
        Ok(copy)
    }

    /// Make `id` the default of its scope, clearing the previous holder.
    pub fn set_default_contract(&mut self, id: ContractId) -> Result<Contract> {
        let target = self.contract(id)?;
        let scope = target.scope;
        if !target.is_active {
            warn!(
                contract = %id,
                "default contract is inactive; resolution will fail until it is activated"
            );
        }
        let now = Utc::now();
        for c in self.contracts.values_mut() {
            if c.scope == scope && c.is_default && c.id != id {
                c.is_default = false;
                c.updated_at = now;
                info!(contract = %c.id, %scope, "default cleared");
            }
        }
        let contract = self
            .contracts
            .get_mut(&id)
            .ok_or(not_found("contract", id.0))?;
        contract.is_default = true;
        contract.updated_at = now;
        info!(contract = %id, %scope, "default set");
        Ok(contract.clone())
    }

    pub fn toggle_active_contract(&mut self, id: ContractId) -> Result<Contract> {
        let contract = self
            .contracts
            .get_mut(&id)
            .ok_or(not_found("contract", id.0))?;
        contract.is_active = !contract.is_active;
        contract.updated_at = Utc::now();
        info!(contract = %id, active = contract.is_active, "contract toggled");
        Ok(contract.clone())
    }

    /// Delete a contract with its rules and the assignments pointing at it.
    /// The default contract of a scope cannot be deleted.
    pub fn delete_contract(&mut self, id: ContractId) -> Result<DeletedContract> {
        let contract = self.contract(id)?;
        if contract.is_default {
            return Err(RegistryError::InvalidOperation(format!(
                "contract {id} is the default for {} and cannot be deleted",
                contract.scope
            )));
        }
        self.contracts.remove(&id);

        let before = self.rules.len();
        self.rules.retain(|_, r| r.contract_id != id);
        let rules = before - self.rules.len();

        let dropped: Vec<_> = self
            .assignments
            .values()
            .filter(|a| a.contract_id == id)
            .map(|a| (a.id, a.target_type, a.target_value.clone()))
            .collect();
        for (aid, tt, value) in &dropped {
            self.assignments.remove(aid);
            self.assignment_index.remove(&(*tt, value.clone()));
        }
        info!(contract = %id, rules, assignments = dropped.len(), "contract deleted");
        Ok(DeletedContract {
            id,
            rules,
            assignments: dropped.len(),
        })
    }

    /// Rules of a contract in creation order.
    pub fn contract_rules(&self, contract_id: ContractId) -> Result<Vec<&ContractRule>> {
        self.contract(contract_id)?;
        Ok(self
            .rules
            .values()
            .filter(|r| r.contract_id == contract_id)
            .collect())
    }

    pub fn create_contract_rule(
        &mut self,
        contract_id: ContractId,
        mut draft: RuleDraft,
    ) -> Result<ContractRule> {
        self.contract(contract_id)?;
        let key = normalize_field_key(require_text("key", &draft.key)?);
        let scope = draft.scope.unwrap_or(RuleScope::Tri);
        if scope == RuleScope::Tri && !is_tri_field(&key) {
            return Err(ValidationError::UnknownField(key).into());
        }
        let known = field(&key);
        let label = match (scope, known) {
            (_, Some(f)) if f.scope != scope => {
                return Err(ValidationError::UnknownField(key).into());
            }
            (RuleScope::Tri, known) => known
                .map(|f| f.label.to_string())
                .unwrap_or_else(|| key.clone()),
            (RuleScope::Global, known) => match draft.label.as_deref().map(str::trim) {
                Some(l) if !l.is_empty() => l.to_string(),
                _ => known.map(|f| f.label.to_string()).unwrap_or_else(|| key.clone()),
            },
        };
        if self
            .rules
            .values()
            .any(|r| r.contract_id == contract_id && r.key == key)
        {
            return Err(ValidationError::DuplicateRule(key).into());
        }
        let bonus_groups = validate_bonus_groups(scope, std::mem::take(&mut draft.bonus_groups))?;
        let tiers = draft.into_tiers()?;

        let id = self.alloc_rule();
        let now = Utc::now();
        let rule = ContractRule {
            id,
            contract_id,
            key,
            label,
            tiers,
            bonus_groups,
            created_at: now,
            updated_at: now,
        };
        info!(contract = %contract_id, rule = %id, key = %rule.key, "rule created");
        self.rules.insert(id, rule.clone());
        Ok(rule)
    }

    /// Apply a patch to a rule of `contract_id`. The schedules are validated
    /// again before anything is written.
    pub fn update_contract_rule(
        &mut self,
        contract_id: ContractId,
        rule_id: RuleId,
        patch: RulePatch,
    ) -> Result<ContractRule> {
        self.contract(contract_id)?;
        let rule = self
            .rules
            .get(&rule_id)
            .filter(|r| r.contract_id == contract_id)
            .ok_or(not_found("rule", rule_id.0))?;
        let tiers = patch.apply_to(&rule.tiers)?;
        let bonus_groups = match &patch.bonus_groups {
            Some(groups) => Some(validate_bonus_groups(rule.scope(), groups.clone())?),
            None => None,
        };
        let label = match &patch.label {
            Some(l) => Some(require_text("label", l)?.to_string()),
            None => None,
        };

        let rule = self
            .rules
            .get_mut(&rule_id)
            .ok_or(not_found("rule", rule_id.0))?;
        rule.tiers = tiers;
        if let Some(groups) = bonus_groups {
            rule.bonus_groups = groups;
        }
        if let Some(label) = label {
            rule.label = label;
        }
        rule.updated_at = Utc::now();
        info!(contract = %contract_id, rule = %rule_id, key = %rule.key, "rule updated");
        Ok(rule.clone())
    }

    /// Tri-partite fields not yet configured on the contract.
    pub fn available_tri_fields(&self, contract_id: ContractId) -> Result<Vec<FieldInfo>> {
        let used: Vec<&str> = self
            .contract_rules(contract_id)?
            .into_iter()
            .map(|r| r.key.as_str())
            .collect();
        Ok(tri_fields()
            .into_iter()
            .filter(|f| !used.contains(&f.key.as_str()))
            .collect())
    }

    /// Create the standard ADHERENT contract with every standard rule and make
    /// it the default of its scope.
    pub fn seed_standard_contract(&mut self) -> Result<Contract> {
        let contract = self.create_contract(
            STANDARD_CONTRACT_NAME,
            Some(STANDARD_CONTRACT_DESCRIPTION),
            ContractScope::Adherent,
        )?;
        let now = Utc::now();
        for std_rule in standard_rules() {
            let id = self.alloc_rule();
            self.rules.insert(
                id,
                ContractRule {
                    id,
                    contract_id: contract.id,
                    key: std_rule.key.to_string(),
                    label: std_rule.label.to_string(),
                    tiers: std_rule.tiers,
                    bonus_groups: Vec::new(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        self.set_default_contract(contract.id)
    }
}
