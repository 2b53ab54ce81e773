//! Assignments and contract resolution for an account.

use crate::{not_found, Registry, RegistryError, Result};
use chrono::Utc;
use rfa_core::{
    normalize_target, require_text, Assignment, AssignmentId, Contract, ContractId,
    ContractScope, TargetType,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Identity of the account (or account group) a computation is for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub code_union: Option<String>,
    pub groupe_client: Option<String>,
}

impl AccountRef {
    pub fn client(code_union: &str, groupe_client: Option<&str>) -> Self {
        Self {
            code_union: Some(normalize_target(code_union)),
            groupe_client: groupe_client
                .map(normalize_target)
                .filter(|g| !g.is_empty()),
        }
    }

    pub fn group(groupe_client: &str) -> Self {
        Self {
            code_union: None,
            groupe_client: Some(normalize_target(groupe_client)),
        }
    }

    /// The identity this account has for a target type, normalized.
    pub fn target(&self, target_type: TargetType) -> Option<String> {
        let raw = match target_type {
            TargetType::CodeUnion => self.code_union.as_deref(),
            TargetType::GroupeClient => self.groupe_client.as_deref(),
        };
        raw.map(normalize_target).filter(|v| !v.is_empty())
    }
}

/// Which level of the precedence chain supplied the contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionLevel {
    CodeUnion,
    GroupeClient,
    Default,
}

impl From<TargetType> for ResolutionLevel {
    fn from(t: TargetType) -> Self {
        match t {
            TargetType::CodeUnion => ResolutionLevel::CodeUnion,
            TargetType::GroupeClient => ResolutionLevel::GroupeClient,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution<'a> {
    pub contract: &'a Contract,
    pub level: ResolutionLevel,
}

impl Registry {
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.values()
    }

    pub fn find_assignment(
        &self,
        target_type: TargetType,
        target_value: &str,
    ) -> Option<&Assignment> {
        self.assignment_index
            .get(&(target_type, normalize_target(target_value)))
            .and_then(|id| self.assignments.get(id))
    }

    /// Bind a target to a contract. An existing assignment for the same
    /// target is replaced.
    pub fn create_assignment(
        &mut self,
        target_type: TargetType,
        target_value: &str,
        contract_id: ContractId,
    ) -> Result<Assignment> {
        let value = normalize_target(require_text("target_value", target_value)?);
        self.contract(contract_id)?;

        if let Some(old) = self.assignment_index.remove(&(target_type, value.clone())) {
            self.assignments.remove(&old);
            info!(assignment = %old, %target_type, target = %value, "assignment replaced");
        }
        let id = self.alloc_assignment();
        let assignment = Assignment {
            id,
            target_type,
            target_value: value.clone(),
            contract_id,
            created_at: Utc::now(),
        };
        self.assignment_index.insert((target_type, value), id);
        self.assignments.insert(id, assignment.clone());
        info!(
            assignment = %id,
            %target_type,
            target = %assignment.target_value,
            contract = %contract_id,
            "assignment created"
        );
        Ok(assignment)
    }

    pub fn delete_assignment(&mut self, id: AssignmentId) -> Result<Assignment> {
        let removed = self
            .assignments
            .remove(&id)
            .ok_or(not_found("assignment", id.0))?;
        self.assignment_index
            .remove(&(removed.target_type, removed.target_value.clone()));
        info!(assignment = %id, target = %removed.target_value, "assignment deleted");
        Ok(removed)
    }

    /// Contract that applies to `account` within `scope`: an assignment on
    /// the account code, else on its group, else the scope's default.
    ///
    /// Assignments pointing at an inactive contract or at a contract of the
    /// other scope are skipped. An inactive default counts as no default.
    pub fn resolve_contract(
        &self,
        scope: ContractScope,
        account: &AccountRef,
    ) -> Result<Resolution<'_>> {
        for target_type in TargetType::by_precedence() {
            let Some(value) = account.target(target_type) else {
                continue;
            };
            let Some(assignment) = self.find_assignment(target_type, &value) else {
                continue;
            };
            let contract = self.contract(assignment.contract_id)?;
            if contract.scope != scope {
                warn!(
                    %target_type,
                    target = %value,
                    contract = %contract.id,
                    "assigned contract belongs to scope {}; skipped",
                    contract.scope
                );
                continue;
            }
            if !contract.is_active {
                warn!(
                    %target_type,
                    target = %value,
                    contract = %contract.id,
                    "assigned contract is inactive; skipped"
                );
                continue;
            }
            debug!(
                %target_type,
                target = %value,
                contract = %contract.id,
                "resolved by assignment"
            );
            return Ok(Resolution {
                contract,
                level: target_type.into(),
            });
        }

        match self.default_contract(scope) {
            Some(contract) if contract.is_active => {
                debug!(%scope, contract = %contract.id, "resolved to default contract");
                Ok(Resolution {
                    contract,
                    level: ResolutionLevel::Default,
                })
            }
            Some(contract) => {
                warn!(%scope, contract = %contract.id, "default contract is inactive");
                Err(RegistryError::NoDefaultContract(scope))
            }
            None => Err(RegistryError::NoDefaultContract(scope)),
        }
    }
}
