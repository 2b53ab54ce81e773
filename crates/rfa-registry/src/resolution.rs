//! Account-level pipeline: contract resolution, override lookup, computation.

use crate::{AccountRef, Registry, RegistryError, ResolutionLevel, Result};
use rfa_core::{ContractId, ContractScope, TargetType, TierSchedule, TierType};
use rfa_engine::{
    compute_rebates, compute_union_rebates, union_rule_index, AccountTurnover, FieldSchedule,
    RebateReport, RuleIndex, ScheduleLookup, UnionContract,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Schedules for one account: its overrides first (account code before
/// group), then the resolved contract's rules.
pub struct RegistryLookup<'a> {
    registry: &'a Registry,
    account: &'a AccountRef,
    rules: RuleIndex<'a>,
}

impl<'a> RegistryLookup<'a> {
    pub fn new(registry: &'a Registry, account: &'a AccountRef, contract_id: ContractId) -> Self {
        let rules = RuleIndex::new(registry.rules().filter(|r| r.contract_id == contract_id));
        Self {
            registry,
            account,
            rules,
        }
    }
}

impl ScheduleLookup for RegistryLookup<'_> {
    fn schedule(&self, field_key: &str, tier_type: TierType) -> FieldSchedule<'_> {
        for target_type in TargetType::by_precedence() {
            let Some(value) = self.account.target(target_type) else {
                continue;
            };
            if let Some(o) = self
                .registry
                .active_override(target_type, &value, field_key, tier_type)
            {
                return FieldSchedule {
                    schedule: Some(&o.custom_tiers),
                    overridden: true,
                };
            }
        }
        self.rules.schedule(field_key, tier_type)
    }

    fn rule_schedule(&self, field_key: &str, tier_type: TierType) -> Option<&TierSchedule> {
        self.rules.rule_schedule(field_key, tier_type)
    }

    fn label(&self, field_key: &str) -> String {
        self.rules.label(field_key)
    }
}

/// Rebates owed to one account and how its contract was chosen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccountRebate {
    pub account: AccountRef,
    pub scope: ContractScope,
    pub contract_id: ContractId,
    pub contract_name: String,
    pub level: ResolutionLevel,
    pub report: RebateReport,
}

/// Rebates of a union priced over every active UNION contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnionRebate {
    pub contracts: Vec<ContractId>,
    /// Contract each applied rule was taken from.
    pub rule_sources: BTreeMap<String, ContractId>,
    pub report: RebateReport,
}

impl Registry {
    /// Resolve the contract for `account` within `scope` and compute every
    /// payment owed on `turnover`. Fails when no contract applies.
    pub fn compute_account(
        &self,
        scope: ContractScope,
        account: &AccountRef,
        turnover: &AccountTurnover,
    ) -> Result<AccountRebate> {
        let resolution = self.resolve_contract(scope, account)?;
        let contract = resolution.contract;
        let lookup = RegistryLookup::new(self, account, contract.id);
        let report = compute_rebates(turnover, &lookup, contract);
        info!(
            code_union = account.code_union.as_deref().unwrap_or("-"),
            groupe_client = account.groupe_client.as_deref().unwrap_or("-"),
            contract = %contract.id,
            level = ?resolution.level,
            grand_total = %report.totals.grand_total,
            "account computed"
        );
        Ok(AccountRebate {
            account: account.clone(),
            scope,
            contract_id: contract.id,
            contract_name: contract.name.clone(),
            level: resolution.level,
            report,
        })
    }

    /// Price `turnover` against all active UNION contracts at once, taking
    /// each rule from the last contract (by id) that sets real tiers.
    /// `by_group` carries the turnover of each client group of the union for
    /// the rules' group bonuses.
    pub fn compute_union(
        &self,
        turnover: &AccountTurnover,
        by_group: &BTreeMap<String, AccountTurnover>,
    ) -> Result<UnionRebate> {
        let contracts: Vec<UnionContract<'_>> = self
            .contracts()
            .filter(|c| c.scope == ContractScope::Union && c.is_active)
            .map(|contract| UnionContract {
                contract,
                rules: self
                    .rules()
                    .filter(|r| r.contract_id == contract.id)
                    .collect(),
            })
            .collect();
        if contracts.is_empty() {
            return Err(RegistryError::NoActiveContract(ContractScope::Union));
        }

        let rule_sources = union_rule_index(&contracts)
            .rules()
            .map(|r| (r.key.clone(), r.contract_id))
            .collect();
        let report = compute_union_rebates(turnover, &contracts, by_group);
        let ids: Vec<ContractId> = contracts.iter().map(|c| c.contract.id).collect();
        info!(
            contracts = ids.len(),
            groups = by_group.len(),
            grand_total = %report.totals.grand_total,
            "union computed"
        );
        Ok(UnionRebate {
            contracts: ids,
            rule_sources,
            report,
        })
    }
}
