//! Union computation across several active contracts, plus the per-group
//! bonuses carried by GLOBAL rules.

use crate::calculator::{compute_fields, AccountTurnover, RebateReport, RuleIndex};
use crate::marketing::{compute_contract_marketing, MarketingPayment};
use rfa_core::{normalize_target, Contract, ContractRule, RuleScope};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One contract taking part in a union computation, with its rules.
#[derive(Clone, Debug)]
pub struct UnionContract<'a> {
    pub contract: &'a Contract,
    pub rules: Vec<&'a ContractRule>,
}

/// Bonus paid to one client group on one platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BonusGroupPayment {
    pub field_key: String,
    /// Platform name, the key without its `GLOBAL_` prefix.
    pub supplier: String,
    pub groupe_client: String,
    pub label: String,
    pub turnover: Decimal,
    pub bonus_rate: Decimal,
    pub value: Decimal,
}

/// Index the rules of `contracts` by key. A later contract replaces an
/// earlier one's rule, but only with a rule that holds at least one tier.
pub fn union_rule_index<'a>(contracts: &[UnionContract<'a>]) -> RuleIndex<'a> {
    RuleIndex::new(
        contracts
            .iter()
            .flat_map(|c| c.rules.iter().copied())
            .filter(|r| r.has_tiers()),
    )
}

/// Group bonuses of every GLOBAL rule in `index`. `by_group` is matched
/// case-insensitively; a group with no turnover on the platform earns nothing.
pub fn compute_bonus_groups(
    index: &RuleIndex<'_>,
    by_group: &BTreeMap<String, AccountTurnover>,
) -> Vec<BonusGroupPayment> {
    let groups: BTreeMap<String, &AccountTurnover> = by_group
        .iter()
        .map(|(g, t)| (normalize_target(g), t))
        .collect();

    let mut out = Vec::new();
    for rule in index.rules().filter(|r| r.scope() == RuleScope::Global) {
        for bg in &rule.bonus_groups {
            if bg.bonus_rate <= Decimal::ZERO {
                continue;
            }
            let turnover = groups
                .get(&normalize_target(&bg.groupe_client))
                .and_then(|t| t.global.get(&rule.key))
                .copied()
                .unwrap_or(Decimal::ZERO);
            if turnover <= Decimal::ZERO {
                continue;
            }
            out.push(BonusGroupPayment {
                field_key: rule.key.clone(),
                supplier: rule.key.trim_start_matches("GLOBAL_").to_string(),
                groupe_client: bg.groupe_client.clone(),
                label: bg.display_label(),
                turnover,
                bonus_rate: bg.bonus_rate,
                value: turnover * bg.bonus_rate,
            });
        }
    }
    out
}

fn merge_marketing(
    into: &mut BTreeMap<String, MarketingPayment>,
    payments: BTreeMap<String, MarketingPayment>,
) {
    for (key, p) in payments {
        match into.get_mut(&key) {
            Some(acc) => {
                acc.amount += p.amount;
                acc.rate = match (acc.rate, p.rate) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                };
                if acc.calculation_type != p.calculation_type {
                    acc.calculation_type = "mixed";
                }
            }
            None => {
                into.insert(key, p);
            }
        }
    }
}

/// Rebates of a union whose rules are spread over several contracts.
///
/// Every field is priced on its own turnover with the rule picked by
/// [`union_rule_index`]; overrides do not apply. Marketing payments of all
/// contracts are summed per platform.
pub fn compute_union_rebates(
    turnover: &AccountTurnover,
    contracts: &[UnionContract<'_>],
    by_group: &BTreeMap<String, AccountTurnover>,
) -> RebateReport {
    let index = union_rule_index(contracts);
    let fields = compute_fields(turnover, &index, false);

    let mut marketing = BTreeMap::new();
    for c in contracts {
        merge_marketing(
            &mut marketing,
            compute_contract_marketing(&c.contract.marketing_rules, &turnover.global),
        );
    }
    let bonus_groups = compute_bonus_groups(&index, by_group);
    let report = RebateReport::finish(fields, marketing, bonus_groups);

    debug!(
        contracts = contracts.len(),
        bonus_groups = report.bonus_groups.len(),
        grand_total = %report.totals.grand_total,
        "computed union rebates"
    );
    report
}
