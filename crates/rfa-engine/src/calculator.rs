//! Per-account rebate computation.
//!
//! Walks every field an account has turnover on, asks a [`ScheduleLookup`]
//! for the schedule that applies (override or contract rule) and totals the
//! outcomes together with the contract's marketing payments.

use crate::marketing::{compute_contract_marketing, MarketingPayment};
use crate::tier_engine::{evaluate, evaluate_with_basis, TierOutcome};
use crate::union::BonusGroupPayment;
use rfa_core::{field_label, is_global_field, Contract, ContractRule, TierSchedule, TierType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Turnover of one account, keyed by field key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTurnover {
    #[serde(default)]
    pub global: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub tri: BTreeMap<String, Decimal>,
}

impl AccountTurnover {
    /// Sum of the four GLOBAL platforms. Other keys under `global` are ignored.
    pub fn platform_total(&self) -> Decimal {
        self.global
            .iter()
            .filter(|(k, _)| is_global_field(k))
            .map(|(_, v)| *v)
            .sum()
    }

    /// Add `other` field by field.
    pub fn add(&mut self, other: &AccountTurnover) {
        for (k, v) in &other.global {
            *self.global.entry(k.clone()).or_default() += *v;
        }
        for (k, v) in &other.tri {
            *self.tri.entry(k.clone()).or_default() += *v;
        }
    }
}

/// Platforms searched, in order, for the rule whose schedules price every
/// platform of a combined-rate contract.
pub const COMBINED_REFERENCE_ORDER: [&str; 4] =
    ["GLOBAL_ACR", "GLOBAL_DCA", "GLOBAL_ALLIANCE", "GLOBAL_EXADIS"];

/// Schedule that applies to one `(field, tier type)` of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSchedule<'a> {
    /// `None` when neither an override nor a contract rule covers the field.
    pub schedule: Option<&'a TierSchedule>,
    pub overridden: bool,
}

impl<'a> FieldSchedule<'a> {
    pub fn missing() -> Self {
        Self {
            schedule: None,
            overridden: false,
        }
    }
}

/// Source of the schedules used by [`compute_rebates`].
pub trait ScheduleLookup {
    fn schedule(&self, field_key: &str, tier_type: TierType) -> FieldSchedule<'_>;

    /// The contract rule's own schedule, ignoring overrides.
    fn rule_schedule(&self, field_key: &str, tier_type: TierType) -> Option<&TierSchedule>;

    /// Display label of a field.
    fn label(&self, field_key: &str) -> String {
        field_label(field_key)
    }
}

/// Contract rules indexed by key. Serves as a lookup without overrides.
#[derive(Clone, Debug, Default)]
pub struct RuleIndex<'a> {
    by_key: BTreeMap<&'a str, &'a ContractRule>,
}

impl<'a> RuleIndex<'a> {
    pub fn new(rules: impl IntoIterator<Item = &'a ContractRule>) -> Self {
        Self {
            by_key: rules.into_iter().map(|r| (r.key.as_str(), r)).collect(),
        }
    }

    pub fn rule(&self, key: &str) -> Option<&'a ContractRule> {
        self.by_key.get(key).copied()
    }

    pub fn rules(&self) -> impl Iterator<Item = &'a ContractRule> + '_ {
        self.by_key.values().copied()
    }
}

impl ScheduleLookup for RuleIndex<'_> {
    fn schedule(&self, field_key: &str, tier_type: TierType) -> FieldSchedule<'_> {
        FieldSchedule {
            schedule: self.rule_schedule(field_key, tier_type),
            overridden: false,
        }
    }

    fn rule_schedule(&self, field_key: &str, tier_type: TierType) -> Option<&TierSchedule> {
        self.rule(field_key).and_then(|r| r.schedule(tier_type))
    }

    fn label(&self, field_key: &str) -> String {
        match self.rule(field_key) {
            Some(rule) => rule.label.clone(),
            None => field_label(field_key),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GlobalFieldResult {
    pub label: String,
    pub turnover: Decimal,
    pub rfa: TierOutcome,
    pub bonus: TierOutcome,
    pub total_rate: Decimal,
    pub total_value: Decimal,
    pub triggered: bool,
    pub has_override: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TriFieldResult {
    pub label: String,
    pub turnover: Decimal,
    pub outcome: TierOutcome,
    pub has_override: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RebateTotals {
    pub global_rfa: Decimal,
    pub global_bonus: Decimal,
    pub global_total: Decimal,
    pub tri_total: Decimal,
    pub marketing_total: Decimal,
    pub bonus_groups_total: Decimal,
    pub grand_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RebateReport {
    pub global: BTreeMap<String, GlobalFieldResult>,
    pub tri: BTreeMap<String, TriFieldResult>,
    pub marketing: BTreeMap<String, MarketingPayment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bonus_groups: Vec<BonusGroupPayment>,
    pub totals: RebateTotals,
}

impl RebateReport {
    /// Assemble a report from its parts and fill in the derived totals.
    pub(crate) fn finish(
        fields: FieldResults,
        marketing: BTreeMap<String, MarketingPayment>,
        bonus_groups: Vec<BonusGroupPayment>,
    ) -> Self {
        let mut totals = fields.totals;
        totals.marketing_total = marketing.values().map(|p| p.amount).sum();
        totals.bonus_groups_total = bonus_groups.iter().map(|b| b.value).sum();
        totals.global_total = totals.global_rfa + totals.global_bonus;
        totals.grand_total = totals.global_total
            + totals.tri_total
            + totals.marketing_total
            + totals.bonus_groups_total;
        Self {
            global: fields.global,
            tri: fields.tri,
            marketing,
            bonus_groups,
            totals,
        }
    }
}

/// Per-field outcomes before marketing and bonus groups are added.
pub(crate) struct FieldResults {
    pub global: BTreeMap<String, GlobalFieldResult>,
    pub tri: BTreeMap<String, TriFieldResult>,
    pub totals: RebateTotals,
}

fn outcome(basis: Decimal, turnover: Decimal, fs: FieldSchedule<'_>) -> TierOutcome {
    match fs.schedule {
        Some(s) => evaluate_with_basis(basis, turnover, s),
        None => TierOutcome::zero(turnover),
    }
}

/// First platform of [`COMBINED_REFERENCE_ORDER`] the contract has a rule for.
fn combined_reference(lookup: &impl ScheduleLookup) -> Option<&'static str> {
    COMBINED_REFERENCE_ORDER
        .into_iter()
        .find(|k| lookup.rule_schedule(k, TierType::Rfa).is_some())
}

/// Outcomes of every field present in `turnover`.
///
/// In combined mode each platform is priced at the platform total with the
/// reference rule's schedules; a platform with an active override keeps its
/// override schedule but is still priced at the combined basis.
pub(crate) fn compute_fields(
    turnover: &AccountTurnover,
    lookup: &impl ScheduleLookup,
    combined: bool,
) -> FieldResults {
    let combined_basis = turnover.platform_total();
    let reference = if combined {
        combined_reference(lookup)
    } else {
        None
    };
    let mut totals = RebateTotals::default();

    let mut global = BTreeMap::new();
    for (key, &amount) in &turnover.global {
        let pooled = combined && is_global_field(key);
        let basis = if pooled { combined_basis } else { amount };
        let pick = |tier_type: TierType| {
            let own = lookup.schedule(key, tier_type);
            match reference {
                Some(r) if pooled && !own.overridden => FieldSchedule {
                    schedule: lookup.rule_schedule(r, tier_type),
                    overridden: false,
                },
                _ => own,
            }
        };
        let rfa_fs = pick(TierType::Rfa);
        let bonus_fs = pick(TierType::Bonus);
        let rfa = outcome(basis, amount, rfa_fs);
        let bonus = outcome(basis, amount, bonus_fs);
        totals.global_rfa += rfa.value;
        totals.global_bonus += bonus.value;
        global.insert(
            key.clone(),
            GlobalFieldResult {
                label: lookup.label(key),
                turnover: amount,
                total_rate: rfa.rate + bonus.rate,
                total_value: rfa.value + bonus.value,
                triggered: rfa.triggered || bonus.triggered,
                has_override: rfa_fs.overridden || bonus_fs.overridden,
                rfa,
                bonus,
            },
        );
    }

    let mut tri = BTreeMap::new();
    for (key, &amount) in &turnover.tri {
        let fs = lookup.schedule(key, TierType::Tri);
        let outcome = match fs.schedule {
            Some(s) => evaluate(amount, s),
            None => TierOutcome::zero(amount),
        };
        totals.tri_total += outcome.value;
        tri.insert(
            key.clone(),
            TriFieldResult {
                label: lookup.label(key),
                turnover: amount,
                outcome,
                has_override: fs.overridden,
            },
        );
    }

    FieldResults {
        global,
        tri,
        totals,
    }
}

/// Compute every rebate, bonus and marketing payment owed to one account
/// under `contract`, with schedules supplied by `lookup`.
pub fn compute_rebates(
    turnover: &AccountTurnover,
    lookup: &impl ScheduleLookup,
    contract: &Contract,
) -> RebateReport {
    let fields = compute_fields(turnover, lookup, contract.use_combined_global_rate);
    let marketing = compute_contract_marketing(&contract.marketing_rules, &turnover.global);
    let report = RebateReport::finish(fields, marketing, Vec::new());

    debug!(
        contract = %contract.name,
        combined = contract.use_combined_global_rate,
        grand_total = %report.totals.grand_total,
        "computed account rebates"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rfa_core::{
        standard_global_bonus, standard_global_rfa, ContractId, ContractScope, MarketingRule,
        RuleId, RuleTiers, Tier,
    };

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn contract(combined: bool) -> Contract {
        Contract {
            id: ContractId(1),
            name: "BASE".into(),
            description: None,
            scope: ContractScope::Adherent,
            is_default: true,
            is_active: true,
            use_combined_global_rate: combined,
            marketing_rules: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rule(id: u64, key: &str, tiers: RuleTiers) -> ContractRule {
        ContractRule {
            id: RuleId(id),
            contract_id: ContractId(1),
            key: key.into(),
            label: format!("label {key}"),
            tiers,
            bonus_groups: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rules() -> Vec<ContractRule> {
        let global = RuleTiers::Global {
            tiers_rfa: standard_global_rfa(),
            tiers_bonus: standard_global_bonus(),
        };
        vec![
            rule(1, "GLOBAL_ACR", global.clone()),
            rule(2, "GLOBAL_DCA", global),
            rule(
                3,
                "TRI_DCA_SBS",
                RuleTiers::Tri {
                    tiers: TierSchedule::new(vec![Tier::new(d("25000"), d("0.03"))]).unwrap(),
                },
            ),
        ]
    }

    fn turnover() -> AccountTurnover {
        let mut t = AccountTurnover::default();
        t.global.insert("GLOBAL_ACR".into(), d("120000"));
        t.global.insert("GLOBAL_DCA".into(), d("30000"));
        t.tri.insert("TRI_DCA_SBS".into(), d("26000"));
        t.tri.insert("TRI_UNKNOWN".into(), d("90000"));
        t
    }

    #[test]
    fn per_field_outcomes_and_totals() {
        let rules = rules();
        let index = RuleIndex::new(&rules);
        let report = compute_rebates(&turnover(), &index, &contract(false));

        let acr = &report.global["GLOBAL_ACR"];
        // 100k step: 2.5% rfa, 2% bonus
        assert_eq!(acr.rfa.value, d("3000"));
        assert_eq!(acr.bonus.value, d("2400"));
        assert_eq!(acr.total_rate, d("0.045"));
        assert_eq!(acr.label, "label GLOBAL_ACR");
        assert!(!acr.has_override);

        let dca = &report.global["GLOBAL_DCA"];
        assert_eq!(dca.rfa.value, d("300"));
        assert_eq!(dca.bonus.value, d("150"));

        assert_eq!(report.tri["TRI_DCA_SBS"].outcome.value, d("780"));
        assert_eq!(report.tri["TRI_UNKNOWN"].outcome.value, Decimal::ZERO);
        assert!(!report.tri["TRI_UNKNOWN"].outcome.triggered);

        assert_eq!(report.totals.global_rfa, d("3300"));
        assert_eq!(report.totals.global_bonus, d("2550"));
        assert_eq!(report.totals.global_total, d("5850"));
        assert_eq!(report.totals.tri_total, d("780"));
        assert_eq!(report.totals.grand_total, d("6630"));
    }

    #[test]
    fn combined_rate_uses_total_global_turnover() {
        let rules = rules();
        let index = RuleIndex::new(&rules);
        let report = compute_rebates(&turnover(), &index, &contract(true));
        // 150k combined: 3% rfa, 2.5% bonus applied to the 30k share
        let dca = &report.global["GLOBAL_DCA"];
        assert_eq!(dca.rfa.rate, d("0.03"));
        assert_eq!(dca.rfa.value, d("900"));
        assert_eq!(dca.bonus.value, d("750"));
        assert_eq!(dca.turnover, d("30000"));
    }

    #[test]
    fn marketing_is_added_to_grand_total() {
        let rules = rules();
        let index = RuleIndex::new(&rules);
        let mut c = contract(false);
        c.marketing_rules
            .insert("GLOBAL_ACR".into(), MarketingRule::Rate { rate: d("0.005") });
        c.marketing_rules
            .insert("GLOBAL_EXADIS".into(), MarketingRule::Fixed { amount: d("250") });
        let report = compute_rebates(&turnover(), &index, &c);
        assert_eq!(report.marketing["GLOBAL_ACR"].amount, d("600"));
        assert_eq!(report.marketing["GLOBAL_EXADIS"].amount, d("250"));
        assert_eq!(report.totals.marketing_total, d("850"));
        assert_eq!(report.totals.grand_total, d("7480"));
    }

    struct FlatOverride<'a> {
        inner: RuleIndex<'a>,
        acr: TierSchedule,
    }

    impl ScheduleLookup for FlatOverride<'_> {
        fn schedule(&self, field_key: &str, tier_type: TierType) -> FieldSchedule<'_> {
            if field_key == "GLOBAL_ACR" && tier_type == TierType::Rfa {
                return FieldSchedule {
                    schedule: Some(&self.acr),
                    overridden: true,
                };
            }
            self.inner.schedule(field_key, tier_type)
        }

        fn rule_schedule(&self, field_key: &str, tier_type: TierType) -> Option<&TierSchedule> {
            self.inner.rule_schedule(field_key, tier_type)
        }
    }

    #[test]
    fn overridden_schedule_is_flagged() {
        let rules = rules();
        let lookup = FlatOverride {
            inner: RuleIndex::new(&rules),
            acr: TierSchedule::new(vec![Tier::new(d("0"), d("0.05"))]).unwrap(),
        };
        let report = compute_rebates(&turnover(), &lookup, &contract(false));
        let acr = &report.global["GLOBAL_ACR"];
        assert!(acr.has_override);
        assert_eq!(acr.rfa.value, d("6000"));
        assert_eq!(acr.label, field_label("GLOBAL_ACR"));
        assert!(!report.global["GLOBAL_DCA"].has_override);
    }

    #[test]
    fn turnover_deserializes_with_missing_sections() {
        let t: AccountTurnover =
            serde_json::from_str(r#"{"global":{"GLOBAL_ACR":"100"}}"#).unwrap();
        assert!(t.tri.is_empty());
        assert_eq!(t.platform_total(), d("100"));
    }

    #[test]
    fn combined_basis_ignores_non_platform_keys() {
        let rules = rules();
        let index = RuleIndex::new(&rules);
        let mut t = AccountTurnover::default();
        t.global.insert("GLOBAL_DCA".into(), d("30000"));
        t.global.insert("TRI_DCA_SBS".into(), d("500000"));
        assert_eq!(t.platform_total(), d("30000"));

        let report = compute_rebates(&t, &index, &contract(true));
        // 30k alone sits on the 1% rfa step, not the 3.5% one of 530k
        let dca = &report.global["GLOBAL_DCA"];
        assert_eq!(dca.rfa.rate, d("0.01"));
        assert_eq!(dca.rfa.value, d("300"));
        assert_eq!(report.global["TRI_DCA_SBS"].total_value, Decimal::ZERO);
    }

    fn flat(rate: &str) -> TierSchedule {
        TierSchedule::new(vec![Tier::new(d("0"), d(rate))]).unwrap()
    }

    fn platform_rules() -> Vec<ContractRule> {
        let global = |rfa: &str| RuleTiers::Global {
            tiers_rfa: flat(rfa),
            tiers_bonus: TierSchedule::empty(),
        };
        vec![
            rule(1, "GLOBAL_DCA", global("0.02")),
            rule(2, "GLOBAL_EXADIS", global("0.05")),
            rule(3, "GLOBAL_ACR", global("0.01")),
        ]
    }

    fn platform_turnover() -> AccountTurnover {
        let mut t = AccountTurnover::default();
        t.global.insert("GLOBAL_ACR".into(), d("10000"));
        t.global.insert("GLOBAL_DCA".into(), d("20000"));
        t.global.insert("GLOBAL_EXADIS".into(), d("30000"));
        t
    }

    #[test]
    fn combined_mode_prices_every_platform_with_the_reference_rule() {
        let rules = platform_rules();
        let index = RuleIndex::new(&rules);
        let report = compute_rebates(&platform_turnover(), &index, &contract(true));
        // ACR comes first in the reference order
        let expected = [("GLOBAL_ACR", "100"), ("GLOBAL_DCA", "200"), ("GLOBAL_EXADIS", "300")];
        for (key, value) in expected {
            assert_eq!(report.global[key].rfa.rate, d("0.01"), "{key}");
            assert_eq!(report.global[key].rfa.value, d(value), "{key}");
        }

        // without an ACR rule DCA becomes the reference
        let no_acr: Vec<ContractRule> =
            rules.iter().filter(|r| r.key != "GLOBAL_ACR").cloned().collect();
        let index = RuleIndex::new(&no_acr);
        let report = compute_rebates(&platform_turnover(), &index, &contract(true));
        assert_eq!(report.global["GLOBAL_EXADIS"].rfa.rate, d("0.02"));
        assert_eq!(report.global["GLOBAL_ACR"].rfa.value, d("200"));

        // separate mode keeps each platform's own schedule
        let index = RuleIndex::new(&rules);
        let report = compute_rebates(&platform_turnover(), &index, &contract(false));
        assert_eq!(report.global["GLOBAL_EXADIS"].rfa.rate, d("0.05"));
    }

    #[test]
    fn override_beats_reference_in_combined_mode() {
        let rules = platform_rules();
        let lookup = FlatOverride {
            inner: RuleIndex::new(&rules),
            acr: flat("0.04"),
        };
        let report = compute_rebates(&platform_turnover(), &lookup, &contract(true));
        let acr = &report.global["GLOBAL_ACR"];
        assert!(acr.has_override);
        assert_eq!(acr.rfa.value, d("400"));
        // the reference is still the ACR contract rule, not its override
        assert_eq!(report.global["GLOBAL_DCA"].rfa.rate, d("0.01"));
    }

    #[test]
    fn turnovers_add_field_by_field() {
        let mut a = turnover();
        a.add(&platform_turnover());
        assert_eq!(a.global["GLOBAL_ACR"], d("130000"));
        assert_eq!(a.global["GLOBAL_EXADIS"], d("30000"));
        assert_eq!(a.tri["TRI_DCA_SBS"], d("26000"));
    }
}
