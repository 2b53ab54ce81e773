//! Marketing payments per supplier platform.

use rfa_core::{field_label, MarketingRule, ValidationError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Marketing amount owed for one platform.
pub fn compute_marketing(turnover: Decimal, rule: &MarketingRule) -> Decimal {
    match rule {
        MarketingRule::None => Decimal::ZERO,
        MarketingRule::Fixed { amount } => *amount,
        MarketingRule::Rate { rate } => turnover * *rate,
    }
}

/// Save-time normalization of a contract's marketing configuration.
///
/// `none` rules and rules whose amount or rate is zero or negative are
/// inactive and dropped. A rate above 100% is rejected.
pub fn normalize_marketing_rules(
    rules: BTreeMap<String, MarketingRule>,
) -> Result<BTreeMap<String, MarketingRule>, ValidationError> {
    let mut out = BTreeMap::new();
    for (key, rule) in rules {
        let value = match rule {
            MarketingRule::None => continue,
            MarketingRule::Fixed { amount } => amount,
            MarketingRule::Rate { rate } if rate > Decimal::ONE => {
                return Err(ValidationError::MalformedMarketing(key));
            }
            MarketingRule::Rate { rate } => rate,
        };
        if value <= Decimal::ZERO {
            debug!(%key, %value, "dropping inactive marketing rule");
            continue;
        }
        out.insert(key, rule);
    }
    Ok(out)
}

/// Marketing payment computed for one platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarketingPayment {
    pub label: String,
    pub calculation_type: &'static str,
    pub rate: Option<Decimal>,
    /// Turnover the rate was applied to (zero when the platform had none).
    pub base_amount: Decimal,
    pub amount: Decimal,
}

/// Payments for every rule of a contract. A platform absent from
/// `global_turnover` has a zero base; only positive amounts are reported.
pub fn compute_contract_marketing(
    rules: &BTreeMap<String, MarketingRule>,
    global_turnover: &BTreeMap<String, Decimal>,
) -> BTreeMap<String, MarketingPayment> {
    let mut out = BTreeMap::new();
    for (key, rule) in rules {
        let base = global_turnover.get(key).copied().unwrap_or(Decimal::ZERO);
        let amount = compute_marketing(base, rule);
        if amount <= Decimal::ZERO {
            continue;
        }
        let rate = match rule {
            MarketingRule::Rate { rate } => Some(*rate),
            _ => None,
        };
        out.insert(
            key.clone(),
            MarketingPayment {
                label: field_label(key),
                calculation_type: rule.kind(),
                rate,
                base_amount: base,
                amount,
            },
        );
    }
    out
}
