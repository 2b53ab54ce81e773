//! Tier selection and payout over threshold schedules.

use rfa_core::{Tier, TierSchedule};
use rust_decimal::Decimal;
use serde::Serialize;

/// Highest tier whose `min` the turnover has cleared, or `None` when the
/// turnover is below every threshold (or the schedule is empty).
///
/// Does not rely on the slice being sorted. If two tiers share a `min`, the
/// later one in slice order wins.
///
/// Example:
/// let s = [Tier::new(0.into(), Decimal::new(2, 2)), Tier::new(100_000.into(), Decimal::new(3, 2))];
/// assert_eq!(select_tier(150_000.into(), &s).unwrap().min, 100_000.into());
pub fn select_tier(turnover: Decimal, tiers: &[Tier]) -> Option<&Tier> {
    tiers
        .iter()
        .filter(|t| t.min <= turnover)
        .max_by(|a, b| a.min.cmp(&b.min))
}

/// `turnover × rate` of the selected tier; zero when no tier is selected.
/// No rounding is applied.
pub fn compute_payout(turnover: Decimal, tiers: &[Tier]) -> Decimal {
    select_tier(turnover, tiers)
        .map(|t| turnover * t.rate)
        .unwrap_or(Decimal::ZERO)
}

/// Minimum turnover that activates `target`, or `None` if `target` is not a
/// tier of the schedule.
pub fn solve_turnover_for_tier(target: &Tier, tiers: &[Tier]) -> Option<Decimal> {
    tiers.iter().any(|t| t == target).then_some(target.min)
}

/// The next threshold above the turnover and how much turnover is missing to reach it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NextTier {
    pub tier: Tier,
    pub missing: Decimal,
}

pub fn next_tier(turnover: Decimal, tiers: &[Tier]) -> Option<NextTier> {
    tiers
        .iter()
        .filter(|t| t.min > turnover)
        .min_by(|a, b| a.min.cmp(&b.min))
        .map(|t| NextTier {
            tier: *t,
            missing: t.min - turnover,
        })
}

/// Detailed result of applying a schedule to a turnover figure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TierOutcome {
    pub turnover: Decimal,
    /// Threshold of the selected tier.
    pub selected_min: Option<Decimal>,
    /// Lowest threshold of the schedule.
    pub min_threshold: Option<Decimal>,
    pub rate: Decimal,
    pub triggered: bool,
    pub value: Decimal,
}

impl TierOutcome {
    pub fn zero(turnover: Decimal) -> Self {
        Self {
            turnover,
            selected_min: None,
            min_threshold: None,
            rate: Decimal::ZERO,
            triggered: false,
            value: Decimal::ZERO,
        }
    }
}

/// Select a tier for `turnover` and compute its payout.
pub fn evaluate(turnover: Decimal, schedule: &TierSchedule) -> TierOutcome {
    evaluate_with_basis(turnover, turnover, schedule)
}

/// Select the tier at `basis` but pay its rate on `turnover`. Used when a rate
/// is earned on a combined figure and applied to one platform's share.
pub fn evaluate_with_basis(
    basis: Decimal,
    turnover: Decimal,
    schedule: &TierSchedule,
) -> TierOutcome {
    let min_threshold = schedule.first_min();
    match select_tier(basis, schedule.tiers()) {
        Some(tier) => TierOutcome {
            turnover,
            selected_min: Some(tier.min),
            min_threshold,
            rate: tier.rate,
            triggered: true,
            value: turnover * tier.rate,
        },
        None => TierOutcome {
            min_threshold,
            ..TierOutcome::zero(turnover)
        },
    }
}
