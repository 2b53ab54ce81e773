//! Union-side margin simulator.
//!
//! The buying group receives `commission_rate` of a supplier's turnover and
//! pays `rate` of it back to the account; the difference is its margin. The
//! simulator compares an old and a new rebate rate and answers which turnover
//! would keep (or grow) the old margin under the new rate.

use crate::MarginError;
use rust_decimal::Decimal;
use serde::Serialize;

/// Default commission received from each supplier, as fractions.
pub fn default_commission_rate(supplier: &str) -> Option<Decimal> {
    match supplier.trim().to_ascii_uppercase().as_str() {
        "ACR" => Some(Decimal::new(18, 2)),
        "DCA" => Some(Decimal::new(16, 2)),
        "CAL" => Some(Decimal::new(14, 2)),
        "EXADIS" => Some(Decimal::new(13, 2)),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarginSimulator {
    commission_rate: Decimal,
    old_rate: Decimal,
    new_rate: Decimal,
    turnover: Decimal,
}

impl MarginSimulator {
    pub fn new(
        commission_rate: Decimal,
        old_rate: Decimal,
        new_rate: Decimal,
        turnover: Decimal,
    ) -> Result<Self, MarginError> {
        for (name, v) in [
            ("commission_rate", commission_rate),
            ("old_rate", old_rate),
            ("new_rate", new_rate),
            ("turnover", turnover),
        ] {
            if v < Decimal::ZERO {
                return Err(MarginError::NegativeInput(name));
            }
        }
        Ok(Self {
            commission_rate,
            old_rate,
            new_rate,
            turnover,
        })
    }

    pub fn rebate_amount(&self, rate: Decimal) -> Decimal {
        self.turnover * rate
    }

    pub fn margin(&self, rate: Decimal) -> Decimal {
        self.turnover * (self.commission_rate - rate)
    }

    pub fn delta_margin(&self) -> Decimal {
        self.margin(self.new_rate) - self.margin(self.old_rate)
    }

    pub fn delta_rebate(&self) -> Decimal {
        self.rebate_amount(self.new_rate) - self.rebate_amount(self.old_rate)
    }

    /// Rebate rate at which the margin is zero for any turnover.
    pub fn break_even_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// Amount of an impact expressed as a share of turnover.
    pub fn impact(&self, rate: Decimal) -> Impact {
        Impact {
            rate,
            amount: self.turnover * rate,
        }
    }

    fn denominator(&self) -> Result<Decimal, MarginError> {
        let denom = self.commission_rate - self.new_rate;
        if denom <= Decimal::ZERO {
            return Err(MarginError::UndefinedSimulation {
                commission_rate: self.commission_rate,
                new_rate: self.new_rate,
            });
        }
        Ok(denom)
    }

    /// Turnover at which the new rate yields the old margin.
    pub fn min_turnover_to_preserve_margin(&self) -> Result<Decimal, MarginError> {
        let denom = self.denominator()?;
        Ok(self.margin(self.old_rate) / denom)
    }

    /// Turnover at which the new rate yields the old margin grown by `pct`
    /// (0.10 = +10%).
    pub fn turnover_for_target_margin_increase(
        &self,
        pct: Decimal,
    ) -> Result<Decimal, MarginError> {
        let denom = self.denominator()?;
        Ok(self.margin(self.old_rate) * (Decimal::ONE + pct) / denom)
    }

    /// Additional turnover needed to preserve the margin (never negative).
    pub fn min_turnover_delta(&self) -> Result<Decimal, MarginError> {
        let needed = self.min_turnover_to_preserve_margin()?;
        Ok((needed - self.turnover).max(Decimal::ZERO))
    }

    /// Additional turnover needed to reach the target margin (never negative).
    pub fn target_turnover_delta(&self, pct: Decimal) -> Result<Decimal, MarginError> {
        let needed = self.turnover_for_target_margin_increase(pct)?;
        Ok((needed - self.turnover).max(Decimal::ZERO))
    }

    /// Full report for a target margin increase `pct` and the impact rates
    /// of a client-side and a supplier-side change.
    pub fn report(&self, pct: Decimal, impacts: ImpactRates) -> MarginReport {
        let inverse = match (
            self.min_turnover_to_preserve_margin(),
            self.turnover_for_target_margin_increase(pct),
        ) {
            (Ok(min_turnover), Ok(target_turnover)) => InverseTurnover::Defined {
                min_turnover,
                min_turnover_delta: (min_turnover - self.turnover).max(Decimal::ZERO),
                target_turnover,
                target_turnover_delta: (target_turnover - self.turnover).max(Decimal::ZERO),
            },
            _ => InverseTurnover::Undefined,
        };
        MarginReport {
            turnover: self.turnover,
            commission_rate: self.commission_rate,
            old_rate: self.old_rate,
            new_rate: self.new_rate,
            rebate_old: self.rebate_amount(self.old_rate),
            rebate_new: self.rebate_amount(self.new_rate),
            margin_old: self.margin(self.old_rate),
            margin_new: self.margin(self.new_rate),
            delta_rebate: self.delta_rebate(),
            delta_margin: self.delta_margin(),
            break_even_rate: self.break_even_rate(),
            impact_client: self.impact(impacts.client),
            impact_supplier: self.impact(impacts.supplier),
            inverse,
        }
    }
}

/// Inverse-query part of a report. `Undefined` is distinct from any number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InverseTurnover {
    Defined {
        min_turnover: Decimal,
        min_turnover_delta: Decimal,
        target_turnover: Decimal,
        target_turnover_delta: Decimal,
    },
    Undefined,
}

/// Rates of turnover used for the client and supplier impact figures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImpactRates {
    pub client: Decimal,
    pub supplier: Decimal,
}

impl Default for ImpactRates {
    /// 0.1% on both sides.
    fn default() -> Self {
        Self {
            client: Decimal::new(1, 3),
            supplier: Decimal::new(1, 3),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Impact {
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MarginReport {
    pub turnover: Decimal,
    pub commission_rate: Decimal,
    pub old_rate: Decimal,
    pub new_rate: Decimal,
    pub rebate_old: Decimal,
    pub rebate_new: Decimal,
    pub margin_old: Decimal,
    pub margin_new: Decimal,
    pub delta_rebate: Decimal,
    pub delta_margin: Decimal,
    pub break_even_rate: Decimal,
    pub impact_client: Impact,
    pub impact_supplier: Impact,
    pub inverse: InverseTurnover,
}
