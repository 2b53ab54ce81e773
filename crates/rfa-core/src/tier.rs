use crate::ValidationError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One step of a threshold schedule: from `min` turnover upward, `rate` applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Minimum turnover activating this tier (>= 0).
    pub min: Decimal,
    /// Fraction of turnover paid out, e.g. 0.02 = 2%.
    pub rate: Decimal,
}

impl Tier {
    pub fn new(min: Decimal, rate: Decimal) -> Self {
        Self { min, rate }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.min < Decimal::ZERO {
            return Err(ValidationError::NegativeThreshold(self.min));
        }
        if self.rate < Decimal::ZERO || self.rate > Decimal::ONE {
            return Err(ValidationError::RateOutOfRange(self.rate));
        }
        Ok(())
    }
}

/// An ordered, validated tier schedule.
///
/// Invariants: every `min >= 0`, every `rate` in [0,1], sorted ascending by
/// `min`, no two tiers share a `min`. Deserialization goes through the same
/// validation, so a schedule read back from storage can be used directly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tier>", into = "Vec<Tier>")]
pub struct TierSchedule(Vec<Tier>);

impl TierSchedule {
    /// Validate and sort caller-supplied tiers. Input order is not trusted.
    pub fn new(mut tiers: Vec<Tier>) -> Result<Self, ValidationError> {
        for t in &tiers {
            t.validate()?;
        }
        tiers.sort_by(|a, b| a.min.cmp(&b.min));
        for pair in tiers.windows(2) {
            if pair[0].min == pair[1].min {
                return Err(ValidationError::DuplicateThreshold(pair[1].min));
            }
        }
        Ok(Self(tiers))
    }

    /// Like [`TierSchedule::new`] but also rejects an empty schedule.
    pub fn non_empty(field: &'static str, tiers: Vec<Tier>) -> Result<Self, ValidationError> {
        if tiers.is_empty() {
            return Err(ValidationError::EmptySchedule(field));
        }
        Self::new(tiers)
    }

    /// Parse a persisted schedule (`[{"min":..,"rate":..}, ..]`) and validate it.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let tiers: Vec<Tier> = serde_json::from_str(text)
            .map_err(|e| ValidationError::MalformedSchedule(e.to_string()))?;
        Self::new(tiers)
    }

    /// Built-in tables only; callers guarantee the invariants hold.
    pub(crate) fn from_static(steps: &[(i64, i64, u32)]) -> Self {
        let tiers: Vec<Tier> = steps
            .iter()
            .map(|&(min, rate, scale)| Tier::new(Decimal::from(min), Decimal::new(rate, scale)))
            .collect();
        debug_assert!(Self::new(tiers.clone()).is_ok());
        Self(tiers)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Lowest threshold of the schedule, if any.
    pub fn first_min(&self) -> Option<Decimal> {
        self.0.first().map(|t| t.min)
    }
}

impl TryFrom<Vec<Tier>> for TierSchedule {
    type Error = ValidationError;

    fn try_from(tiers: Vec<Tier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<TierSchedule> for Vec<Tier> {
    fn from(s: TierSchedule) -> Self {
        s.0
    }
}

impl AsRef<[Tier]> for TierSchedule {
    fn as_ref(&self) -> &[Tier] {
        &self.0
    }
}
