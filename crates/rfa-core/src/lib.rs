#![deny(warnings)]

//! Core domain models and invariants for rebate ("RFA") contracts.
//!
//! This crate defines the serializable records shared by the engine, the
//! registry and the storage layer, together with the write-time validation
//! that guarantees every tier schedule reaching a computation is well formed.

mod contract;
mod fields;
mod standard;
mod target;
mod tier;

pub use contract::*;
pub use fields::*;
pub use standard::*;
pub use target::*;
pub use tier::*;

use rust_decimal::Decimal;
use thiserror::Error;

/// Validation errors for domain invariants. Each variant names the offending
/// field or value so callers can surface it as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Tier threshold below zero.
    #[error("tier min must be >= 0, got {0}")]
    NegativeThreshold(Decimal),
    /// Rate outside [0, 1].
    #[error("tier rate must be within [0,1], got {0}")]
    RateOutOfRange(Decimal),
    /// Two tiers share the same threshold.
    #[error("duplicate tier min {0}")]
    DuplicateThreshold(Decimal),
    /// A schedule that must carry at least one tier is empty.
    #[error("schedule `{0}` must contain at least one tier")]
    EmptySchedule(&'static str),
    /// A schedule required by the rule scope is missing.
    #[error("missing schedule `{0}` for this rule scope")]
    MissingSchedule(&'static str),
    /// A schedule was supplied that the rule scope never populates.
    #[error("schedule `{0}` is not allowed for this rule scope")]
    UnexpectedSchedule(&'static str),
    /// Serialized schedule could not be parsed.
    #[error("malformed tier schedule: {0}")]
    MalformedSchedule(String),
    /// Marketing rate above 100%.
    #[error("malformed marketing rule for `{0}`")]
    MalformedMarketing(String),
    /// Required text field is blank.
    #[error("field `{0}` must not be blank")]
    Blank(&'static str),
    /// Field key not present in the field catalog for this scope.
    #[error("unknown field key `{0}`")]
    UnknownField(String),
    /// A rule for this key already exists on the contract.
    #[error("a rule for `{0}` already exists on this contract")]
    DuplicateRule(String),
    /// Bonus groups given for a TRI rule.
    #[error("bonus groups only apply to GLOBAL rules")]
    UnexpectedBonusGroups,
    /// The same client group appears twice in one rule's bonus groups.
    #[error("bonus group `{0}` is listed twice")]
    DuplicateBonusGroup(String),
    /// Override tier type does not match the scope of its field.
    #[error("tier type {tier_type} does not apply to field `{field_key}`")]
    TierTypeMismatch {
        field_key: String,
        tier_type: TierType,
    },
}

/// Reject blank text fields. Returns the trimmed value.
pub fn require_text<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Blank(field));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_trims() {
        assert_eq!(require_text("name", "  Base ").unwrap(), "Base");
        assert_eq!(
            require_text("name", "   "),
            Err(ValidationError::Blank("name"))
        );
    }

    #[test]
    fn errors_render_offending_value() {
        let e = ValidationError::NegativeThreshold(Decimal::new(-5, 0));
        assert_eq!(e.to_string(), "tier min must be >= 0, got -5");
        let e = ValidationError::TierTypeMismatch {
            field_key: "TRI_DCA_SBS".into(),
            tier_type: TierType::Rfa,
        };
        assert_eq!(
            e.to_string(),
            "tier type rfa does not apply to field `TRI_DCA_SBS`"
        );
    }
}
