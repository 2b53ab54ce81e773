use crate::{ContractId, TierSchedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of identity an assignment or override targets.
///
/// The derived ordering is the resolution precedence: a variant declared later
/// outranks an earlier one, so `CodeUnion > GroupeClient`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// An account group ("groupe client").
    GroupeClient,
    /// A single member account, identified by its union code.
    CodeUnion,
}

impl TargetType {
    /// All target types, strongest first.
    pub fn by_precedence() -> [TargetType; 2] {
        let mut all = [TargetType::GroupeClient, TargetType::CodeUnion];
        all.sort_by(|a, b| b.cmp(a));
        all
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::GroupeClient => "GROUPE_CLIENT",
            TargetType::CodeUnion => "CODE_UNION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CODE_UNION" => Some(TargetType::CodeUnion),
            "GROUPE_CLIENT" => Some(TargetType::GroupeClient),
            _ => None,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which schedule of a contract rule an override replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierType {
    Rfa,
    Bonus,
    Tri,
}

impl TierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierType::Rfa => "rfa",
            TierType::Bonus => "bonus",
            TierType::Tri => "tri",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfa" => Some(TierType::Rfa),
            "bonus" => Some(TierType::Bonus),
            "tri" => Some(TierType::Tri),
            _ => None,
        }
    }
}

impl fmt::Display for TierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of a target identity: trimmed and upper-cased, so
/// `" m0022 "` and `"M0022"` name the same account.
pub fn normalize_target(value: &str) -> String {
    value.trim().to_uppercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub u64);

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit binding of an account or account group to a contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub target_type: TargetType,
    /// Normalized target identity (see [`normalize_target`]).
    pub target_value: String,
    pub contract_id: ContractId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OverrideId(pub u64);

impl fmt::Display for OverrideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural key of an override: at most one record exists per key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverrideKey {
    pub target_type: TargetType,
    pub target_value: String,
    pub field_key: String,
    pub tier_type: TierType,
}

/// Account-specific replacement of one contract rule's schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub id: OverrideId,
    pub target_type: TargetType,
    /// Normalized target identity (see [`normalize_target`]).
    pub target_value: String,
    pub field_key: String,
    pub tier_type: TierType,
    pub custom_tiers: TierSchedule,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Override {
    pub fn key(&self) -> OverrideKey {
        OverrideKey {
            target_type: self.target_type,
            target_value: self.target_value.clone(),
            field_key: self.field_key.clone(),
            tier_type: self.tier_type,
        }
    }
}
