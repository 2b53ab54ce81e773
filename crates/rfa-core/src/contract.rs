use crate::{normalize_target, require_text, Tier, TierSchedule, TierType, ValidationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Population a contract applies to. Each scope has its own default contract
/// and the two are never mixed during resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractScope {
    /// Member accounts.
    Adherent,
    /// The buying group's own supplier agreements.
    Union,
}

impl ContractScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractScope::Adherent => "ADHERENT",
            ContractScope::Union => "UNION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADHERENT" => Some(ContractScope::Adherent),
            "UNION" => Some(ContractScope::Union),
            _ => None,
        }
    }
}

impl fmt::Display for ContractScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marketing payment owed by a supplier platform, outside the rebate itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketingRule {
    None,
    /// Flat amount, independent of turnover.
    Fixed { amount: Decimal },
    /// Fraction of the platform's turnover.
    Rate { rate: Decimal },
}

impl MarketingRule {
    pub fn kind(&self) -> &'static str {
        match self {
            MarketingRule::None => "none",
            MarketingRule::Fixed { .. } => "fixed",
            MarketingRule::Rate { .. } => "rate",
        }
    }
}

/// A named set of threshold-based rate schedules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub name: String,
    pub description: Option<String>,
    pub scope: ContractScope,
    pub is_default: bool,
    pub is_active: bool,
    /// Select GLOBAL rates on the combined turnover of all GLOBAL platforms.
    #[serde(default)]
    pub use_combined_global_rate: bool,
    /// Keyed by platform field key, e.g. `GLOBAL_ACR`.
    #[serde(default)]
    pub marketing_rules: BTreeMap<String, MarketingRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scope of a contract rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleScope {
    /// A supplier platform with separate rebate and bonus schedules.
    Global,
    /// A tri-partite arrangement with a single schedule.
    Tri,
}

impl RuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::Global => "GLOBAL",
            RuleScope::Tri => "TRI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Some(RuleScope::Global),
            "TRI" => Some(RuleScope::Tri),
            _ => None,
        }
    }

    /// Tier types a rule of this scope can carry.
    pub fn tier_types(&self) -> &'static [TierType] {
        match self {
            RuleScope::Global => &[TierType::Rfa, TierType::Bonus],
            RuleScope::Tri => &[TierType::Tri],
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedules held by a rule. The variant fixes which schedules exist, so a
/// GLOBAL rule can never carry `tiers` and a TRI rule never `tiers_rfa`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "UPPERCASE")]
pub enum RuleTiers {
    Global {
        tiers_rfa: TierSchedule,
        tiers_bonus: TierSchedule,
    },
    Tri {
        tiers: TierSchedule,
    },
}

impl RuleTiers {
    pub fn scope(&self) -> RuleScope {
        match self {
            RuleTiers::Global { .. } => RuleScope::Global,
            RuleTiers::Tri { .. } => RuleScope::Tri,
        }
    }

    /// The schedule for `tier_type`, or `None` when this scope has no such schedule.
    pub fn schedule(&self, tier_type: TierType) -> Option<&TierSchedule> {
        match (self, tier_type) {
            (RuleTiers::Global { tiers_rfa, .. }, TierType::Rfa) => Some(tiers_rfa),
            (RuleTiers::Global { tiers_bonus, .. }, TierType::Bonus) => Some(tiers_bonus),
            (RuleTiers::Tri { tiers }, TierType::Tri) => Some(tiers),
            _ => None,
        }
    }
}

/// Extra rate paid on one client group's turnover with a GLOBAL platform,
/// on top of the rule's own schedules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusGroup {
    #[serde(alias = "groupeClient")]
    pub groupe_client: String,
    #[serde(alias = "bonusRate")]
    pub bonus_rate: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl BonusGroup {
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(l) => l.clone(),
            None => format!("Bonus {}", self.groupe_client),
        }
    }
}

/// Validate the bonus groups of a rule of `scope`: only GLOBAL rules carry
/// them, each group appears once, rates lie within [0, 1]. Group names are
/// normalized like assignment targets.
pub fn validate_bonus_groups(
    scope: RuleScope,
    groups: Vec<BonusGroup>,
) -> Result<Vec<BonusGroup>, ValidationError> {
    if scope == RuleScope::Tri && !groups.is_empty() {
        return Err(ValidationError::UnexpectedBonusGroups);
    }
    let mut out: Vec<BonusGroup> = Vec::with_capacity(groups.len());
    for g in groups {
        let groupe_client = normalize_target(require_text("groupe_client", &g.groupe_client)?);
        if g.bonus_rate < Decimal::ZERO || g.bonus_rate > Decimal::ONE {
            return Err(ValidationError::RateOutOfRange(g.bonus_rate));
        }
        if out.iter().any(|o| o.groupe_client == groupe_client) {
            return Err(ValidationError::DuplicateBonusGroup(groupe_client));
        }
        out.push(BonusGroup {
            groupe_client,
            bonus_rate: g.bonus_rate,
            label: g
                .label
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        });
    }
    Ok(out)
}

/// One field's schedules within a contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractRule {
    pub id: RuleId,
    pub contract_id: ContractId,
    /// Field identifier, e.g. `GLOBAL_ACR` or `TRI_DCA_SBS`.
    pub key: String,
    pub label: String,
    #[serde(flatten)]
    pub tiers: RuleTiers,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bonus_groups: Vec<BonusGroup>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractRule {
    pub fn scope(&self) -> RuleScope {
        self.tiers.scope()
    }

    pub fn schedule(&self, tier_type: TierType) -> Option<&TierSchedule> {
        self.tiers.schedule(tier_type)
    }

    /// Whether any of the rule's schedules holds a tier.
    pub fn has_tiers(&self) -> bool {
        self.scope()
            .tier_types()
            .iter()
            .filter_map(|t| self.schedule(*t))
            .any(|s| !s.is_empty())
    }
}

/// Unvalidated input for a new rule, as received from an operator.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RuleDraft {
    pub key: String,
    pub scope: Option<RuleScope>,
    pub label: Option<String>,
    pub tiers: Option<Vec<Tier>>,
    pub tiers_rfa: Option<Vec<Tier>>,
    pub tiers_bonus: Option<Vec<Tier>>,
    #[serde(default)]
    pub bonus_groups: Vec<BonusGroup>,
}

impl RuleDraft {
    /// Check the scope/schedule shape and validate every supplied schedule.
    /// A missing scope means TRI.
    pub fn into_tiers(self) -> Result<RuleTiers, ValidationError> {
        match self.scope.unwrap_or(RuleScope::Tri) {
            RuleScope::Global => {
                if self.tiers.is_some() {
                    return Err(ValidationError::UnexpectedSchedule("tiers"));
                }
                let rfa = self
                    .tiers_rfa
                    .ok_or(ValidationError::MissingSchedule("tiers_rfa"))?;
                let bonus = self
                    .tiers_bonus
                    .ok_or(ValidationError::MissingSchedule("tiers_bonus"))?;
                Ok(RuleTiers::Global {
                    tiers_rfa: TierSchedule::new(rfa)?,
                    tiers_bonus: TierSchedule::new(bonus)?,
                })
            }
            RuleScope::Tri => {
                if self.tiers_rfa.is_some() {
                    return Err(ValidationError::UnexpectedSchedule("tiers_rfa"));
                }
                if self.tiers_bonus.is_some() {
                    return Err(ValidationError::UnexpectedSchedule("tiers_bonus"));
                }
                let tiers = self.tiers.ok_or(ValidationError::MissingSchedule("tiers"))?;
                Ok(RuleTiers::Tri {
                    tiers: TierSchedule::new(tiers)?,
                })
            }
        }
    }
}

/// Partial update of an existing rule. Absent fields are left unchanged.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RulePatch {
    pub label: Option<String>,
    pub tiers: Option<Vec<Tier>>,
    pub tiers_rfa: Option<Vec<Tier>>,
    pub tiers_bonus: Option<Vec<Tier>>,
    pub bonus_groups: Option<Vec<BonusGroup>>,
}

impl RulePatch {
    /// Produce the rule's new schedules. Nothing is applied unless every
    /// supplied schedule validates.
    pub fn apply_to(&self, current: &RuleTiers) -> Result<RuleTiers, ValidationError> {
        match current {
            RuleTiers::Global {
                tiers_rfa,
                tiers_bonus,
            } => {
                if self.tiers.is_some() {
                    return Err(ValidationError::UnexpectedSchedule("tiers"));
                }
                Ok(RuleTiers::Global {
                    tiers_rfa: patched(&self.tiers_rfa, tiers_rfa)?,
                    tiers_bonus: patched(&self.tiers_bonus, tiers_bonus)?,
                })
            }
            RuleTiers::Tri { tiers } => {
                if self.tiers_rfa.is_some() {
                    return Err(ValidationError::UnexpectedSchedule("tiers_rfa"));
                }
                if self.tiers_bonus.is_some() {
                    return Err(ValidationError::UnexpectedSchedule("tiers_bonus"));
                }
                Ok(RuleTiers::Tri {
                    tiers: patched(&self.tiers, tiers)?,
                })
            }
        }
    }
}

fn patched(
    update: &Option<Vec<Tier>>,
    current: &TierSchedule,
) -> Result<TierSchedule, ValidationError> {
    match update {
        Some(t) => TierSchedule::new(t.clone()),
        None => Ok(current.clone()),
    }
}
