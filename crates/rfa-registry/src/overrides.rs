//! Per-target replacements of a contract rule's schedule.

use crate::{not_found, Registry, Result};
use chrono::Utc;
use rfa_core::{
    check_tier_type, normalize_field_key, normalize_target, require_text, Override, OverrideId,
    OverrideKey, TargetType, Tier, TierSchedule, TierType,
};
use rfa_engine::compute_payout;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

fn default_active() -> bool {
    true
}

/// Unvalidated input for a new override.
#[derive(Clone, Debug, Deserialize)]
pub struct OverrideDraft {
    pub target_type: TargetType,
    pub target_value: String,
    pub field_key: String,
    pub tier_type: TierType,
    pub custom_tiers: Vec<Tier>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OverridePatch {
    pub custom_tiers: Option<Vec<Tier>>,
    pub is_active: Option<bool>,
}

/// Selection for [`Registry::list_overrides`]. Empty filter lists everything.
#[derive(Clone, Debug, Default)]
pub struct OverrideFilter {
    pub target_type: Option<TargetType>,
    pub target_value: Option<String>,
    pub field_key: Option<String>,
    pub active_only: bool,
}

impl OverrideFilter {
    fn matches(&self, o: &Override) -> bool {
        self.target_type.map_or(true, |t| t == o.target_type)
            && self
                .target_value
                .as_deref()
                .map_or(true, |v| normalize_target(v) == o.target_value)
            && self
                .field_key
                .as_deref()
                .map_or(true, |k| normalize_field_key(k) == o.field_key)
            && (!self.active_only || o.is_active)
    }
}

/// Payout before and after a candidate schedule, for confirmation screens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OverridePreview {
    pub current_value: Decimal,
    pub simulated_value: Decimal,
    pub difference: Decimal,
}

/// Compare the payout of `current` with the payout `candidate` would give,
/// without storing anything. The candidate is validated like a stored override.
pub fn preview_override(
    turnover: Decimal,
    current: &TierSchedule,
    candidate: Vec<Tier>,
) -> Result<OverridePreview> {
    let candidate = TierSchedule::non_empty("custom_tiers", candidate)?;
    let current_value = compute_payout(turnover, current.tiers());
    let simulated_value = compute_payout(turnover, candidate.tiers());
    Ok(OverridePreview {
        current_value,
        simulated_value,
        difference: simulated_value - current_value,
    })
}

impl Registry {
    /// Store an override. An existing override with the same key is updated
    /// in place and keeps its id.
    pub fn create_override(&mut self, draft: OverrideDraft) -> Result<Override> {
        let target_value = normalize_target(require_text("target_value", &draft.target_value)?);
        let field_key = normalize_field_key(require_text("field_key", &draft.field_key)?);
        check_tier_type(&field_key, draft.tier_type)?;
        let custom_tiers = TierSchedule::non_empty("custom_tiers", draft.custom_tiers)?;

        let key = OverrideKey {
            target_type: draft.target_type,
            target_value,
            field_key,
            tier_type: draft.tier_type,
        };
        let now = Utc::now();
        if let Some(id) = self.override_index.get(&key).copied() {
            let existing = self
                .overrides
                .get_mut(&id)
                .ok_or(not_found("override", id.0))?;
            existing.custom_tiers = custom_tiers;
            existing.is_active = draft.is_active;
            existing.updated_at = now;
            info!(
                override_id = %id,
                target = %key.target_value,
                field = %key.field_key,
                tier_type = %key.tier_type,
                "override replaced"
            );
            return Ok(existing.clone());
        }

        let id = self.alloc_override();
        let o = Override {
            id,
            target_type: key.target_type,
            target_value: key.target_value.clone(),
            field_key: key.field_key.clone(),
            tier_type: key.tier_type,
            custom_tiers,
            is_active: draft.is_active,
            created_at: now,
            updated_at: now,
        };
        info!(
            override_id = %id,
            target = %o.target_value,
            field = %o.field_key,
            tier_type = %o.tier_type,
            "override created"
        );
        self.override_index.insert(key, id);
        self.overrides.insert(id, o.clone());
        Ok(o)
    }

    pub fn update_override(&mut self, id: OverrideId, patch: OverridePatch) -> Result<Override> {
        let tiers = match patch.custom_tiers {
            Some(t) => Some(TierSchedule::non_empty("custom_tiers", t)?),
            None => None,
        };
        let o = self
            .overrides
            .get_mut(&id)
            .ok_or(not_found("override", id.0))?;
        if let Some(t) = tiers {
            o.custom_tiers = t;
        }
        if let Some(active) = patch.is_active {
            o.is_active = active;
        }
        o.updated_at = Utc::now();
        info!(override_id = %id, active = o.is_active, "override updated");
        Ok(o.clone())
    }

    /// Remove an override. Resolution reverts to the contract schedule at once.
    pub fn delete_override(&mut self, id: OverrideId) -> Result<Override> {
        let removed = self
            .overrides
            .remove(&id)
            .ok_or(not_found("override", id.0))?;
        self.override_index.remove(&removed.key());
        info!(
            override_id = %id,
            target = %removed.target_value,
            field = %removed.field_key,
            "override deleted"
        );
        Ok(removed)
    }

    /// Remove every override of one target; returns how many were removed.
    pub fn delete_entity_overrides(
        &mut self,
        target_type: TargetType,
        target_value: &str,
    ) -> usize {
        let value = normalize_target(target_value);
        let ids: Vec<OverrideId> = self
            .overrides
            .values()
            .filter(|o| o.target_type == target_type && o.target_value == value)
            .map(|o| o.id)
            .collect();
        for id in &ids {
            if let Some(o) = self.overrides.remove(id) {
                self.override_index.remove(&o.key());
            }
        }
        info!(%target_type, target = %value, removed = ids.len(), "entity overrides deleted");
        ids.len()
    }

    pub fn entity_overrides(&self, target_type: TargetType, target_value: &str) -> Vec<&Override> {
        self.list_overrides(&OverrideFilter {
            target_type: Some(target_type),
            target_value: Some(target_value.to_string()),
            ..Default::default()
        })
    }

    pub fn list_overrides(&self, filter: &OverrideFilter) -> Vec<&Override> {
        self.overrides.values().filter(|o| filter.matches(o)).collect()
    }

    /// The active override for an exact key, if any.
    pub fn active_override(
        &self,
        target_type: TargetType,
        target_value: &str,
        field_key: &str,
        tier_type: TierType,
    ) -> Option<&Override> {
        let key = OverrideKey {
            target_type,
            target_value: normalize_target(target_value),
            field_key: normalize_field_key(field_key),
            tier_type,
        };
        self.override_index
            .get(&key)
            .and_then(|id| self.overrides.get(id))
            .filter(|o| o.is_active)
    }

    /// Schedule to use for one target and field: the active override's when
    /// there is one, otherwise `contract_schedule` unchanged.
    pub fn resolve_tiers<'a>(
        &'a self,
        target_type: TargetType,
        target_value: &str,
        field_key: &str,
        tier_type: TierType,
        contract_schedule: &'a TierSchedule,
    ) -> &'a TierSchedule {
        match self.active_override(target_type, target_value, field_key, tier_type) {
            Some(o) => {
                debug!(override_id = %o.id, field = field_key, %tier_type, "override applied");
                &o.custom_tiers
            }
            None => contract_schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryError;
    use proptest::prelude::*;
    use rfa_core::ValidationError;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn draft(value: &str, field: &str, tier_type: TierType, tiers: Vec<Tier>) -> OverrideDraft {
        OverrideDraft {
            target_type: TargetType::CodeUnion,
            target_value: value.into(),
            field_key: field.into(),
            tier_type,
            custom_tiers: tiers,
            is_active: true,
        }
    }

    fn flat(rate: &str) -> Vec<Tier> {
        vec![Tier::new(d("0"), d(rate))]
    }

    fn contract_schedule() -> TierSchedule {
        TierSchedule::new(vec![
            Tier::new(d("20000"), d("0.01")),
            Tier::new(d("50000"), d("0.015")),
        ])
        .unwrap()
    }

    const CU: TargetType = TargetType::CodeUnion;

    #[test]
    fn override_wins_then_reverts_on_delete() {
        let mut reg = Registry::new();
        let base = contract_schedule();
        let o = reg
            .create_override(draft(
                "m0022",
                "GLOBAL_ACR",
                TierType::Rfa,
                vec![Tier::new(d("0"), d("0.04"))],
            ))
            .unwrap();
        let got = reg.resolve_tiers(CU, "M0022", "GLOBAL_ACR", TierType::Rfa, &base);
        assert_eq!(got, &o.custom_tiers);
        // other tier type of the same field is untouched
        let got = reg.resolve_tiers(CU, "M0022", "GLOBAL_ACR", TierType::Bonus, &base);
        assert_eq!(got, &base);

        reg.delete_override(o.id).unwrap();
        let got = reg.resolve_tiers(CU, "M0022", "GLOBAL_ACR", TierType::Rfa, &base);
        assert_eq!(got, &base);
        assert!(reg.delete_override(o.id).is_err());
    }

    #[test]
    fn same_key_is_upserted() {
        let mut reg = Registry::new();
        let first = reg
            .create_override(draft("M1", "TRI_DCA_SBS", TierType::Tri, flat("0.02")))
            .unwrap();
        let second = reg
            .create_override(draft(" m1", "tri_dca_sbs", TierType::Tri, flat("0.05")))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(reg.overrides().count(), 1);
        assert_eq!(second.custom_tiers.tiers()[0].rate, d("0.05"));
    }

    #[test]
    fn lookup_normalizes_field_key() {
        let mut reg = Registry::new();
        let base = contract_schedule();
        let o = reg
            .create_override(draft("M1", "global_acr", TierType::Rfa, flat("0.04")))
            .unwrap();
        assert_eq!(o.field_key, "GLOBAL_ACR");
        assert!(reg
            .active_override(CU, "m1", " global_acr ", TierType::Rfa)
            .is_some());
        let got = reg.resolve_tiers(CU, "M1", "Global_Acr", TierType::Rfa, &base);
        assert_eq!(got, &o.custom_tiers);
        let filter = OverrideFilter {
            field_key: Some("global_acr".into()),
            ..Default::default()
        };
        assert_eq!(reg.list_overrides(&filter).len(), 1);
    }

    #[test]
    fn validation_on_create_and_update() {
        let mut reg = Registry::new();
        assert_eq!(
            reg.create_override(draft("M1", "GLOBAL_ACR", TierType::Rfa, vec![])),
            Err(ValidationError::EmptySchedule("custom_tiers").into())
        );
        assert_eq!(
            reg.create_override(draft("M1", "TRI_DCA_SBS", TierType::Bonus, flat("0.01"))),
            Err(ValidationError::TierTypeMismatch {
                field_key: "TRI_DCA_SBS".into(),
                tier_type: TierType::Bonus
            }
            .into())
        );
        assert_eq!(
            reg.create_override(draft(
                "M1",
                "GLOBAL_ACR",
                TierType::Rfa,
                vec![Tier::new(d("-5"), d("0.01"))]
            )),
            Err(ValidationError::NegativeThreshold(d("-5")).into())
        );

        let o = reg
            .create_override(draft(
                "M1",
                "GLOBAL_ACR",
                TierType::Rfa,
                vec![Tier::new(d("50000"), d("0.03")), Tier::new(d("0"), d("0.01"))],
            ))
            .unwrap();
        // caller order is re-sorted
        assert_eq!(o.custom_tiers.tiers()[0].min, d("0"));

        let bad = OverridePatch {
            custom_tiers: Some(vec![]),
            is_active: Some(false),
        };
        assert!(reg.update_override(o.id, bad).is_err());
        assert!(reg
            .active_override(CU, "M1", "GLOBAL_ACR", TierType::Rfa)
            .is_some());
        assert!(matches!(
            reg.update_override(OverrideId(77), OverridePatch::default()),
            Err(RegistryError::NotFound { kind: "override", id: 77 })
        ));
    }

    #[test]
    fn inactive_override_is_ignored() {
        let mut reg = Registry::new();
        let base = contract_schedule();
        let o = reg
            .create_override(draft("M1", "GLOBAL_ACR", TierType::Rfa, flat("0.04")))
            .unwrap();
        reg.update_override(
            o.id,
            OverridePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        let got = reg.resolve_tiers(CU, "M1", "GLOBAL_ACR", TierType::Rfa, &base);
        assert_eq!(got, &base);
        let active_only = OverrideFilter {
            active_only: true,
            ..Default::default()
        };
        assert_eq!(reg.list_overrides(&active_only).len(), 0);
        assert_eq!(reg.list_overrides(&OverrideFilter::default()).len(), 1);
    }

    #[test]
    fn entity_housekeeping() {
        let mut reg = Registry::new();
        let one = vec![Tier::new(d("0"), d("0.01"))];
        reg.create_override(draft("M1", "GLOBAL_ACR", TierType::Rfa, one.clone())).unwrap();
        reg.create_override(draft("M1", "GLOBAL_ACR", TierType::Bonus, one.clone())).unwrap();
        reg.create_override(draft("M2", "GLOBAL_ACR", TierType::Rfa, one)).unwrap();

        assert_eq!(reg.entity_overrides(TargetType::CodeUnion, "m1").len(), 2);
        assert_eq!(reg.entity_overrides(TargetType::GroupeClient, "M1").len(), 0);
        assert_eq!(reg.delete_entity_overrides(TargetType::CodeUnion, "M1"), 2);
        assert_eq!(reg.overrides().count(), 1);
        assert_eq!(reg.delete_entity_overrides(TargetType::CodeUnion, "M1"), 0);
    }

    #[test]
    fn preview_reports_difference() {
        let base = contract_schedule();
        let p = preview_override(d("60000"), &base, vec![Tier::new(d("0"), d("0.02"))]).unwrap();
        assert_eq!(p.current_value, d("900"));
        assert_eq!(p.simulated_value, d("1200"));
        assert_eq!(p.difference, d("300"));
        assert!(preview_override(d("1"), &base, vec![]).is_err());
    }

    #[test]
    fn draft_wire_format() {
        let draft: OverrideDraft = serde_json::from_str(
            r#"{"target_type":"GROUPE_CLIENT","target_value":"grp","field_key":"TRI_SCHAEFFLER",
                "tier_type":"tri","custom_tiers":[{"min":"0","rate":"0.06"}]}"#,
        )
        .unwrap();
        assert!(draft.is_active);
        assert_eq!(draft.target_type, TargetType::GroupeClient);
        let mut reg = Registry::new();
        let o = reg.create_override(draft).unwrap();
        assert_eq!(o.target_value, "GRP");
    }

    proptest! {
        #[test]
        fn active_override_always_wins(rate in 0i64..=100, min in 0i64..1_000_000) {
            let mut reg = Registry::new();
            let base = contract_schedule();
            let tiers = vec![Tier::new(Decimal::from(min), Decimal::new(rate, 2))];
            let o = reg
                .create_override(draft("M1", "GLOBAL_DCA", TierType::Bonus, tiers))
                .unwrap();
            let got = reg.resolve_tiers(CU, "M1", "GLOBAL_DCA", TierType::Bonus, &base);
            prop_assert_eq!(got, &o.custom_tiers);
        }

        #[test]
        fn delete_restores_contract_schedule(rate in 0i64..=100) {
            let mut reg = Registry::new();
            let base = contract_schedule();
            let before = reg
                .resolve_tiers(CU, "M1", "GLOBAL_DCA", TierType::Rfa, &base)
                .clone();
            let tiers = vec![Tier::new(Decimal::ZERO, Decimal::new(rate, 2))];
            let o = reg
                .create_override(draft("M1", "GLOBAL_DCA", TierType::Rfa, tiers))
                .unwrap();
            reg.delete_override(o.id).unwrap();
            let after = reg.resolve_tiers(CU, "M1", "GLOBAL_DCA", TierType::Rfa, &base);
            prop_assert_eq!(&before, after);
        }
    }
}
