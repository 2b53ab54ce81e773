//! Catalog of known turnover fields and their display labels.

use crate::{RuleScope, TierType, ValidationError};
use serde::Serialize;

/// A known turnover field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub key: &'static str,
    pub label: &'static str,
    pub scope: RuleScope,
}

/// Key/label pair exposed to editors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub key: String,
    pub label: String,
}

const fn global(key: &'static str, label: &'static str) -> FieldDef {
    FieldDef {
        key,
        label,
        scope: RuleScope::Global,
    }
}

const fn tri(key: &'static str, label: &'static str) -> FieldDef {
    FieldDef {
        key,
        label,
        scope: RuleScope::Tri,
    }
}

/// Supplier platforms with separate rebate and bonus schedules.
pub static GLOBAL_FIELDS: [FieldDef; 4] = [
    global("GLOBAL_ACR", "ACR (global)"),
    global("GLOBAL_ALLIANCE", "ALLIANCE (global)"),
    global("GLOBAL_DCA", "DCA (global)"),
    global("GLOBAL_EXADIS", "EXADIS (global)"),
];

/// Tri-partite arrangements with a single schedule.
pub static TRI_FIELDS: [FieldDef; 21] = [
    tri("TRI_DCA_SBS", "DCA - SBS (NK)"),
    tri("TRI_DCA_DAYCO", "DCA - Dayco"),
    tri("TRI_ACR_FREINAGE", "ACR - Freinage"),
    tri("TRI_ACR_EMBRAYAGE", "ACR - Embrayage"),
    tri("TRI_ACR_FILTRE", "ACR - Filtre"),
    tri("TRI_ACR_DISTRIBUTION", "ACR - Distribution"),
    tri("TRI_ACR_MACHINE_TOURNANTE", "ACR - Machine tournante"),
    tri("TRI_ACR_LIAISON_AU_SOL", "ACR - Liaison au sol"),
    tri("TRI_EXADIS_FREINAGE", "EXADIS - Freinage"),
    tri("TRI_EXADIS_EMBRAYAGE", "EXADIS - Embrayage (LUK/SACHS)"),
    tri("TRI_EXADIS_FILTRATION", "EXADIS - Filtration"),
    tri("TRI_EXADIS_DISTRIBUTION", "EXADIS - Distribution"),
    tri("TRI_EXADIS_ETANCHEITE", "EXADIS - Etancheite (ELRING)"),
    tri("TRI_EXADIS_THERMIQUE", "EXADIS - Thermique (NRF)"),
    tri("TRI_SCHAEFFLER", "Schaeffler"),
    tri("TRI_ALLIANCE_DELPHI", "ALLIANCE - Delphi"),
    tri("TRI_ALLIANCE_BREMBO", "ALLIANCE - Brembo ADD"),
    tri("TRI_ALLIANCE_SOGEFI", "ALLIANCE - Sogefi"),
    tri("TRI_ALLIANCE_SKF", "ALLIANCE - SKF"),
    tri("TRI_ALLIANCE_NAPA", "ALLIANCE - NAPA"),
    tri("TRI_PURFLUX_COOPERS", "Purflux / Coopers (Alliance+ACR)"),
];

/// Canonical form of a field key: trimmed and upper-cased.
pub fn normalize_field_key(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

/// Look up a known field by key.
pub fn field(key: &str) -> Option<&'static FieldDef> {
    GLOBAL_FIELDS
        .iter()
        .chain(TRI_FIELDS.iter())
        .find(|f| f.key == key)
}

/// Display label for a key; unknown keys label themselves.
pub fn field_label(key: &str) -> String {
    field(key)
        .map(|f| f.label.to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Every tri-partite key with its label.
pub fn tri_fields() -> Vec<FieldInfo> {
    TRI_FIELDS
        .iter()
        .map(|f| FieldInfo {
            key: f.key.to_string(),
            label: f.label.to_string(),
        })
        .collect()
}

pub fn is_global_field(key: &str) -> bool {
    GLOBAL_FIELDS.iter().any(|f| f.key == key)
}

pub fn is_tri_field(key: &str) -> bool {
    TRI_FIELDS.iter().any(|f| f.key == key)
}

/// For a known field, check that `tier_type` exists for its scope.
/// Keys outside the catalog are accepted as-is.
pub fn check_tier_type(field_key: &str, tier_type: TierType) -> Result<(), ValidationError> {
    match field(field_key) {
        Some(f) if !f.scope.tier_types().contains(&tier_type) => {
            Err(ValidationError::TierTypeMismatch {
                field_key: field_key.to_string(),
                tier_type,
            })
        }
        _ => Ok(()),
    }
}
