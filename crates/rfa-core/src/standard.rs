//! Standard tariff used to seed a fresh installation.

use crate::{RuleTiers, TierSchedule, GLOBAL_FIELDS, TRI_FIELDS};

pub const STANDARD_CONTRACT_NAME: &str = "BASE_STANDARD";
pub const STANDARD_CONTRACT_DESCRIPTION: &str = "Standard contract with the default schedules";

/// Rebate schedule shared by every GLOBAL platform: 1% from 20k up to 3.5% from 200k.
pub fn standard_global_rfa() -> TierSchedule {
    TierSchedule::from_static(&[
        (20_000, 1, 2),
        (50_000, 15, 3),
        (75_000, 2, 2),
        (100_000, 25, 3),
        (150_000, 3, 2),
        (200_000, 35, 3),
    ])
}

/// Bonus schedule shared by every GLOBAL platform: 0.5% from 20k up to 3% from 200k.
pub fn standard_global_bonus() -> TierSchedule {
    TierSchedule::from_static(&[
        (20_000, 5, 3),
        (50_000, 1, 2),
        (75_000, 15, 3),
        (100_000, 2, 2),
        (150_000, 25, 3),
        (200_000, 3, 2),
    ])
}

/// Standard single-step schedule of a tri-partite key. Keys without a
/// standard arrangement get an empty schedule.
pub fn standard_tri(key: &str) -> TierSchedule {
    let step: &[(i64, i64, u32)] = match key {
        "TRI_DCA_SBS" => &[(25_000, 3, 2)],
        "TRI_SCHAEFFLER" => &[(20_000, 5, 2)],
        "TRI_ALLIANCE_DELPHI" | "TRI_ALLIANCE_BREMBO" => &[(20_000, 8, 2)],
        "TRI_ALLIANCE_SOGEFI" => &[(20_000, 4, 2)],
        "TRI_ACR_FREINAGE" | "TRI_ACR_EMBRAYAGE" => &[(50_000, 4, 2)],
        "TRI_ACR_FILTRE" => &[(25_000, 15, 3)],
        "TRI_ACR_DISTRIBUTION" => &[(25_000, 3, 2)],
        // unconditional 2%
        "TRI_ACR_MACHINE_TOURNANTE" | "TRI_ACR_LIAISON_AU_SOL" => &[(0, 2, 2)],
        "TRI_EXADIS_EMBRAYAGE" => &[(50_000, 4, 2)],
        "TRI_EXADIS_FILTRATION" => &[(25_000, 2, 2)],
        "TRI_EXADIS_DISTRIBUTION" => &[(25_000, 3, 2)],
        "TRI_EXADIS_ETANCHEITE" => &[(5_000, 2, 2)],
        "TRI_EXADIS_THERMIQUE" => &[(5_000, 15, 3)],
        _ => &[],
    };
    TierSchedule::from_static(step)
}

/// A rule of the standard contract, ready to be attached to a contract id.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardRule {
    pub key: &'static str,
    pub label: &'static str,
    pub tiers: RuleTiers,
}

/// All rules of the standard contract: every GLOBAL platform then every TRI key.
pub fn standard_rules() -> Vec<StandardRule> {
    let globals = GLOBAL_FIELDS.iter().map(|f| StandardRule {
        key: f.key,
        label: f.label,
        tiers: RuleTiers::Global {
            tiers_rfa: standard_global_rfa(),
            tiers_bonus: standard_global_bonus(),
        },
    });
    let tris = TRI_FIELDS.iter().map(|f| StandardRule {
        key: f.key,
        label: f.label,
        tiers: RuleTiers::Tri {
            tiers: standard_tri(f.key),
        },
    });
    globals.chain(tris).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RuleScope, TierType};
    use rust_decimal::Decimal;

    #[test]
    fn standard_schedules_are_valid() {
        for rule in standard_rules() {
            for tt in rule.tiers.scope().tier_types() {
                let s = rule.tiers.schedule(*tt).unwrap();
                assert_eq!(TierSchedule::new(s.tiers().to_vec()).as_ref(), Ok(s));
            }
        }
    }

    #[test]
    fn standard_rules_cover_catalog() {
        let rules = standard_rules();
        assert_eq!(rules.len(), GLOBAL_FIELDS.len() + TRI_FIELDS.len());
        assert_eq!(
            rules.iter().filter(|r| r.tiers.scope() == RuleScope::Global).count(),
            4
        );
    }

    #[test]
    fn global_rfa_top_step() {
        let rfa = standard_global_rfa();
        let top = rfa.tiers().last().unwrap();
        assert_eq!(top.min, Decimal::from(200_000));
        assert_eq!(top.rate, Decimal::new(35, 3));
        let sbs = standard_tri("TRI_DCA_SBS");
        assert_eq!(sbs.tiers()[0].rate, Decimal::new(3, 2));
        assert!(standard_tri("TRI_ALLIANCE_NAPA").is_empty());
        let rule = &standard_rules()[0];
        assert!(rule.tiers.schedule(TierType::Bonus).is_some());
    }
}
