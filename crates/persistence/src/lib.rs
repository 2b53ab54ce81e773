#![deny(warnings)]

//! Persistence layer: SQLite schema and registry storage.

use chrono::{DateTime, Utc};
use rfa_core::{
    validate_bonus_groups, Assignment, AssignmentId, BonusGroup, Contract, ContractId,
    ContractRule, ContractScope, MarketingRule, Override, OverrideId, RuleId, RuleScope,
    RuleTiers, TargetType, TierSchedule, TierType,
};
use rfa_registry::{Registry, RegistryError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::FromRow;
pub use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Returns the default SQLite URL used for local storage.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./data/rfa.db"
}

/// Create the parent directory of a file-backed SQLite URL.
pub fn ensure_sqlite_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(|p| p.split('?').next().unwrap_or(p));
    if let Some(path) = path.filter(|p| !p.starts_with(":memory:")) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// A stored row cannot be turned back into a record.
    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt {
        table: &'static str,
        id: i64,
        reason: String,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open (creating if needed) the database at `url` and apply migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    // every connection to an in-memory database is a separate database
    let max = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!(%url, "database ready");
    Ok(pool)
}

#[derive(FromRow)]
struct ContractRow {
    id: i64,
    name: String,
    description: Option<String>,
    scope: String,
    is_default: bool,
    is_active: bool,
    use_combined_global_rate: bool,
    marketing_rules: String,
    created_at: String,
    updated_at: String,
}

#[derive(FromRow)]
struct RuleRow {
    id: i64,
    contract_id: i64,
    key: String,
    label: String,
    scope: String,
    tiers: Option<String>,
    tiers_rfa: Option<String>,
    tiers_bonus: Option<String>,
    bonus_groups: String,
    created_at: String,
    updated_at: String,
}

#[derive(FromRow)]
struct AssignmentRow {
    id: i64,
    target_type: String,
    target_value: String,
    contract_id: i64,
    created_at: String,
}

#[derive(FromRow)]
struct OverrideRow {
    id: i64,
    target_type: String,
    target_value: String,
    field_key: String,
    tier_type: String,
    custom_tiers: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

/// Field-level decoding for one row; errors are reported against that row.
struct Decoder {
    table: &'static str,
    id: i64,
}

impl Decoder {
    fn err(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            table: self.table,
            id: self.id,
            reason: reason.into(),
        }
    }

    fn id(&self, v: i64) -> Result<u64> {
        u64::try_from(v).map_err(|_| self.err(format!("negative id {v}")))
    }

    fn time(&self, s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| self.err(format!("timestamp `{s}`: {e}")))
    }

    fn schedule(&self, column: &str, s: &str) -> Result<TierSchedule> {
        TierSchedule::from_json(s).map_err(|e| self.err(format!("{column}: {e}")))
    }

    fn required<'a>(&self, column: &str, v: &'a Option<String>) -> Result<&'a str> {
        v.as_deref().ok_or_else(|| self.err(format!("{column} is null")))
    }

    fn target_type(&self, s: &str) -> Result<TargetType> {
        TargetType::parse(s).ok_or_else(|| self.err(format!("target_type `{s}`")))
    }
}

impl ContractRow {
    fn into_record(self) -> Result<Contract> {
        let d = Decoder {
            table: "contracts",
            id: self.id,
        };
        let marketing_rules: BTreeMap<String, MarketingRule> =
            serde_json::from_str(&self.marketing_rules)
                .map_err(|e| d.err(format!("marketing_rules: {e}")))?;
        Ok(Contract {
            id: ContractId(d.id(self.id)?),
            scope: ContractScope::parse(&self.scope)
                .ok_or_else(|| d.err(format!("scope `{}`", self.scope)))?,
            name: self.name,
            description: self.description,
            is_default: self.is_default,
            is_active: self.is_active,
            use_combined_global_rate: self.use_combined_global_rate,
            marketing_rules,
            created_at: d.time(&self.created_at)?,
            updated_at: d.time(&self.updated_at)?,
        })
    }
}

impl RuleRow {
    fn into_record(self) -> Result<ContractRule> {
        let d = Decoder {
            table: "contract_rules",
            id: self.id,
        };
        let tiers = match RuleScope::parse(&self.scope) {
            Some(RuleScope::Global) => RuleTiers::Global {
                tiers_rfa: d.schedule("tiers_rfa", d.required("tiers_rfa", &self.tiers_rfa)?)?,
                tiers_bonus: d
                    .schedule("tiers_bonus", d.required("tiers_bonus", &self.tiers_bonus)?)?,
            },
            Some(RuleScope::Tri) => RuleTiers::Tri {
                tiers: d.schedule("tiers", d.required("tiers", &self.tiers)?)?,
            },
            None => return Err(d.err(format!("scope `{}`", self.scope))),
        };
        let bonus_groups: Vec<BonusGroup> = serde_json::from_str(&self.bonus_groups)
            .map_err(|e| d.err(format!("bonus_groups: {e}")))?;
        let bonus_groups = validate_bonus_groups(tiers.scope(), bonus_groups)
            .map_err(|e| d.err(format!("bonus_groups: {e}")))?;
        Ok(ContractRule {
            id: RuleId(d.id(self.id)?),
            contract_id: ContractId(d.id(self.contract_id)?),
            key: self.key,
            label: self.label,
            tiers,
            bonus_groups,
            created_at: d.time(&self.created_at)?,
            updated_at: d.time(&self.updated_at)?,
        })
    }
}

impl AssignmentRow {
    fn into_record(self) -> Result<Assignment> {
        let d = Decoder {
            table: "assignments",
            id: self.id,
        };
        Ok(Assignment {
            id: AssignmentId(d.id(self.id)?),
            target_type: d.target_type(&self.target_type)?,
            target_value: self.target_value,
            contract_id: ContractId(d.id(self.contract_id)?),
            created_at: d.time(&self.created_at)?,
        })
    }
}

impl OverrideRow {
    fn into_record(self) -> Result<Override> {
        let d = Decoder {
            table: "overrides",
            id: self.id,
        };
        Ok(Override {
            id: OverrideId(d.id(self.id)?),
            target_type: d.target_type(&self.target_type)?,
            tier_type: TierType::parse(&self.tier_type)
                .ok_or_else(|| d.err(format!("tier_type `{}`", self.tier_type)))?,
            custom_tiers: d.schedule("custom_tiers", &self.custom_tiers)?,
            target_value: self.target_value,
            field_key: self.field_key,
            is_active: self.is_active,
            created_at: d.time(&self.created_at)?,
            updated_at: d.time(&self.updated_at)?,
        })
    }
}

fn schedule_json(schedule: &TierSchedule) -> Result<String> {
    Ok(serde_json::to_string(schedule)?)
}

fn rule_columns(tiers: &RuleTiers) -> Result<(Option<String>, Option<String>, Option<String>)> {
    Ok(match tiers {
        RuleTiers::Global {
            tiers_rfa,
            tiers_bonus,
        } => (
            None,
            Some(schedule_json(tiers_rfa)?),
            Some(schedule_json(tiers_bonus)?),
        ),
        RuleTiers::Tri { tiers } => (Some(schedule_json(tiers)?), None, None),
    })
}

/// Replace the stored state with `registry` in one transaction.
pub async fn save_registry(pool: &SqlitePool, registry: &Registry) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in [
        "DELETE FROM overrides",
        "DELETE FROM assignments",
        "DELETE FROM contract_rules",
        "DELETE FROM contracts",
    ] {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }

    for c in registry.contracts() {
        sqlx::query(
            "INSERT INTO contracts (id, name, description, scope, is_default, is_active, \
             use_combined_global_rate, marketing_rules, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(c.id.0 as i64)
        .bind(&c.name)
        .bind(c.description.as_deref())
        .bind(c.scope.as_str())
        .bind(c.is_default)
        .bind(c.is_active)
        .bind(c.use_combined_global_rate)
        .bind(serde_json::to_string(&c.marketing_rules)?)
        .bind(c.created_at.to_rfc3339())
        .bind(c.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    for r in registry.rules() {
        let (tiers, tiers_rfa, tiers_bonus) = rule_columns(&r.tiers)?;
        sqlx::query(
            "INSERT INTO contract_rules (id, contract_id, key, label, scope, tiers, tiers_rfa, \
             tiers_bonus, bonus_groups, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(r.id.0 as i64)
        .bind(r.contract_id.0 as i64)
        .bind(&r.key)
        .bind(&r.label)
        .bind(r.scope().as_str())
        .bind(tiers)
        .bind(tiers_rfa)
        .bind(tiers_bonus)
        .bind(serde_json::to_string(&r.bonus_groups)?)
        .bind(r.created_at.to_rfc3339())
        .bind(r.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    for a in registry.assignments() {
        insert_assignment(a).execute(&mut *tx).await?;
    }
    for o in registry.overrides() {
        insert_override(o)?.execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!(
        contracts = registry.contracts().count(),
        rules = registry.rules().count(),
        assignments = registry.assignments().count(),
        overrides = registry.overrides().count(),
        "registry saved"
    );
    Ok(())
}

type Query<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn insert_assignment(a: &Assignment) -> Query<'_> {
    sqlx::query(
        "INSERT INTO assignments (id, target_type, target_value, contract_id, created_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (target_type, target_value) DO UPDATE SET \
         id = excluded.id, contract_id = excluded.contract_id, created_at = excluded.created_at",
    )
    .bind(a.id.0 as i64)
    .bind(a.target_type.as_str())
    .bind(&a.target_value)
    .bind(a.contract_id.0 as i64)
    .bind(a.created_at.to_rfc3339())
}

fn insert_override(o: &Override) -> Result<Query<'_>> {
    Ok(sqlx::query(
        "INSERT INTO overrides (id, target_type, target_value, field_key, tier_type, custom_tiers, \
         is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (target_type, target_value, field_key, tier_type) DO UPDATE SET \
         custom_tiers = excluded.custom_tiers, is_active = excluded.is_active, \
         updated_at = excluded.updated_at",
    )
    .bind(o.id.0 as i64)
    .bind(o.target_type.as_str())
    .bind(&o.target_value)
    .bind(&o.field_key)
    .bind(o.tier_type.as_str())
    .bind(schedule_json(&o.custom_tiers)?)
    .bind(o.is_active)
    .bind(o.created_at.to_rfc3339())
    .bind(o.updated_at.to_rfc3339()))
}

/// Read every record back and rebuild the registry. Each schedule is
/// validated again on the way in.
pub async fn load_registry(pool: &SqlitePool) -> Result<Registry> {
    let contracts = sqlx::query_as::<_, ContractRow>(
        "SELECT id, name, description, scope, is_default, is_active, use_combined_global_rate, \
         marketing_rules, created_at, updated_at FROM contracts ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(ContractRow::into_record)
    .collect::<Result<Vec<_>>>()?;

    let rules = sqlx::query_as::<_, RuleRow>(
        "SELECT id, contract_id, key, label, scope, tiers, tiers_rfa, tiers_bonus, bonus_groups, \
         created_at, updated_at FROM contract_rules ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(RuleRow::into_record)
    .collect::<Result<Vec<_>>>()?;

    let assignments = sqlx::query_as::<_, AssignmentRow>(
        "SELECT id, target_type, target_value, contract_id, created_at FROM assignments \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(AssignmentRow::into_record)
    .collect::<Result<Vec<_>>>()?;

    let overrides = sqlx::query_as::<_, OverrideRow>(
        "SELECT id, target_type, target_value, field_key, tier_type, custom_tiers, is_active, \
         created_at, updated_at FROM overrides ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(OverrideRow::into_record)
    .collect::<Result<Vec<_>>>()?;

    info!(
        contracts = contracts.len(),
        rules = rules.len(),
        assignments = assignments.len(),
        overrides = overrides.len(),
        "registry loaded"
    );
    Ok(Registry::from_records(contracts, rules, assignments, overrides)?)
}

/// Store one assignment; an existing row for the same target is replaced.
pub async fn upsert_assignment(pool: &SqlitePool, assignment: &Assignment) -> Result<()> {
    insert_assignment(assignment).execute(pool).await?;
    Ok(())
}

/// Store one override; an existing row with the same key is updated in place.
pub async fn upsert_override(pool: &SqlitePool, o: &Override) -> Result<()> {
    insert_override(o)?.execute(pool).await?;
    Ok(())
}

/// Returns whether a row was removed.
pub async fn delete_override(pool: &SqlitePool, id: OverrideId) -> Result<bool> {
    let done = sqlx::query("DELETE FROM overrides WHERE id = ?")
        .bind(id.0 as i64)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

/// Delete a contract row; its rules and assignments go with it. Returns
/// whether a row was removed. The default contract of a scope is refused.
pub async fn delete_contract(pool: &SqlitePool, id: ContractId) -> Result<bool> {
    let is_default: Option<bool> =
        sqlx::query_scalar("SELECT is_default FROM contracts WHERE id = ?")
            .bind(id.0 as i64)
            .fetch_optional(pool)
            .await?;
    match is_default {
        None => Ok(false),
        Some(true) => Err(RegistryError::InvalidOperation(format!(
            "contract {id} is a default contract and cannot be deleted"
        ))
        .into()),
        Some(false) => {
            let done = sqlx::query("DELETE FROM contracts WHERE id = ? AND is_default = 0")
                .bind(id.0 as i64)
                .execute(pool)
                .await?;
            Ok(done.rows_affected() > 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfa_core::Tier;
    use rfa_registry::{AccountRef, OverrideDraft};
    use rust_decimal::Decimal;

    async fn memory_pool() -> SqlitePool {
        init_db("sqlite::memory:").await.unwrap()
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn seeded() -> Registry {
        let mut reg = Registry::new();
        let std = reg.seed_standard_contract().unwrap();
        let copy = reg.duplicate_contract(std.id).unwrap();
        reg.create_assignment(TargetType::GroupeClient, "grp nord", copy.id)
            .unwrap();
        reg.create_override(OverrideDraft {
            target_type: TargetType::CodeUnion,
            target_value: "M0022".into(),
            field_key: "GLOBAL_ACR".into(),
            tier_type: TierType::Bonus,
            custom_tiers: vec![Tier::new(Decimal::ZERO, Decimal::new(4, 2))],
            is_active: true,
        })
        .unwrap();
        reg
    }

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let pool = memory_pool().await;
        let reg = seeded();
        save_registry(&pool, &reg).await.unwrap();
        let loaded = load_registry(&pool).await.unwrap();

        assert_eq!(loaded.contracts().count(), 2);
        assert_eq!(loaded.rules().count(), reg.rules().count());
        assert_eq!(loaded.assignments().count(), 1);
        let a: Vec<_> = reg.contracts().collect();
        let b: Vec<_> = loaded.contracts().collect();
        assert_eq!(a, b);
        let o = loaded.overrides().next().unwrap();
        assert_eq!(o.custom_tiers, reg.overrides().next().unwrap().custom_tiers);

        let account = AccountRef::client("M0022", Some("GRP NORD"));
        let r = loaded
            .resolve_contract(ContractScope::Adherent, &account)
            .unwrap();
        assert!(!r.contract.is_default);

        // saving again replaces rather than duplicates
        save_registry(&pool, &loaded).await.unwrap();
        assert_eq!(count(&pool, "contracts").await, 2);
    }

    #[tokio::test]
    async fn assignment_upsert_keeps_one_row_per_target() {
        let pool = memory_pool().await;
        let mut reg = seeded();
        save_registry(&pool, &reg).await.unwrap();
        let std = reg.default_contract(ContractScope::Adherent).unwrap().id;
        let a = reg
            .create_assignment(TargetType::GroupeClient, "GRP NORD", std)
            .unwrap();
        upsert_assignment(&pool, &a).await.unwrap();
        assert_eq!(count(&pool, "assignments").await, 1);
        let loaded = load_registry(&pool).await.unwrap();
        let stored = loaded
            .find_assignment(TargetType::GroupeClient, "GRP NORD")
            .unwrap();
        assert_eq!(stored.contract_id, std);
        assert_eq!(stored.id, a.id);
    }

    #[tokio::test]
    async fn override_upsert_and_delete() {
        let pool = memory_pool().await;
        let mut reg = seeded();
        save_registry(&pool, &reg).await.unwrap();
        let o = reg
            .create_override(OverrideDraft {
                target_type: TargetType::CodeUnion,
                target_value: "m0022".into(),
                field_key: "GLOBAL_ACR".into(),
                tier_type: TierType::Bonus,
                custom_tiers: vec![Tier::new(Decimal::ZERO, Decimal::new(6, 2))],
                is_active: false,
            })
            .unwrap();
        upsert_override(&pool, &o).await.unwrap();
        assert_eq!(count(&pool, "overrides").await, 1);
        let loaded = load_registry(&pool).await.unwrap();
        let stored = loaded.overrides().next().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.custom_tiers.tiers()[0].rate, Decimal::new(6, 2));

        assert!(delete_override(&pool, o.id).await.unwrap());
        assert!(!delete_override(&pool, o.id).await.unwrap());
        assert_eq!(count(&pool, "overrides").await, 0);
    }

    #[tokio::test]
    async fn contract_delete_cascades() {
        let pool = memory_pool().await;
        let reg = seeded();
        save_registry(&pool, &reg).await.unwrap();
        let copy = reg
            .contracts()
            .find(|c| !c.is_default)
            .map(|c| c.id)
            .unwrap();
        let before = count(&pool, "contract_rules").await;
        assert!(delete_contract(&pool, copy).await.unwrap());
        assert_eq!(count(&pool, "contract_rules").await * 2, before);
        assert_eq!(count(&pool, "assignments").await, 0);
    }

    #[tokio::test]
    async fn default_contract_delete_is_refused() {
        let pool = memory_pool().await;
        let reg = seeded();
        save_registry(&pool, &reg).await.unwrap();
        let std = reg.default_contract(ContractScope::Adherent).unwrap().id;
        let err = delete_contract(&pool, std).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Registry(RegistryError::InvalidOperation(_))
        ));
        assert_eq!(count(&pool, "contracts").await, 2);
        assert!(!delete_contract(&pool, ContractId(404)).await.unwrap());
    }

    #[tokio::test]
    async fn bonus_groups_survive_storage() {
        let pool = memory_pool().await;
        let mut reg = Registry::new();
        let union = reg
            .create_contract("Union", None, ContractScope::Union)
            .unwrap();
        reg.create_contract_rule(
            union.id,
            rfa_core::RuleDraft {
                key: "GLOBAL_ACR".into(),
                scope: Some(RuleScope::Global),
                tiers_rfa: Some(vec![Tier::new(Decimal::ZERO, Decimal::new(1, 2))]),
                tiers_bonus: Some(vec![]),
                bonus_groups: vec![BonusGroup {
                    groupe_client: "GRP NORD".into(),
                    bonus_rate: Decimal::new(3, 2),
                    label: Some("Soutien".into()),
                }],
                ..Default::default()
            },
        )
        .unwrap();
        save_registry(&pool, &reg).await.unwrap();
        let loaded = load_registry(&pool).await.unwrap();
        let rule = loaded.rules().next().unwrap();
        assert_eq!(rule.bonus_groups, reg.rules().next().unwrap().bonus_groups);
    }

    #[tokio::test]
    async fn second_default_in_scope_is_refused() {
        let pool = memory_pool().await;
        save_registry(&pool, &seeded()).await.unwrap();
        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            "INSERT INTO contracts (id, name, scope, is_default, created_at, updated_at) \
             VALUES (99, 'Other', 'ADHERENT', 1, ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn invalid_stored_schedule_fails_load() {
        let pool = memory_pool().await;
        save_registry(&pool, &seeded()).await.unwrap();
        sqlx::query("UPDATE overrides SET custom_tiers = '[{\"min\":\"-1\",\"rate\":\"0.01\"}]'")
            .execute(&pool)
            .await
            .unwrap();
        let err = load_registry(&pool).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "overrides", .. }));
    }
}
