//! CLI configuration file and scenario files.

use anyhow::{Context, Result};
use rfa_core::ContractScope;
use rfa_engine::AccountTurnover;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DATABASE_URL_ENV: &str = "RFA_DATABASE_URL";

fn default_database_url() -> String {
    std::env::var(DATABASE_URL_ENV)
        .unwrap_or_else(|_| persistence::default_sqlite_url().to_string())
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty file is a valid, all-defaults config
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                Self::from_yaml(&text).with_context(|| format!("parsing config {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

/// One account of a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAccount {
    pub code_union: Option<String>,
    pub groupe_client: Option<String>,
    pub scope: Option<ContractScope>,
    #[serde(default)]
    pub turnover: AccountTurnover,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub accounts: Vec<ScenarioAccount>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Turnover of every account added together.
    pub fn total_turnover(&self) -> AccountTurnover {
        let mut total = AccountTurnover::default();
        for acc in &self.accounts {
            total.add(&acc.turnover);
        }
        total
    }

    /// Turnover per client group; accounts without a group are left out.
    pub fn by_group(&self) -> BTreeMap<String, AccountTurnover> {
        let mut groups: BTreeMap<String, AccountTurnover> = BTreeMap::new();
        for acc in &self.accounts {
            if let Some(group) = &acc.groupe_client {
                groups.entry(group.clone()).or_default().add(&acc.turnover);
            }
        }
        groups
    }
}
