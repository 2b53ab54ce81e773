//! Account identities supplied by the turnover data collaborator.

use crate::AccountRef;
use rfa_core::normalize_target;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityMode {
    Client,
    Group,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groupe_client: Option<String>,
}

/// Valid target identities for one data source (an import).
pub trait EntitySource {
    fn entities(&self, source_id: &str, mode: EntityMode) -> Vec<Entity>;

    /// Account reference for a client code, carrying its group when known.
    fn account(&self, source_id: &str, code_union: &str) -> AccountRef {
        let code = normalize_target(code_union);
        let group = self
            .entities(source_id, EntityMode::Client)
            .into_iter()
            .find(|e| e.id == code)
            .and_then(|e| e.groupe_client);
        AccountRef::client(&code, group.as_deref())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryEntities {
    clients: BTreeMap<String, BTreeMap<String, Entity>>,
}

impl InMemoryEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_client(
        &mut self,
        source_id: &str,
        code_union: &str,
        label: &str,
        groupe_client: Option<&str>,
    ) {
        let id = normalize_target(code_union);
        let entity = Entity {
            id: id.clone(),
            label: label.trim().to_string(),
            groupe_client: groupe_client.map(normalize_target).filter(|g| !g.is_empty()),
        };
        self.clients
            .entry(source_id.to_string())
            .or_default()
            .insert(id, entity);
    }
}

impl EntitySource for InMemoryEntities {
    fn entities(&self, source_id: &str, mode: EntityMode) -> Vec<Entity> {
        let Some(clients) = self.clients.get(source_id) else {
            return Vec::new();
        };
        match mode {
            EntityMode::Client => clients.values().cloned().collect(),
            EntityMode::Group => clients
                .values()
                .filter_map(|c| c.groupe_client.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|g| Entity {
                    id: g.clone(),
                    label: g,
                    groupe_client: None,
                })
                .collect(),
        }
    }
}
