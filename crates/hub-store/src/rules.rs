//! Rule store
//!
//! Updates are accepted only when the caller holds the current version; the
//! stored copy then gets the next one.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hub_core::{RuleId, StoreError, StoreResult};
use hub_rules::{Rule, RuleStore};
use tracing::debug;

/// Rules held in memory, with optimistic versioning on update
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: DashMap<RuleId, Rule>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let store = Self::new();
        for rule in rules {
            store.rules.insert(rule.id, rule);
        }
        store
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn insert(&self, rule: &Rule) -> StoreResult<()> {
        match self.rules.entry(rule.id) {
            Entry::Occupied(_) => Err(StoreError::Backend(format!(
                "rule {} already exists",
                rule.id
            ))),
            Entry::Vacant(slot) => {
                debug!(rule_id = %rule.id, name = %rule.name, "Storing rule");
                slot.insert(rule.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: RuleId) -> StoreResult<Rule> {
        self.rules
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::not_found("rule", id))
    }

    async fn get_all(&self) -> StoreResult<Vec<Rule>> {
        Ok(self.rules.iter().map(|r| r.value().clone()).collect())
    }

    async fn update(&self, rule: &Rule) -> StoreResult<Rule> {
        let mut stored = self
            .rules
            .get_mut(&rule.id)
            .ok_or_else(|| StoreError::not_found("rule", rule.id))?;

        if stored.version != rule.version {
            return Err(StoreError::EditConflict {
                kind: "rule",
                id: rule.id.to_string(),
            });
        }

        let mut updated = rule.clone();
        updated.created_at = stored.created_at;
        updated.version = stored.version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: RuleId) -> StoreResult<()> {
        self.rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("rule", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::SensorId;
    use hub_rules::{Condition, ValidRuleAction};

    fn rule() -> Rule {
        Rule::new(
            "fan",
            Condition::greater_than(SensorId::new(), 25.0),
            ValidRuleAction::sensor(SensorId::new(), serde_json::Map::new()),
        )
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let store = MemoryRuleStore::new();
        let rule = rule();

        store.insert(&rule).await.unwrap();
        assert!(store.insert(&rule).await.is_err());
        assert_eq!(store.get(rule.id).await.unwrap(), rule);
        assert_eq!(store.get_all().await.unwrap().len(), 1);

        store.delete(rule.id).await.unwrap();
        assert!(matches!(
            store.delete(rule.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_detects_conflicts() {
        let store = MemoryRuleStore::with_rules([rule()]);
        let mut current = store.get_all().await.unwrap().remove(0);

        current.name = "fan v2".into();
        let updated = store.update(&current).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(store.get(current.id).await.unwrap().name, "fan v2");

        // Still carries version 1
        let err = store.update(&current).await.unwrap_err();
        assert!(matches!(err, StoreError::EditConflict { kind: "rule", .. }));
    }

    #[tokio::test]
    async fn test_update_missing_rule() {
        let store = MemoryRuleStore::new();
        assert!(matches!(
            store.update(&rule()).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
