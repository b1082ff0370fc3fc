// src/bot/rule_set.rs - Per-server ordered rule sets and the store that owns them

use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::condition::Condition;
use crate::bot::error::ConditionError;
use crate::types::{ChatMessage, ServerInfo};

/// Ordered conditions for one server. Removal rules always come first.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    conditions: Vec<Arc<Condition>>,
}

/// What happened when a message went through a rule set
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Conditions that fired, in evaluation order
    pub matched: Vec<Arc<Condition>>,
    /// Conditions that could not be evaluated
    pub errors: Vec<(Arc<Condition>, ConditionError)>,
    /// Set when a removal rule fired and later rules were skipped
    pub removed: bool,
}

impl RuleSet {
    pub fn new(conditions: Vec<Condition>) -> Self {
        let mut conditions: Vec<Arc<Condition>> = conditions.into_iter().map(Arc::new).collect();
        Self::prioritize(&mut conditions);
        Self { conditions }
    }

    /// Stable sort: conditions with a `remove` action first, then ascending
    /// priority with unset priority lowest.
    pub fn prioritize(conditions: &mut [Arc<Condition>]) {
        conditions.sort_by(|a, b| {
            b.has_remove_action()
                .cmp(&a.has_remove_action())
                .then_with(|| a.priority().cmp(&b.priority()))
        });
    }

    pub fn conditions(&self) -> &[Arc<Condition>] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Run the message through every condition in order, stopping right
    /// after the first fired condition that removes the message.
    pub fn evaluate(&self, message: &ChatMessage, server: &ServerInfo) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for condition in &self.conditions {
            match condition.matches(message, server) {
                Ok(true) => {
                    debug!("Message {} matched condition {}", message.id, condition.to_json());
                    evaluation.matched.push(Arc::clone(condition));

                    if condition.has_remove_action() {
                        evaluation.removed = true;
                        break;
                    }
                }
                Ok(false) => {}
                Err(e) => evaluation.errors.push((Arc::clone(condition), e)),
            }
        }

        evaluation
    }
}

/// Rule sets keyed by server id. Sets are swapped whole, so a reader holds
/// either the old or the new set and never a partial one.
#[derive(Clone, Default)]
pub struct RuleStore {
    rule_sets: Arc<RwLock<HashMap<String, Arc<RuleSet>>>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, server_id: &str, rule_set: RuleSet) {
        let count = rule_set.len();
        self.rule_sets
            .write()
            .await
            .insert(server_id.to_string(), Arc::new(rule_set));
        info!("Stored {} conditions for server {}", count, server_id);
    }

    pub async fn get(&self, server_id: &str) -> Option<Arc<RuleSet>> {
        self.rule_sets.read().await.get(server_id).cloned()
    }

    pub async fn remove(&self, server_id: &str) -> bool {
        let removed = self.rule_sets.write().await.remove(server_id).is_some();
        if removed {
            info!("Cleared rule set for server {}", server_id);
        }
        removed
    }

    pub async fn server_ids(&self) -> Vec<String> {
        self.rule_sets.read().await.keys().cloned().collect()
    }

    pub async fn total_conditions(&self) -> usize {
        self.rule_sets.read().await.values().map(|set| set.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn condition(yaml: &str) -> Condition {
        Condition::compile(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    fn message(content: &str) -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            server_id: "s1".to_string(),
            channel: Some("general".to_string()),
            author_id: "u1".to_string(),
            author_name: "tester".to_string(),
            author_highest_role_position: 0,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn dms(set: &RuleSet) -> Vec<String> {
        set.conditions()
            .iter()
            .map(|c| c.fields.dm.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_prioritize_removals_first() {
        let set = RuleSet::new(vec![
            condition("message: x\naction: remove+dm\ndm: A\npriority: 5\n"),
            condition("message: x\naction: dm\ndm: B\npriority: 1\n"),
            condition("message: x\naction: dm+remove\ndm: C\npriority: 1\n"),
        ]);

        assert_eq!(dms(&set), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_prioritize_is_stable_and_unset_is_lowest() {
        let set = RuleSet::new(vec![
            condition("message: x\naction: dm\ndm: first\npriority: 0\n"),
            condition("message: x\naction: dm\ndm: unset\n"),
            condition("message: x\naction: dm\ndm: second\npriority: 0\n"),
            condition("message: x\naction: dm\ndm: negative\npriority: -3\n"),
        ]);

        assert_eq!(dms(&set), vec!["unset", "negative", "first", "second"]);
    }

    #[test]
    fn test_evaluation_stops_after_removal() {
        let set = RuleSet::new(vec![
            condition("message: hello\naction: dm\ndm: greeting\n"),
            condition("message: spam\naction: remove\npriority: 2\n"),
            condition("message: spam\naction: dm+remove\ndm: removed\npriority: 1\n"),
        ]);
        let server = ServerInfo::new("s1", "server");

        let evaluation = set.evaluate(&message("hello spam"), &server);
        assert!(evaluation.removed);
        assert_eq!(evaluation.matched.len(), 1);
        assert_eq!(evaluation.matched[0].fields.dm.as_deref(), Some("removed"));

        let evaluation = set.evaluate(&message("hello"), &server);
        assert!(!evaluation.removed);
        assert_eq!(evaluation.matched.len(), 1);
    }

    #[test]
    fn test_evaluation_collects_errors_and_continues() {
        let set = RuleSet::new(vec![
            condition("message: x\nuser:\n  role: ghost\naction: dm\ndm: a\n"),
            condition("message: x\naction: dm\ndm: b\n"),
        ]);
        let evaluation = set.evaluate(&message("x"), &ServerInfo::new("s1", "server"));

        assert_eq!(evaluation.errors.len(), 1);
        assert!(matches!(evaluation.errors[0].1, ConditionError::RoleNotResolved(_)));
        assert_eq!(evaluation.matched.len(), 1);
    }

    #[tokio::test]
    async fn test_store_lifecycle() {
        let store = RuleStore::new();
        assert!(store.get("s1").await.is_none());

        store.replace("s1", RuleSet::new(vec![condition("message: x\naction: remove\n")])).await;
        assert_eq!(store.get("s1").await.map(|set| set.len()), Some(1));

        let held = store.get("s1").await.unwrap();
        store.replace("s1", RuleSet::default()).await;
        assert_eq!(held.len(), 1);
        assert_eq!(store.total_conditions().await, 0);

        assert!(store.remove("s1").await);
        assert!(!store.remove("s1").await);
        assert!(store.server_ids().await.is_empty());
    }
}
