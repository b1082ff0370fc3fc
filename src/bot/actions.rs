// src/bot/actions.rs - Actions a fired condition can run, and their dispatch

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::bot::condition::Condition;
use crate::bot::error::ConditionError;
use crate::bot::report::OperatorReporter;
use crate::platforms::{PlatformConnection, SharedConnection};
use crate::types::ChatMessage;

/// A named side effect run against the message that fired a condition
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, condition: &Condition, message: &ChatMessage, platform: &dyn PlatformConnection) -> Result<()>;
}

/// Replace `{user}` with the author's name
pub fn format_template(template: &str, message: &ChatMessage) -> String {
    template.replace("{user}", &message.author_name)
}

/// Answers in the originating channel with the `reply` text
pub struct ReplyAction;

#[async_trait]
impl Action for ReplyAction {
    fn name(&self) -> &'static str {
        "reply"
    }

    async fn run(&self, condition: &Condition, message: &ChatMessage, platform: &dyn PlatformConnection) -> Result<()> {
        match condition.fields.reply.as_deref() {
            Some(text) if !text.is_empty() => platform.reply(message, &format_template(text, message)).await,
            _ => Ok(()),
        }
    }
}

/// Sends the `dm` text to the author privately
pub struct DmAction;

#[async_trait]
impl Action for DmAction {
    fn name(&self) -> &'static str {
        "dm"
    }

    async fn run(&self, condition: &Condition, message: &ChatMessage, platform: &dyn PlatformConnection) -> Result<()> {
        match condition.fields.dm.as_deref() {
            Some(text) if !text.is_empty() => {
                platform
                    .send_direct_message(&message.author_id, &format_template(text, message))
                    .await
            }
            _ => Ok(()),
        }
    }
}

/// Deletes the message
pub struct RemoveAction;

#[async_trait]
impl Action for RemoveAction {
    fn name(&self) -> &'static str {
        "remove"
    }

    async fn run(&self, _condition: &Condition, message: &ChatMessage, platform: &dyn PlatformConnection) -> Result<()> {
        platform.delete_message(message).await
    }
}

/// Name to implementation table
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `reply`, `dm` and `remove`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReplyAction));
        registry.register(Arc::new(DmAction));
        registry.register(Arc::new(RemoveAction));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Action>, ConditionError> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| ConditionError::ActionNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Runs the actions of fired conditions without holding up evaluation
#[derive(Clone)]
pub struct ActionDispatcher {
    registry: Arc<ActionRegistry>,
    connection: SharedConnection,
    reporter: OperatorReporter,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ActionRegistry>, connection: SharedConnection, reporter: OperatorReporter) -> Self {
        Self {
            registry,
            connection,
            reporter,
        }
    }

    /// Spawn a task running the condition's actions in order. A missing or
    /// failing action is logged and the remaining actions still run.
    pub fn dispatch(&self, condition: Arc<Condition>, message: ChatMessage) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let connection = Arc::clone(&self.connection);
        let reporter = self.reporter.clone();

        info!("Running actions [{}] for message {}", condition.actions.join("+"), message.id);

        tokio::spawn(async move {
            for name in &condition.actions {
                let action = match registry.resolve(name) {
                    Ok(action) => action,
                    Err(e) => {
                        error!("{}", e);
                        reporter
                            .report_rule_error(&message.server_id, &e, &condition.to_json())
                            .await;
                        continue;
                    }
                };

                let platform = connection.read().await;
                match action.run(&condition, &message, &**platform).await {
                    Ok(()) => debug!("Action '{}' completed for message {}", name, message.id),
                    Err(e) => error!("Action '{}' failed for message {}: {}", name, message.id, e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::recording::{chat_message, Operation, RecordingConnection};
    use tokio::sync::RwLock;

    fn condition(yaml: &str) -> Arc<Condition> {
        Arc::new(Condition::compile(&serde_yaml::from_str(yaml).unwrap()).unwrap())
    }

    fn dispatcher(recording: &RecordingConnection) -> ActionDispatcher {
        let connection = recording.clone().shared();
        let reporter = OperatorReporter::new(
            Arc::clone(&connection),
            Arc::new(RwLock::new("automod-config".to_string())),
        );
        ActionDispatcher::new(Arc::new(ActionRegistry::with_defaults()), connection, reporter)
    }

    #[test]
    fn test_registry_resolution() {
        let registry = ActionRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["dm", "remove", "reply"]);
        assert_eq!(registry.resolve("reply").unwrap().name(), "reply");

        let err = registry.resolve("warn").err().unwrap();
        assert!(matches!(err, ConditionError::ActionNotFound(ref a) if a == "warn"));
    }

    #[test]
    fn test_format_template() {
        let message = chat_message("1", Some("general"), "hi");
        assert_eq!(format_template("Hey {user}, stop", &message), "Hey tester, stop");
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let recording = RecordingConnection::new(Vec::new());
        let cond = condition("message: spam\naction: reply+dm+remove\nreply: no spam {user}\ndm: you were warned\n");

        dispatcher(&recording)
            .dispatch(cond, chat_message("42", Some("general"), "spam"))
            .await
            .unwrap();

        assert_eq!(
            recording.operations(),
            vec![
                Operation::Replied { message_id: "42".into(), content: "no spam tester".into() },
                Operation::Direct { user_id: "u1".into(), content: "you were warned".into() },
                Operation::Deleted { message_id: "42".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_action_does_not_stop_the_rest() {
        let recording = RecordingConnection::new(Vec::new());
        let cond = condition("message: spam\naction: warn+remove\n");

        dispatcher(&recording)
            .dispatch(cond, chat_message("7", Some("general"), "spam"))
            .await
            .unwrap();

        let operations = recording.operations();
        assert_eq!(operations.len(), 2);
        assert!(matches!(&operations[0], Operation::Sent { channel, content, .. }
            if channel == "automod-config" && content.starts_with("Action not found: warn")));
        assert_eq!(operations[1], Operation::Deleted { message_id: "7".into() });
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_the_rest() {
        let mut recording = RecordingConnection::new(Vec::new());
        recording.fail_deletes = true;
        let cond = condition("message: spam\naction: remove+dm\ndm: bye\n");

        dispatcher(&recording)
            .dispatch(cond, chat_message("8", Some("general"), "spam"))
            .await
            .unwrap();

        assert_eq!(
            recording.operations(),
            vec![Operation::Direct { user_id: "u1".into(), content: "bye".into() }]
        );
    }

    #[tokio::test]
    async fn test_empty_dm_is_noop() {
        let recording = RecordingConnection::new(Vec::new());
        let cond = condition("message: spam\naction: dm\ndm: ''\n");

        dispatcher(&recording)
            .dispatch(cond, chat_message("9", Some("general"), "spam"))
            .await
            .unwrap();

        assert!(recording.operations().is_empty());
    }
}
