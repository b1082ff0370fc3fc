// src/bot/mod.rs - Moderation bot: rule loading, message checks and action dispatch

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::config::{ConfigChangeEvent, ConfigurationManager, CoreSettings};
use crate::platforms::{PlatformConnection, PlatformEvent, SharedConnection};
use crate::types::ChatMessage;

pub mod actions;
pub mod condition;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod modifiers;
pub mod report;
pub mod rule_set;

use actions::{ActionDispatcher, ActionRegistry};
use loader::{join_messages, load_rules};
use report::OperatorReporter;
use rule_set::RuleStore;

const PING: &str = "ping";
const PONG: &str = "pong";

/// Watches a platform's messages and runs each server's rules against them
#[derive(Clone)]
pub struct ModerationBot {
    connection: SharedConnection,
    rules: RuleStore,
    dispatcher: ActionDispatcher,
    reporter: OperatorReporter,
    config_channel: Arc<RwLock<String>>,
    respond_to_ping: Arc<AtomicBool>,
}

impl ModerationBot {
    pub fn new(connection: Box<dyn PlatformConnection>, settings: &CoreSettings) -> Self {
        Self::with_registry(Arc::new(RwLock::new(connection)), settings, ActionRegistry::with_defaults())
    }

    /// Build a bot whose configuration channel name lives in `config_channel`.
    /// Platforms holding the same handle see renames as soon as the bot applies them.
    pub fn with_config_channel(
        connection: Box<dyn PlatformConnection>,
        settings: &CoreSettings,
        config_channel: Arc<RwLock<String>>,
    ) -> Self {
        Self::build(
            Arc::new(RwLock::new(connection)),
            settings,
            ActionRegistry::with_defaults(),
            config_channel,
        )
    }

    /// Build a bot over an already shared connection with a custom set of actions
    pub fn with_registry(connection: SharedConnection, settings: &CoreSettings, registry: ActionRegistry) -> Self {
        let config_channel = Arc::new(RwLock::new(settings.config_channel.clone()));
        Self::build(connection, settings, registry, config_channel)
    }

    fn build(
        connection: SharedConnection,
        settings: &CoreSettings,
        registry: ActionRegistry,
        config_channel: Arc<RwLock<String>>,
    ) -> Self {
        let reporter = OperatorReporter::new(Arc::clone(&connection), Arc::clone(&config_channel));
        let dispatcher = ActionDispatcher::new(Arc::new(registry), Arc::clone(&connection), reporter.clone());

        Self {
            connection,
            rules: RuleStore::new(),
            dispatcher,
            reporter,
            config_channel,
            respond_to_ping: Arc::new(AtomicBool::new(settings.respond_to_ping)),
        }
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Connect, load every server's rules and start processing events
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        info!("Starting moderation bot...");

        let receiver = {
            let mut connection = self.connection.write().await;
            connection
                .connect()
                .await
                .with_context(|| format!("Failed to connect to {}", connection.platform_name()))?;
            connection
                .get_event_receiver()
                .context("Platform did not provide an event receiver")?
        };

        self.load_all_servers().await;

        let bot = self.clone();
        let handle = tokio::spawn(async move { bot.run_event_loop(receiver).await });

        info!("Moderation bot started successfully");
        Ok(handle)
    }

    /// Disconnect from the platform
    pub async fn shutdown(&self) -> Result<()> {
        let mut connection = self.connection.write().await;
        info!("Disconnecting from {}", connection.platform_name());
        connection.disconnect().await
    }

    async fn run_event_loop(&self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.handle_event(event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event loop lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Platform event stream closed");
                    break;
                }
            }
        }
    }

    /// Apply settings and react to rule file changes until the manager goes away
    pub fn watch_config(&self, manager: &ConfigurationManager) -> JoinHandle<()> {
        let mut changes = manager.subscribe_to_changes();
        let manager = manager.clone();
        let bot = self.clone();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(ConfigChangeEvent::BotConfigUpdated { file }) => {
                        info!("Applying updated settings from {}", file);
                        let config = manager.get_bot_config().await;
                        bot.apply_settings(&config.core).await;
                    }
                    Ok(ConfigChangeEvent::RulesChanged { server_id }) => {
                        if let Err(e) = bot.load_server_rules(&server_id).await {
                            error!("Failed to reload rules for server {}: {:#}", server_id, e);
                        }
                    }
                    Ok(ConfigChangeEvent::ValidationError { file, error }) => {
                        error!("Configuration error in {}: {}", file, error);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Config watcher lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn apply_settings(&self, settings: &CoreSettings) {
        self.respond_to_ping.store(settings.respond_to_ping, Ordering::Relaxed);

        let changed = {
            let mut channel = self.config_channel.write().await;
            if *channel != settings.config_channel {
                info!("Config channel changed from '{}' to '{}'", channel, settings.config_channel);
                *channel = settings.config_channel.clone();
                true
            } else {
                false
            }
        };

        if changed {
            self.load_all_servers().await;
        }
    }

    /// Handle one platform event. Returns the spawned action tasks.
    pub async fn handle_event(&self, event: PlatformEvent) -> Vec<JoinHandle<()>> {
        match event {
            PlatformEvent::Ready => {
                self.load_all_servers().await;
                Vec::new()
            }
            PlatformEvent::MessageCreated(message) => self.handle_message(message, false).await,
            PlatformEvent::MessageUpdated { old, new } => {
                debug!("Message {} edited: {:?} -> {:?}", new.id, old.content, new.content);
                self.handle_message(new, true).await
            }
            PlatformEvent::MessageDeleted(message) => {
                if !self.is_own_message(&message).await && self.is_config_message(&message).await {
                    self.reload_for(&message.server_id).await;
                }
                Vec::new()
            }
            PlatformEvent::ServerUnavailable { server_id } => {
                self.rules.remove(&server_id).await;
                Vec::new()
            }
        }
    }

    async fn handle_message(&self, message: ChatMessage, edited: bool) -> Vec<JoinHandle<()>> {
        if self.is_own_message(&message).await {
            return Vec::new();
        }

        let mut handles = Vec::new();

        if self.is_config_message(&message).await {
            self.reload_for(&message.server_id).await;
        } else {
            handles = self.check_message(&message).await;
        }

        if !edited && message.content == PING && self.respond_to_ping.load(Ordering::Relaxed) {
            let connection = self.connection.read().await;
            if let Err(e) = connection.reply(&message, PONG).await {
                error!("Failed to answer ping: {}", e);
            }
        }

        handles
    }

    /// Evaluate a message against its server's rules and dispatch the actions
    /// of every condition that fired
    pub async fn check_message(&self, message: &ChatMessage) -> Vec<JoinHandle<()>> {
        let Some(rule_set) = self.rules.get(&message.server_id).await else {
            debug!("No rules loaded for server {}", message.server_id);
            return Vec::new();
        };

        let server = {
            let connection = self.connection.read().await;
            connection.server_info(&message.server_id).await
        };
        let Some(server) = server else {
            warn!("Unknown server {} for message {}", message.server_id, message.id);
            return Vec::new();
        };

        debug!("Checking message {}: {}", message.id, message.content);
        let evaluation = rule_set.evaluate(message, &server);

        for (condition, error) in &evaluation.errors {
            self.reporter
                .report_rule_error(&message.server_id, error, &condition.to_json())
                .await;
        }

        evaluation
            .matched
            .into_iter()
            .map(|condition| self.dispatcher.dispatch(condition, message.clone()))
            .collect()
    }

    pub async fn load_all_servers(&self) {
        let servers = self.connection.read().await.servers().await;
        info!("Loading rules for {} servers", servers.len());

        for server in servers {
            self.reload_for(&server.id).await;
        }
    }

    async fn reload_for(&self, server_id: &str) {
        if let Err(e) = self.load_server_rules(server_id).await {
            error!("Failed to load rules for server {}: {:#}", server_id, e);
        }
    }

    /// Rebuild a server's rule set from its configuration channel. Earlier
    /// reports posted by the bot are deleted first and never parsed.
    pub async fn load_server_rules(&self, server_id: &str) -> Result<usize> {
        let channel = self.config_channel.read().await.clone();

        let (history, bot_id) = {
            let connection = self.connection.read().await;
            let history = connection
                .fetch_channel_history(server_id, &channel)
                .await
                .with_context(|| format!("Could not fetch #{} for server {}", channel, server_id))?;
            (history, connection.bot_user_id().to_string())
        };

        let (own, operators): (Vec<ChatMessage>, Vec<ChatMessage>) =
            history.into_iter().partition(|message| message.author_id == bot_id);

        if !own.is_empty() {
            let connection = self.connection.read().await;
            for message in &own {
                if let Err(e) = connection.delete_message(message).await {
                    warn!("Could not delete old report {}: {}", message.id, e);
                }
            }
        }

        let text = join_messages(operators.iter().map(|message| message.content.as_str()));
        let outcome = load_rules(&text);
        let count = outcome.rule_set.len();

        self.rules.replace(server_id, outcome.rule_set).await;
        info!("Config saved for server {} ({} conditions)", server_id, count);

        for problem in &outcome.problems {
            self.reporter
                .report_rule_error(server_id, &problem.error, &problem.context)
                .await;
        }

        Ok(count)
    }

    async fn is_own_message(&self, message: &ChatMessage) -> bool {
        message.author_id == self.connection.read().await.bot_user_id()
    }

    async fn is_config_message(&self, message: &ChatMessage) -> bool {
        message.is_in_channel(&self.config_channel.read().await)
    }
}
