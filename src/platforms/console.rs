use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, RwLock};

use crate::platforms::{PlatformConnection, PlatformEvent};
use crate::types::{ChatMessage, ServerInfo, ServerRole};

const BOT_USER_ID: &str = "automoderator";
const OPERATOR_ID: &str = "operator";

/// Configuration for the local console connection
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub server_id: String,
    pub server_name: String,
    pub default_channel: String,
    pub author_name: String,
    pub author_role_position: i64,
    pub roles: Vec<ServerRole>,
    /// The configuration channel is backed by `<rules_dir>/<server_id>.yaml`
    pub rules_dir: PathBuf,
    /// Shared with the bot so a renamed configuration channel keeps
    /// pointing at the rules file
    pub config_channel: Arc<RwLock<String>>,
}

impl ConsoleConfig {
    /// Load console settings from environment variables, with defaults
    pub fn from_env(rules_dir: PathBuf, config_channel: Arc<RwLock<String>>) -> Result<Self> {
        let server_id = env::var("CONSOLE_SERVER_ID").unwrap_or_else(|_| "local".to_string());
        let default_channel = env::var("CONSOLE_CHANNEL").unwrap_or_else(|_| "general".to_string());
        let author_name = env::var("CONSOLE_USER").unwrap_or_else(|_| "console-user".to_string());

        let author_role_position = match env::var("CONSOLE_ROLE_POSITION") {
            Ok(value) => value
                .trim()
                .parse::<i64>()
                .with_context(|| format!("CONSOLE_ROLE_POSITION must be an integer, got '{}'", value))?,
            Err(_) => 0,
        };

        let roles_list = env::var("CONSOLE_ROLES").unwrap_or_else(|_| "Member:1,Moderator:5,Admin:10".to_string());
        let roles = Self::parse_roles(&roles_list)?;

        info!(
            "Loaded console config for server '{}' with {} roles",
            server_id,
            roles.len()
        );

        Ok(Self {
            server_name: format!("console ({})", server_id),
            server_id,
            default_channel,
            author_name,
            author_role_position,
            roles,
            rules_dir,
            config_channel,
        })
    }

    /// Parse `Name:position,Name:position`
    pub fn parse_roles(list: &str) -> Result<Vec<ServerRole>> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, position) = entry
                    .rsplit_once(':')
                    .with_context(|| format!("Role '{}' must look like Name:position", entry))?;
                let position = position
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("Invalid position for role '{}'", name))?;
                Ok(ServerRole {
                    id: name.trim().to_lowercase(),
                    name: name.trim().to_string(),
                    position,
                })
            })
            .collect()
    }

    fn rules_file(&self) -> PathBuf {
        self.rules_dir.join(format!("{}.yaml", self.server_id))
    }
}

/// Reads chat lines from stdin and prints every outbound operation.
/// `#channel text` posts to a channel, `@ text` simulates a direct message.
/// The event stream closes when the input ends.
pub struct ConsoleConnection {
    config: ConsoleConfig,
    /// Template for new subscribers; the only sender lives in the reader task
    event_receiver: Option<broadcast::Receiver<PlatformEvent>>,
    history: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
    next_id: Arc<AtomicU64>,
}

impl ConsoleConnection {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            config,
            event_receiver: None,
            history: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Turn one input line into a chat message
    pub fn parse_line(config: &ConsoleConfig, id: u64, line: &str) -> Option<ChatMessage> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return None;
        }

        let (channel, content) = if let Some(rest) = line.strip_prefix('#') {
            let (channel, content) = rest.split_once(' ').unwrap_or((rest, ""));
            (Some(channel.to_string()), content)
        } else if let Some(rest) = line.strip_prefix('@') {
            (None, rest.trim_start())
        } else {
            (Some(config.default_channel.clone()), line)
        };

        Some(ChatMessage {
            id: id.to_string(),
            server_id: config.server_id.clone(),
            channel,
            author_id: config.author_name.to_lowercase(),
            author_name: config.author_name.clone(),
            author_highest_role_position: config.author_role_position,
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
        })
    }

    fn server(&self) -> ServerInfo {
        ServerInfo {
            id: self.config.server_id.clone(),
            name: self.config.server_name.clone(),
            roles: self.config.roles.clone(),
        }
    }
    /// Start reading chat lines from `input`. Subscribers see every line
    /// read after this call and a closed stream once the input ends.
    pub fn connect_with_input<R>(&mut self, input: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = broadcast::channel(1000);
        self.event_receiver = Some(rx);

        let config = self.config.clone();
        let history = Arc::clone(&self.history);
        let next_id = Arc::clone(&self.next_id);

        tokio::spawn(async move {
            let mut lines = input.lines();
            info!("Console reader started");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let id = next_id.fetch_add(1, Ordering::SeqCst);
                        let Some(message) = ConsoleConnection::parse_line(&config, id, &line) else {
                            continue;
                        };

                        if let Some(channel) = &message.channel {
                            history
                                .write()
                                .await
                                .entry(channel.clone())
                                .or_default()
                                .push(message.clone());
                        }

                        if let Err(e) = tx.send(PlatformEvent::MessageCreated(message)) {
                            warn!("Failed to broadcast console message: {}", e);
                        }
                    }
                    Ok(None) => {
                        info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl PlatformConnection for ConsoleConnection {
    async fn connect(&mut self) -> Result<()> {
        self.connect_with_input(BufReader::new(tokio::io::stdin()));
        info!("Console connection ready for server '{}'", self.config.server_id);
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "console"
    }

    fn bot_user_id(&self) -> &str {
        BOT_USER_ID
    }

    fn get_event_receiver(&self) -> Option<broadcast::Receiver<PlatformEvent>> {
        self.event_receiver.as_ref().map(|receiver| receiver.resubscribe())
    }

    async fn servers(&self) -> Vec<ServerInfo> {
        vec![self.server()]
    }

    async fn server_info(&self, server_id: &str) -> Option<ServerInfo> {
        (server_id == self.config.server_id).then(|| self.server())
    }

    async fn send_message(&self, server_id: &str, channel: &str, content: &str) -> Result<()> {
        println!("[{}#{}] {}: {}", server_id, channel, BOT_USER_ID, content);
        Ok(())
    }

    async fn reply(&self, message: &ChatMessage, content: &str) -> Result<()> {
        let channel = message.channel.as_deref().unwrap_or("direct");
        println!("[{}#{}] {}: @{}, {}", message.server_id, channel, BOT_USER_ID, message.author_name, content);
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, content: &str) -> Result<()> {
        println!("[dm -> {}] {}", user_id, content);
        Ok(())
    }

    async fn delete_message(&self, message: &ChatMessage) -> Result<()> {
        if let Some(channel) = &message.channel {
            if let Some(messages) = self.history.write().await.get_mut(channel) {
                messages.retain(|m| m.id != message.id);
            }
        }
        println!("[deleted message {} from {}]", message.id, message.author_name);
        Ok(())
    }

    async fn fetch_channel_history(&self, server_id: &str, channel: &str) -> Result<Vec<ChatMessage>> {
        if server_id != self.config.server_id {
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();

        let config_channel = self.config.config_channel.read().await.clone();
        if channel == config_channel {
            let path = self.config.rules_file();
            if path.exists() {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read rules file {}", path.display()))?;
                debug!("Loaded {} bytes of rules from {}", content.len(), path.display());

                messages.push(ChatMessage {
                    id: "0".to_string(),
                    server_id: server_id.to_string(),
                    channel: Some(channel.to_string()),
                    author_id: OPERATOR_ID.to_string(),
                    author_name: OPERATOR_ID.to_string(),
                    author_highest_role_position: i64::MAX,
                    content,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        if let Some(posted) = self.history.read().await.get(channel) {
            messages.extend(posted.iter().cloned());
        }

        Ok(messages)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.event_receiver = None;
        info!("Disconnected from console");
        Ok(())
    }
}
