use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::types::{ChatMessage, ServerInfo};

pub mod console;

#[cfg(test)]
pub(crate) mod recording;

/// A connection shared between the event loop and spawned action tasks
pub type SharedConnection = Arc<RwLock<Box<dyn PlatformConnection>>>;

/// Events a platform delivers to the bot
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// Connection established and server metadata available
    Ready,
    MessageCreated(ChatMessage),
    MessageUpdated { old: ChatMessage, new: ChatMessage },
    MessageDeleted(ChatMessage),
    /// The server went away or the bot left it
    ServerUnavailable { server_id: String },
}

/// Trait defining the interface all platform connections must implement
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Connect to the platform and start receiving events
    async fn connect(&mut self) -> Result<()>;

    /// Get the platform identifier (e.g., "console", "discord")
    fn platform_name(&self) -> &str;

    /// Identity the bot posts under, used to skip its own messages
    fn bot_user_id(&self) -> &str;

    /// Get a receiver for incoming events
    fn get_event_receiver(&self) -> Option<broadcast::Receiver<PlatformEvent>>;

    /// Servers the bot is currently a member of
    async fn servers(&self) -> Vec<ServerInfo>;

    async fn server_info(&self, server_id: &str) -> Option<ServerInfo>;

    /// Post a message to a named channel of a server
    async fn send_message(&self, server_id: &str, channel: &str, content: &str) -> Result<()>;

    /// Answer a message in its own channel, addressed to its author
    async fn reply(&self, message: &ChatMessage, content: &str) -> Result<()>;

    async fn send_direct_message(&self, user_id: &str, content: &str) -> Result<()>;

    async fn delete_message(&self, message: &ChatMessage) -> Result<()>;

    /// Messages of a channel, oldest first
    async fn fetch_channel_history(&self, server_id: &str, channel: &str) -> Result<Vec<ChatMessage>>;

    /// Gracefully disconnect
    async fn disconnect(&mut self) -> Result<()>;
}
