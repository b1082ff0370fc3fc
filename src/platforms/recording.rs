// In-memory platform that records every outbound call, for tests

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::platforms::{PlatformConnection, PlatformEvent, SharedConnection};
use crate::types::{ChatMessage, ServerInfo};

pub const BOT_ID: &str = "bot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Sent { server_id: String, channel: String, content: String },
    Replied { message_id: String, content: String },
    Direct { user_id: String, content: String },
    Deleted { message_id: String },
}

#[derive(Clone)]
pub struct RecordingConnection {
    pub operations: Arc<Mutex<Vec<Operation>>>,
    pub servers: Vec<ServerInfo>,
    pub history: Arc<Mutex<HashMap<(String, String), Vec<ChatMessage>>>>,
    pub fail_deletes: bool,
    sender: broadcast::Sender<PlatformEvent>,
}

impl RecordingConnection {
    pub fn new(servers: Vec<ServerInfo>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            servers,
            history: Arc::new(Mutex::new(HashMap::new())),
            fail_deletes: false,
            sender,
        }
    }

    pub fn shared(self) -> SharedConnection {
        Arc::new(tokio::sync::RwLock::new(Box::new(self)))
    }

    pub fn set_history(&self, server_id: &str, channel: &str, messages: Vec<ChatMessage>) {
        self.history
            .lock()
            .unwrap()
            .insert((server_id.to_string(), channel.to_string()), messages);
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    fn record(&self, operation: Operation) {
        self.operations.lock().unwrap().push(operation);
    }
}

#[async_trait]
impl PlatformConnection for RecordingConnection {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "recording"
    }

    fn bot_user_id(&self) -> &str {
        BOT_ID
    }

    fn get_event_receiver(&self) -> Option<broadcast::Receiver<PlatformEvent>> {
        Some(self.sender.subscribe())
    }

    async fn servers(&self) -> Vec<ServerInfo> {
        self.servers.clone()
    }

    async fn server_info(&self, server_id: &str) -> Option<ServerInfo> {
        self.servers.iter().find(|s| s.id == server_id).cloned()
    }

    async fn send_message(&self, server_id: &str, channel: &str, content: &str) -> Result<()> {
        self.record(Operation::Sent {
            server_id: server_id.to_string(),
            channel: channel.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn reply(&self, message: &ChatMessage, content: &str) -> Result<()> {
        self.record(Operation::Replied {
            message_id: message.id.clone(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, content: &str) -> Result<()> {
        self.record(Operation::Direct {
            user_id: user_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, message: &ChatMessage) -> Result<()> {
        if self.fail_deletes {
            return Err(anyhow::anyhow!("Missing permission to delete message {}", message.id));
        }
        self.record(Operation::Deleted {
            message_id: message.id.clone(),
        });
        Ok(())
    }

    async fn fetch_channel_history(&self, server_id: &str, channel: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&(server_id.to_string(), channel.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn chat_message(id: &str, channel: Option<&str>, content: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        server_id: "s1".to_string(),
        channel: channel.map(str::to_string),
        author_id: "u1".to_string(),
        author_name: "tester".to_string(),
        author_highest_role_position: 0,
        content: content.to_string(),
        timestamp: chrono::Utc::now(),
    }
}
