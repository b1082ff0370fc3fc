// src/types/mod.rs - Messages and server metadata that flow through the bot

use serde::{Deserialize, Serialize};

/// Inbound chat message as delivered by a platform connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub server_id: String,
    /// Name of the originating text channel, `None` for non-text channels
    pub channel: Option<String>,
    pub author_id: String,
    pub author_name: String,
    /// Position of the author's highest role in the server's role hierarchy
    pub author_highest_role_position: i64,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    pub fn is_in_channel(&self, name: &str) -> bool {
        self.channel.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRole {
    pub id: String,
    pub name: String,
    /// Higher position outranks lower
    pub position: i64,
}

/// A chat server (guild) with its own roles and rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub roles: Vec<ServerRole>,
}

impl ServerInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: Vec::new(),
        }
    }

    /// Case-insensitive role lookup by name
    pub fn find_role_by_name(&self, name: &str) -> Option<&ServerRole> {
        let wanted = name.to_lowercase();
        self.roles.iter().find(|role| role.name.to_lowercase() == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_role_case_insensitive() {
        let mut server = ServerInfo::new("1", "test server");
        server.roles.push(ServerRole {
            id: "10".to_string(),
            name: "Moderator".to_string(),
            position: 5,
        });

        assert_eq!(server.find_role_by_name("moderator").map(|r| r.position), Some(5));
        assert_eq!(server.find_role_by_name("MODERATOR").map(|r| r.id.as_str()), Some("10"));
        assert!(server.find_role_by_name("admin").is_none());
    }
}
