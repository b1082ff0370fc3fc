//! # AutoModerator
//!
//! Rule-based message moderation for chat servers. Operators write rules as
//! YAML documents in a configuration channel; every message posted on the
//! server is checked against them and the matching rules reply to, direct
//! message or remove it.
//!
//! ## Rules
//!
//! ```yaml
//! message: buy followers
//! action: remove + dm
//! dm: "{user}, advertising is not allowed here"
//! ---
//! message (regex): "discord\\.gg/\\w+"
//! channels: [general, help]
//! action: remove
//! ---
//! domains: [bit.ly, tinyurl.com]
//! user:
//!   role: "< Moderator"
//! action: remove
//! ```
//!
//! Keys accept modifiers in parentheses (`message (includes-word, case-sensitive)`)
//! and a leading `~` inverts the message test.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use automoderator::prelude::*;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = CoreSettings::default();
//!     let channel = Arc::new(RwLock::new(settings.config_channel.clone()));
//!     let console = ConsoleConfig::from_env(PathBuf::from("rules"), Arc::clone(&channel))?;
//!
//!     let bot = ModerationBot::with_config_channel(Box::new(ConsoleConnection::new(console)), &settings, channel);
//!     bot.start().await?.await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::actions::{Action, ActionRegistry};
    pub use crate::bot::condition::{Condition, RawRule};
    pub use crate::bot::error::ConditionError;
    pub use crate::bot::rule_set::{RuleSet, RuleStore};
    pub use crate::bot::ModerationBot;
    pub use crate::config::{BotConfiguration, ConfigChangeEvent, ConfigurationManager, CoreSettings};
    pub use crate::platforms::{
        console::{ConsoleConfig, ConsoleConnection},
        PlatformConnection, PlatformEvent,
    };
    pub use crate::types::{ChatMessage, ServerInfo, ServerRole};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
