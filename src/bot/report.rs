// src/bot/report.rs - Operator feedback posted to a server's configuration channel

use log::{error, warn};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::platforms::SharedConnection;

/// Sends rule problems to the configuration channel where operators edit rules
#[derive(Clone)]
pub struct OperatorReporter {
    connection: SharedConnection,
    config_channel: Arc<RwLock<String>>,
}

impl OperatorReporter {
    pub fn new(connection: SharedConnection, config_channel: Arc<RwLock<String>>) -> Self {
        Self {
            connection,
            config_channel,
        }
    }

    pub async fn config_channel(&self) -> String {
        self.config_channel.read().await.clone()
    }

    /// Report a problem with one rule, quoting the rule's fields
    pub async fn report_rule_error(&self, server_id: &str, error: &(dyn Display + Sync), rule_json: &str) {
        let text = format_rule_report(error, rule_json);
        warn!("Rule problem on server {}: {} in {}", server_id, error, rule_json);
        self.send(server_id, &text).await;
    }

    /// Report a problem that is not tied to a single rule
    pub async fn report(&self, server_id: &str, text: &str) {
        warn!("Reporting to operators of server {}: {}", server_id, text);
        self.send(server_id, text).await;
    }

    async fn send(&self, server_id: &str, text: &str) {
        let channel = self.config_channel().await;
        let connection = self.connection.read().await;
        if let Err(e) = connection.send_message(server_id, &channel, text).await {
            error!("Failed to send operator report to {}#{}: {}", server_id, channel, e);
        }
    }
}

pub fn format_rule_report(error: &(dyn Display + Sync), rule_json: &str) -> String {
    format!("{}\n\nIn condition:\n```{}```", error, rule_json)
}
