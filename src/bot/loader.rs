// src/bot/loader.rs - Turning configuration-channel text into a rule set

use log::{debug, info, warn};
use serde_yaml::Value;

use crate::bot::condition::{rule_to_json, Condition};
use crate::bot::error::ConditionError;
use crate::bot::rule_set::RuleSet;

/// Separator placed between configuration messages when they are joined
pub const DOCUMENT_SEPARATOR: &str = "\n---\n";

/// A document that was reported and skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleProblem {
    pub error: String,
    /// The rule's fields as JSON, or the raw document when it did not parse
    pub context: String,
}

/// Result of loading one server's configuration text
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub rule_set: RuleSet,
    pub problems: Vec<RuleProblem>,
}

/// Split configuration text on `---` lines. Each piece is parsed on its own
/// so a syntax error only costs the document it appears in.
pub fn split_documents(text: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim_end() == "---" {
            documents.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|document| !document.trim().is_empty())
        .collect()
}

/// Join configuration messages oldest first
pub fn join_messages<'a>(contents: impl IntoIterator<Item = &'a str>) -> String {
    contents.into_iter().collect::<Vec<_>>().join(DOCUMENT_SEPARATOR)
}

/// Parse and compile every document, keeping the ones that compile
pub fn load_rules(text: &str) -> LoadOutcome {
    let mut conditions = Vec::new();
    let mut problems = Vec::new();

    for document in split_documents(text) {
        let value: Value = match serde_yaml::from_str(&document) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping rule document that is not valid YAML: {}", e);
                problems.push(RuleProblem {
                    error: format!("Invalid YAML: {}", e),
                    context: document.trim().to_string(),
                });
                continue;
            }
        };

        let raw = match value {
            // comments only
            Value::Null => continue,
            Value::Mapping(raw) => raw,
            other => {
                let error = ConditionError::type_mismatch("condition", "a mapping", &other);
                warn!("Skipping rule document: {}", error);
                problems.push(RuleProblem {
                    error: error.to_string(),
                    context: document.trim().to_string(),
                });
                continue;
            }
        };

        match Condition::compile(&raw) {
            Ok(condition) => conditions.push(condition),
            Err(e) => {
                warn!("Skipping rule that failed to compile: {}", e);
                problems.push(RuleProblem {
                    error: e.to_string(),
                    context: rule_to_json(&raw),
                });
            }
        }
    }

    debug!("Compiled {} conditions with {} problems", conditions.len(), problems.len());
    if !conditions.is_empty() {
        info!("Loaded {} conditions", conditions.len());
    }

    LoadOutcome {
        rule_set: RuleSet::new(conditions),
        problems,
    }
}
