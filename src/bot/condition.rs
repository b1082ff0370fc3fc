// src/bot/condition.rs - Compiling raw rule documents into conditions

use log::debug;
use regex::{Regex, RegexBuilder};
use serde_yaml::{Mapping, Value};

use crate::bot::error::ConditionError;
use crate::bot::modifiers::{self, MatchMode, Modifier};

/// One rule document exactly as it was parsed from YAML
pub type RawRule = Mapping;

/// Field names a rule may use once modifiers are stripped from its keys
pub const RECOGNIZED_FIELDS: [&str; 12] = [
    "action", "message", "reply", "dm", "warn", "warn_user", "command", "channels", "domains", "user",
    "priority", "modifiers",
];

pub const REMOVE_ACTION: &str = "remove";
pub const REPLY_ACTION: &str = "reply";

/// Characters that carry meaning inside a regular expression
const REGEX_METACHARACTERS: &[char] = &[
    '-', '/', '\\', '^', '$', '*', '+', '?', '.', '(', ')', '|', '[', ']', '{', '}',
];

/// Text a rule looks for, either one value or a list of alternatives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageValue {
    Single(String),
    AnyOf(Vec<String>),
}

impl MessageValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            MessageValue::Single(value) => vec![value.as_str()],
            MessageValue::AnyOf(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        MessageValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for MessageValue {
    fn from(values: Vec<&str>) -> Self {
        MessageValue::AnyOf(values.into_iter().map(str::to_string).collect())
    }
}

/// Author constraints, e.g. `user: { role: ">= Moderator" }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserCriteria {
    pub role: Option<String>,
    pub warning: Option<String>,
}

/// Typed view of a rule's fields after validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionFields {
    pub action: String,
    pub message: Option<MessageValue>,
    pub reply: Option<String>,
    pub dm: Option<String>,
    pub warn: Option<String>,
    pub warn_user: Option<String>,
    pub command: Option<String>,
    pub channels: Option<Vec<String>>,
    pub domains: Option<Vec<String>>,
    pub user: Option<UserCriteria>,
    pub priority: Option<i64>,
    pub modifiers: Vec<String>,
}

/// A compiled moderation rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Condition {
    pub fields: ConditionFields,
    pub modifiers: Vec<Modifier>,
    pub match_mode: MatchMode,
    /// Outcome of the text test that makes the rule fire; `false` for `inverse`
    pub match_success: bool,
    pub actions: Vec<String>,
    normalized: Mapping,
    text_pattern: Option<Regex>,
}

impl Condition {
    /// Compile one raw rule document.
    pub fn compile(raw: &RawRule) -> Result<Self, ConditionError> {
        let (normalized, tokens) = normalize_fields(raw);

        let match_success = !tokens.iter().any(|token| token == modifiers::INVERSE);
        let actions = parse_actions(normalized.get("action").and_then(Value::as_str));

        validate_keys(&normalized)?;
        let fields = typed_fields(&normalized)?;
        let (modifiers, match_mode) = modifiers::resolve_modifiers(&tokens)?;

        if actions.is_empty() {
            return Err(ConditionError::NoActionSpecified);
        }
        if actions.iter().any(|action| action == REPLY_ACTION) && fields.reply.is_none() {
            return Err(ConditionError::MissingReplyText);
        }

        let text_pattern = match &fields.message {
            Some(value) => Some(build_text_pattern(match_mode, value, &modifiers)?),
            None => None,
        };

        let condition = Self {
            fields,
            modifiers,
            match_mode,
            match_success,
            actions,
            normalized,
            text_pattern,
        };

        debug!(
            "Compiled condition: actions={:?} mode={} modifiers={:?}",
            condition.actions, condition.match_mode, condition.modifiers
        );
        Ok(condition)
    }

    pub fn has_modifier(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }

    pub fn has_remove_action(&self) -> bool {
        self.actions.iter().any(|action| action == REMOVE_ACTION)
    }

    pub fn priority(&self) -> Option<i64> {
        self.fields.priority
    }

    /// Field map with modifiers stripped from the keys
    pub fn normalized_fields(&self) -> &Mapping {
        &self.normalized
    }

    pub(crate) fn text_pattern(&self) -> Option<&Regex> {
        self.text_pattern.as_ref()
    }

    /// Compact JSON rendering used in operator reports and logs
    pub fn to_json(&self) -> String {
        rule_to_json(&self.normalized)
    }
}

/// Rename decorated keys to their base names and collect every modifier
/// token, starting with the explicit `modifiers` list. The input map is
/// left untouched. When two keys share a base name the later one wins.
pub fn normalize_fields(raw: &RawRule) -> (Mapping, Vec<String>) {
    let mut tokens: Vec<String> = match raw.get("modifiers") {
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar_to_string).collect(),
        _ => Vec::new(),
    };

    let mut normalized = Mapping::with_capacity(raw.len());
    for (key, value) in raw {
        let key = key_to_string(key);
        if key == "modifiers" {
            normalized.insert(Value::String(key), value.clone());
            continue;
        }

        let parsed = modifiers::parse_field_key(&key);
        tokens.extend(parsed.modifiers);

        // `domain` is the older spelling
        let base = if parsed.base == "domain" {
            "domains".to_string()
        } else {
            parsed.base
        };
        normalized.insert(Value::String(base), value.clone());
    }

    (normalized, tokens)
}

/// Split an action string on `+`, trimming around each name.
pub fn parse_actions(action: Option<&str>) -> Vec<String> {
    action
        .map(|text| {
            text.split('+')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Escape every regex metacharacter so the value matches literally.
pub fn prepare_regex_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        if REGEX_METACHARACTERS.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Substitute the candidate value(s) into a mode template as one group.
/// Values are escaped unless `regex` is set; alternatives are joined with `|`.
pub fn format_match_pattern(template: &str, value: &MessageValue, regex: bool) -> String {
    let alternatives: Vec<String> = value
        .values()
        .into_iter()
        .map(|candidate| {
            if regex {
                candidate.to_string()
            } else {
                prepare_regex_string(candidate)
            }
        })
        .collect();

    template.replacen("{0}", &format!("({})", alternatives.join("|")), 1)
}

pub fn rule_to_json(rule: &Mapping) -> String {
    serde_json::to_string(rule).unwrap_or_else(|_| format!("{:?}", rule))
}

/// Word classes in the mode templates are ASCII: `é` is a separator, not
/// part of a word. Only the template is rewritten, user patterns keep the
/// regex crate's Unicode classes.
pub fn ascii_word_classes(template: &str) -> String {
    template.replace(r"\W", "[^0-9A-Za-z_]").replace(r"\b", r"(?-u:\b)")
}

/// Configured domains compare against parsed URL hosts, so they get the
/// same IDNA form (`bücher.de` becomes `xn--bcher-kva.de`).
fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim();
    url::Host::<String>::parse(domain)
        .map(|host| host.to_string())
        .unwrap_or_else(|_| domain.to_lowercase())
}

fn build_text_pattern(
    mode: MatchMode,
    value: &MessageValue,
    modifiers: &[Modifier],
) -> Result<Regex, ConditionError> {
    let template = ascii_word_classes(mode.template());
    let pattern = format_match_pattern(&template, value, modifiers.contains(&Modifier::Regex));
    RegexBuilder::new(&pattern)
        .case_insensitive(!modifiers.contains(&Modifier::CaseSensitive))
        .build()
        .map_err(|source| ConditionError::InvalidPattern { pattern, source })
}

fn validate_keys(fields: &Mapping) -> Result<(), ConditionError> {
    if !fields.contains_key("action") {
        return Err(ConditionError::MissingRequiredProperty("action".to_string()));
    }

    for key in fields.keys() {
        let key = key_to_string(key);
        if !RECOGNIZED_FIELDS.contains(&key.as_str()) {
            return Err(ConditionError::InvalidProperty(key));
        }
    }

    Ok(())
}

fn typed_fields(fields: &Mapping) -> Result<ConditionFields, ConditionError> {
    let user = match fields.get("user") {
        None => None,
        Some(Value::Mapping(user)) => Some(UserCriteria {
            role: optional_string(user, "role")?,
            warning: optional_string(user, "warning")?,
        }),
        Some(other) => return Err(ConditionError::type_mismatch("user", "a mapping", other)),
    };

    Ok(ConditionFields {
        action: optional_string(fields, "action")?.unwrap_or_default(),
        message: optional_message(fields)?,
        reply: optional_string(fields, "reply")?,
        dm: optional_string(fields, "dm")?,
        warn: optional_scalar(fields, "warn")?,
        warn_user: optional_string(fields, "warn_user")?,
        command: optional_string(fields, "command")?,
        channels: optional_string_list(fields, "channels")?,
        domains: optional_string_list(fields, "domains")?
            .map(|domains| domains.iter().map(|d| normalize_domain(d)).collect()),
        user,
        priority: optional_integer(fields, "priority")?,
        modifiers: optional_string_list(fields, "modifiers")?.unwrap_or_default(),
    })
}

fn optional_string(fields: &Mapping, key: &str) -> Result<Option<String>, ConditionError> {
    match fields.get(key) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(ConditionError::type_mismatch(key, "a string", other)),
    }
}

fn optional_scalar(fields: &Mapping, key: &str) -> Result<Option<String>, ConditionError> {
    match fields.get(key) {
        None => Ok(None),
        Some(value) => scalar_to_string(value)
            .map(Some)
            .ok_or_else(|| ConditionError::type_mismatch(key, "a string or a number", value)),
    }
}

fn optional_string_list(fields: &Mapping, key: &str) -> Result<Option<Vec<String>>, ConditionError> {
    match fields.get(key) {
        None => Ok(None),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                scalar_to_string(item)
                    .ok_or_else(|| ConditionError::type_mismatch(key, "a sequence of strings", item))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(ConditionError::type_mismatch(key, "a sequence", other)),
    }
}

fn optional_message(fields: &Mapping) -> Result<Option<MessageValue>, ConditionError> {
    const EXPECTED: &str = "a string or a sequence of strings";

    match fields.get("message") {
        None => Ok(None),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| scalar_to_string(item).ok_or_else(|| ConditionError::type_mismatch("message", EXPECTED, item)))
            .collect::<Result<Vec<_>, _>>()
            .map(|values| Some(MessageValue::AnyOf(values))),
        Some(value) => scalar_to_string(value)
            .map(|text| Some(MessageValue::Single(text)))
            .ok_or_else(|| ConditionError::type_mismatch("message", EXPECTED, value)),
    }
}

/// Integers, or strings holding one, are accepted
fn optional_integer(fields: &Mapping, key: &str) -> Result<Option<i64>, ConditionError> {
    match fields.get(key) {
        None => Ok(None),
        Some(Value::Number(number)) if number.is_i64() => Ok(number.as_i64()),
        Some(Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConditionError::type_mismatch(key, "an integer", &Value::String(text.clone()))),
        Some(other) => Err(ConditionError::type_mismatch(key, "an integer", other)),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn key_to_string(key: &Value) -> String {
    scalar_to_string(key).unwrap_or_else(|| crate::bot::error::describe_value(key))
}
