// src/bot/modifiers.rs - Modifier syntax embedded in rule keys and match mode templates

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::bot::error::ConditionError;

/// `name` optionally followed by `(mod1, mod2, ...)`
static KEY_SYNTAX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*(?:\((.+?)\))?").unwrap());

pub const INVERSE: &str = "inverse";
pub const REGEX: &str = "regex";
pub const CASE_SENSITIVE: &str = "case-sensitive";

/// How a message value is anchored against the chat text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    FullExact,
    FullText,
    #[default]
    Includes,
    IncludesWord,
    StartsWith,
    EndsWith,
}

impl MatchMode {
    pub const ALL: [MatchMode; 6] = [
        MatchMode::FullExact,
        MatchMode::FullText,
        MatchMode::Includes,
        MatchMode::IncludesWord,
        MatchMode::StartsWith,
        MatchMode::EndsWith,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MatchMode::FullExact => "full-exact",
            MatchMode::FullText => "full-text",
            MatchMode::Includes => "includes",
            MatchMode::IncludesWord => "includes-word",
            MatchMode::StartsWith => "starts-with",
            MatchMode::EndsWith => "ends-with",
        }
    }

    /// Regex template with a single `{0}` placeholder
    pub fn template(&self) -> &'static str {
        match self {
            MatchMode::FullExact => r"^{0}$",
            MatchMode::FullText => r"^\W*{0}\W*$",
            MatchMode::Includes => r"{0}",
            MatchMode::IncludesWord => r"(?:^|\W|\b){0}(?:$|\W|\b)",
            MatchMode::StartsWith => r"^{0}",
            MatchMode::EndsWith => r"{0}$",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|mode| mode.name() == name)
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|mode| mode.name()).collect()
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated modifier token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Inverse,
    Regex,
    CaseSensitive,
    Mode(MatchMode),
}

impl Modifier {
    pub fn parse(token: &str) -> Result<Self, ConditionError> {
        match token {
            INVERSE => Ok(Modifier::Inverse),
            REGEX => Ok(Modifier::Regex),
            CASE_SENSITIVE => Ok(Modifier::CaseSensitive),
            other => MatchMode::from_name(other)
                .map(Modifier::Mode)
                .ok_or_else(|| ConditionError::InvalidModifier(other.to_string())),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Inverse => f.write_str(INVERSE),
            Modifier::Regex => f.write_str(REGEX),
            Modifier::CaseSensitive => f.write_str(CASE_SENSITIVE),
            Modifier::Mode(mode) => f.write_str(mode.name()),
        }
    }
}

/// Result of splitting a decorated key such as `~message (regex, case-sensitive)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub base: String,
    pub modifiers: Vec<String>,
}

/// Split a raw rule key into its base field name and the modifier tokens
/// embedded in it. A leading `~` contributes `inverse` first, then the
/// parenthesised tokens follow in written order.
pub fn parse_field_key(key: &str) -> ParsedKey {
    let mut modifiers = Vec::new();

    let rest = match key.strip_prefix('~') {
        Some(stripped) => {
            modifiers.push(INVERSE.to_string());
            stripped
        }
        None => key,
    };

    if let Some(captures) = KEY_SYNTAX.captures(rest) {
        if let (Some(base), Some(list)) = (captures.get(1), captures.get(2)) {
            modifiers.extend(list.as_str().split(',').map(|token| token.trim().to_string()));
            return ParsedKey {
                base: base.as_str().to_string(),
                modifiers,
            };
        }
    }

    ParsedKey {
        base: rest.to_string(),
        modifiers,
    }
}

/// Validate the merged token list and pick the single active match mode.
pub fn resolve_modifiers(tokens: &[String]) -> Result<(Vec<Modifier>, MatchMode), ConditionError> {
    let mut modifiers = Vec::with_capacity(tokens.len());
    let mut modes = Vec::new();

    for token in tokens {
        let modifier = Modifier::parse(token)?;
        if let Modifier::Mode(mode) = modifier {
            modes.push(mode);
        }
        modifiers.push(modifier);
    }

    if modes.len() > 1 {
        return Err(ConditionError::MultipleMatchModifiers(
            modes.iter().map(|mode| mode.name().to_string()).collect(),
        ));
    }

    Ok((modifiers, modes.first().copied().unwrap_or_default()))
}
