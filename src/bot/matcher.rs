// src/bot/matcher.rs - Evaluating compiled conditions against chat messages

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::bot::condition::{Condition, UserCriteria};
use crate::bot::error::ConditionError;
use crate::types::{ChatMessage, ServerInfo};

/// Deliberately loose: scheme URLs, `www.` hosts and bare `name.tld` forms
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:(?:https?|ftp)://[^\s<>"']+|www\.[^\s<>"']+|(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,}(?::\d+)?(?:/[^\s<>"']*)?)"#,
    )
    .unwrap()
});

/// Comparison operator for author attribute checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    LessThan,
    GreaterThan,
    Equal,
}

impl Comparator {
    /// Split `"<5"`, `"== Admin"`, `"Admin"` into operator and trimmed operand.
    /// Without an explicit operator the comparison is equality.
    pub fn parse(expression: &str) -> (Comparator, &str) {
        let expression = expression.trim();

        let (comparator, operand) = if let Some(rest) = expression.strip_prefix("==") {
            (Comparator::Equal, rest)
        } else if let Some(rest) = expression.strip_prefix('<') {
            (Comparator::LessThan, rest)
        } else if let Some(rest) = expression.strip_prefix('>') {
            (Comparator::GreaterThan, rest)
        } else if let Some(rest) = expression.strip_prefix('=') {
            (Comparator::Equal, rest)
        } else {
            (Comparator::Equal, expression)
        };

        (comparator, operand.trim())
    }

    pub fn compare<T: Ord>(&self, left: T, right: T) -> bool {
        match self {
            Comparator::LessThan => left < right,
            Comparator::GreaterThan => left > right,
            Comparator::Equal => left == right,
        }
    }
}

/// Lower-cased host names of every URL-like token in the text
pub fn extract_hostnames(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .filter_map(|found| {
            let candidate = found
                .as_str()
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'));
            let parsed = if candidate.contains("://") {
                Url::parse(candidate)
            } else {
                Url::parse(&format!("http://{}", candidate))
            };
            parsed.ok()?.host_str().map(str::to_lowercase)
        })
        .collect()
}

impl Condition {
    /// Whether this condition fires for the message.
    pub fn matches(&self, message: &ChatMessage, server: &ServerInfo) -> Result<bool, ConditionError> {
        Ok(self.evaluate(message, server)?.unwrap_or(false))
    }

    /// Criteria are checked in order user, channels, domains, message.
    /// `None` means no criterion produced a verdict.
    pub fn evaluate(&self, message: &ChatMessage, server: &ServerInfo) -> Result<Option<bool>, ConditionError> {
        if let Some(user) = &self.fields.user {
            if !Self::user_matches(user, message, server)? {
                return Ok(Some(false));
            }
        }

        if let Some(channels) = &self.fields.channels {
            match &message.channel {
                Some(channel) if channels.contains(channel) => {}
                _ => return Ok(Some(false)),
            }
        }

        // A domain hit decides the rule on its own, `message` is not consulted
        if let Some(domains) = &self.fields.domains {
            let hit = extract_hostnames(&message.content)
                .into_iter()
                .find(|host| domains.contains(host));
            return match hit {
                Some(host) => {
                    debug!("Domain match on {} in message {}", host, message.id);
                    Ok(Some(true))
                }
                None => Ok(Some(false)),
            };
        }

        if let Some(pattern) = self.text_pattern() {
            let found = pattern.is_match(&message.content);
            return Ok(Some(found == self.match_success));
        }

        Ok(None)
    }

    fn user_matches(user: &UserCriteria, message: &ChatMessage, server: &ServerInfo) -> Result<bool, ConditionError> {
        if let Some(expression) = &user.role {
            let (comparator, role_name) = Comparator::parse(expression);
            let role = server
                .find_role_by_name(role_name)
                .ok_or_else(|| ConditionError::RoleNotResolved(role_name.to_string()))?;

            if !comparator.compare(message.author_highest_role_position, role.position) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerRole;
    use chrono::Utc;

    fn condition(yaml: &str) -> Condition {
        Condition::compile(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    fn message(content: &str) -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            server_id: "s1".to_string(),
            channel: Some("general".to_string()),
            author_id: "u1".to_string(),
            author_name: "tester".to_string(),
            author_highest_role_position: 2,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn server() -> ServerInfo {
        let mut server = ServerInfo::new("s1", "test server");
        for (name, position) in [("Member", 1), ("Regular", 2), ("Moderator", 5)] {
            server.roles.push(ServerRole {
                id: name.to_lowercase(),
                name: name.to_string(),
                position,
            });
        }
        server
    }

    #[test]
    fn test_includes_match() {
        let cond = condition("message: test message\naction: remove\n");
        assert!(cond.matches(&message("this is a test message"), &server()).unwrap());
        assert!(!cond.matches(&message("nothing to see"), &server()).unwrap());
    }

    #[test]
    fn test_inverse_match() {
        let cond = condition("'~message': test message\naction: remove\n");
        assert!(!cond.matches(&message("this is a test message"), &server()).unwrap());

        let cond = condition("'~message': not found message\naction: remove\n");
        assert!(cond.matches(&message("this is a test message"), &server()).unwrap());
    }

    #[test]
    fn test_case_sensitivity() {
        let cond = condition("message: Hello\naction: remove\n");
        assert!(cond.matches(&message("oh HELLO there"), &server()).unwrap());

        let cond = condition("'message (case-sensitive)': Hello\naction: remove\n");
        assert!(!cond.matches(&message("oh HELLO there"), &server()).unwrap());
        assert!(cond.matches(&message("oh Hello there"), &server()).unwrap());
    }

    #[test]
    fn test_match_modes() {
        let srv = server();

        let cond = condition("'message (full-exact)': hi\naction: remove\n");
        assert!(cond.matches(&message("hi"), &srv).unwrap());
        assert!(!cond.matches(&message("hi!"), &srv).unwrap());

        let cond = condition("'message (full-text)': hi\naction: remove\n");
        assert!(cond.matches(&message("  hi!!"), &srv).unwrap());
        assert!(!cond.matches(&message("hi there"), &srv).unwrap());

        let cond = condition("'message (includes-word)': cat\naction: remove\n");
        assert!(cond.matches(&message("my cat is here"), &srv).unwrap());
        assert!(cond.matches(&message("cat"), &srv).unwrap());

        let cond = condition("'message (starts-with)': '!buy'\naction: remove\n");
        assert!(cond.matches(&message("!buy now"), &srv).unwrap());
        assert!(!cond.matches(&message("please !buy"), &srv).unwrap());

        let cond = condition("'message (ends-with)': '?'\naction: remove\n");
        assert!(cond.matches(&message("really?"), &srv).unwrap());
        assert!(!cond.matches(&message("? no"), &srv).unwrap());
    }

    #[test]
    fn test_non_ascii_letters_separate_words() {
        let srv = server();

        let cond = condition("'message (full-text)': hi\naction: remove\n");
        assert!(cond.matches(&message("éhié"), &srv).unwrap());

        let cond = condition("'message (includes-word)': cat\naction: remove\n");
        assert!(cond.matches(&message("ñcatñ"), &srv).unwrap());
        assert!(!cond.matches(&message("concatenate"), &srv).unwrap());
    }

    #[test]
    fn test_literal_vs_regex_values() {
        let srv = server();

        let cond = condition("message: te?st\naction: remove\n");
        assert!(cond.matches(&message("a te?st here"), &srv).unwrap());
        assert!(!cond.matches(&message("a test here"), &srv).unwrap());

        let cond = condition("'message (regex)': te?st\naction: remove\n");
        assert!(cond.matches(&message("a test here"), &srv).unwrap());
    }

    #[test]
    fn test_any_of_values() {
        let cond = condition("message: [apple, banana]\naction: remove\n");
        assert!(cond.matches(&message("I like banana bread"), &server()).unwrap());
        assert!(!cond.matches(&message("cherry"), &server()).unwrap());
    }

    #[test]
    fn test_channel_filter() {
        let cond = condition("message: spam\nchannels: [general]\naction: remove\n");
        assert!(cond.matches(&message("spam"), &server()).unwrap());

        let mut other = message("spam");
        other.channel = Some("offtopic".to_string());
        assert!(!cond.matches(&other, &server()).unwrap());

        let mut direct = message("spam");
        direct.channel = None;
        assert!(!cond.matches(&direct, &server()).unwrap());
    }

    #[test]
    fn test_domain_filter() {
        let cond = condition("domains: [bad.example]\naction: remove\n");
        assert!(cond.matches(&message("visit https://BAD.example/page now"), &server()).unwrap());
        assert!(cond.matches(&message("see bad.example."), &server()).unwrap());
        assert!(!cond.matches(&message("visit https://good.example"), &server()).unwrap());
        assert!(!cond.matches(&message("no links at all"), &server()).unwrap());
    }

    #[test]
    fn test_unicode_domain_filter() {
        let cond = condition("domains: ['bücher.de']\naction: remove\n");
        assert!(cond.matches(&message("see https://bücher.de/x"), &server()).unwrap());
        assert!(cond.matches(&message("or xn--bcher-kva.de"), &server()).unwrap());
        assert!(!cond.matches(&message("see https://buecher.de/x"), &server()).unwrap());
    }

    #[test]
    fn test_domain_hit_ignores_message_criterion() {
        let cond = condition("domains: [bad.example]\nmessage: never present\naction: remove\n");
        // exact host match only, and `message` never rescues a domain miss
        assert!(!cond.matches(&message("www.bad.example is fine"), &server()).unwrap());
        assert!(!cond.matches(&message("never present"), &server()).unwrap());
        assert!(cond.matches(&message("http://bad.example"), &server()).unwrap());
    }

    #[test]
    fn test_extract_hostnames() {
        let hosts = extract_hostnames("go to https://Foo.com/a, or www.bar.org and baz.net/x.");
        assert_eq!(hosts, vec!["foo.com", "www.bar.org", "baz.net"]);
    }

    #[test]
    fn test_user_role_comparators() {
        let srv = server();

        // author position is 2 (Regular)
        let below_mod = condition("message: x\nuser:\n  role: '< moderator'\naction: remove\n");
        assert!(below_mod.matches(&message("x"), &srv).unwrap());

        let above_member = condition("message: x\nuser:\n  role: '>Member'\naction: remove\n");
        assert!(above_member.matches(&message("x"), &srv).unwrap());

        let exactly_regular = condition("message: x\nuser:\n  role: '== Regular'\naction: remove\n");
        assert!(exactly_regular.matches(&message("x"), &srv).unwrap());

        let implicit_equal = condition("message: x\nuser:\n  role: moderator\naction: remove\n");
        assert!(!implicit_equal.matches(&message("x"), &srv).unwrap());
    }

    #[test]
    fn test_unresolved_role_is_an_error() {
        let cond = condition("message: x\nuser:\n  role: '<Admin'\naction: remove\n");
        let err = cond.matches(&message("x"), &server()).unwrap_err();
        assert!(matches!(err, ConditionError::RoleNotResolved(ref r) if r == "Admin"));
    }

    #[test]
    fn test_no_verdict_without_text_or_domain() {
        let cond = condition("channels: [general]\naction: remove\n");
        assert_eq!(cond.evaluate(&message("anything"), &server()).unwrap(), None);
        assert!(!cond.matches(&message("anything"), &server()).unwrap());
    }

    #[test]
    fn test_comparator_parse() {
        assert_eq!(Comparator::parse("<5"), (Comparator::LessThan, "5"));
        assert_eq!(Comparator::parse(" > 5 "), (Comparator::GreaterThan, "5"));
        assert_eq!(Comparator::parse("==Admin"), (Comparator::Equal, "Admin"));
        assert_eq!(Comparator::parse("= Admin"), (Comparator::Equal, "Admin"));
        assert_eq!(Comparator::parse("Admin"), (Comparator::Equal, "Admin"));
    }
}
