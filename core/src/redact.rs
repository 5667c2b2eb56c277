//! Output redaction. Every tool result is walked recursively and string
//! values are scrubbed against the configured sensitive-data patterns
//! before anything reaches the transport.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use regex_lite::Regex;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::info;
use tracing::warn;

use crate::config::Config;

const REDACTED: &str = "[REDACTED]";

fn replacement_for(pattern_name: &str) -> &'static str {
    match pattern_name {
        "credit_card" => "[CREDIT-CARD-REDACTED]",
        "ssn" => "[SSN-REDACTED]",
        "email" => "[EMAIL-REDACTED]",
        "phone_us" => "[PHONE-REDACTED]",
        "password_field" => "[PASSWORD-FIELD]",
        _ => REDACTED,
    }
}

pub struct OutputRedactor {
    patterns: Vec<(String, Regex)>,
    redaction_count: AtomicU64,
}

impl OutputRedactor {
    pub fn new(config: &Arc<RwLock<Config>>) -> Self {
        let mut patterns = Vec::new();
        let config = config.read().unwrap_or_else(|p| p.into_inner());
        for (name, raw) in &config.security.sensitive_patterns {
            match Regex::new(raw) {
                Ok(regex) => patterns.push((name.clone(), regex)),
                Err(e) => warn!("invalid sensitive pattern '{name}': {e}"),
            }
        }
        Self {
            patterns,
            redaction_count: AtomicU64::new(0),
        }
    }

    /// Scrub one string. Returns the sanitized text and how many
    /// replacements were made.
    fn sanitize_str(&self, text: &str) -> (String, u64) {
        let mut sanitized = text.to_string();
        let mut count = 0u64;
        for (name, regex) in &self.patterns {
            let replacement = replacement_for(name);
            let matches = regex.find_iter(&sanitized).count() as u64;
            if matches > 0 {
                sanitized = regex.replace_all(&sanitized, replacement).into_owned();
                count += matches;
            }
        }
        (sanitized, count)
    }

    /// Recursively sanitize every string in a result value. Numbers and
    /// booleans pass through unchanged. Object keys are left alone; only
    /// values carry user data.
    pub fn sanitize_value(&self, value: JsonValue) -> JsonValue {
        let mut total = 0u64;
        let sanitized = self.walk(value, &mut total);
        if total > 0 {
            self.redaction_count.fetch_add(total, Ordering::Relaxed);
            info!("redacted {total} sensitive data match(es)");
        }
        sanitized
    }

    fn walk(&self, value: JsonValue, total: &mut u64) -> JsonValue {
        match value {
            JsonValue::String(s) => {
                let (sanitized, count) = self.sanitize_str(&s);
                *total += count;
                JsonValue::String(sanitized)
            }
            JsonValue::Array(items) => {
                JsonValue::Array(items.into_iter().map(|v| self.walk(v, total)).collect())
            }
            JsonValue::Object(map) => JsonValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.walk(v, total)))
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn total_redactions(&self) -> u64 {
        self.redaction_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> JsonValue {
        json!({
            "total_redactions": self.total_redactions(),
            "active_patterns": self.patterns.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
            "patterns_count": self.patterns.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn redactor() -> OutputRedactor {
        OutputRedactor::new(&Arc::new(RwLock::new(Config::default())))
    }

    #[test]
    fn credit_card_and_email_are_replaced() {
        let redactor = redactor();
        let value = json!({
            "text": "card 4111 1111 1111 1111 owned by alice@example.com",
            "count": 3,
        });
        let sanitized = redactor.sanitize_value(value);
        let text = sanitized["text"].as_str().unwrap();
        assert!(text.contains("[CREDIT-CARD-REDACTED]"));
        assert!(text.contains("[EMAIL-REDACTED]"));
        assert!(!text.contains("4111"));
        assert_eq!(sanitized["count"], json!(3));
    }

    #[test]
    fn nested_structures_are_walked() {
        let redactor = redactor();
        let value = json!({
            "rows": [{"ssn": "123-45-6789"}, {"note": "nothing here"}],
        });
        let sanitized = redactor.sanitize_value(value);
        assert_eq!(sanitized["rows"][0]["ssn"], json!("[SSN-REDACTED]"));
        assert_eq!(sanitized["rows"][1]["note"], json!("nothing here"));
        assert!(redactor.total_redactions() >= 1);
    }

    #[test]
    fn password_indicator_is_flagged() {
        let redactor = redactor();
        let sanitized = redactor.sanitize_value(json!("enter your Password below"));
        assert!(sanitized.as_str().unwrap().contains("[PASSWORD-FIELD]"));
    }

    #[test]
    fn no_configured_pattern_survives_redaction() {
        let redactor = redactor();
        let config = Config::default();
        let sanitized = redactor.sanitize_value(json!(
            "4111-1111-1111-1111 123-45-6789 bob@mail.org (555) 123-4567"
        ));
        let text = sanitized.as_str().unwrap().to_string();
        for pattern in config.security.sensitive_patterns.values() {
            let regex = Regex::new(pattern).unwrap();
            assert!(
                regex.find(&text).is_none(),
                "pattern {pattern} still matches: {text}"
            );
        }
    }
}
