//! Secret scrubbing for text leaving the daemon
//!
//! Rules run in order; each rule sees the output of the previous one.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Replacement used when a rule doesn't name one
pub const REDACTED: &str = "***REDACTED***";

/// A named redaction rule as it appears in the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedactionRule {
    pub name: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Any of `i` (ignore case), `m` (multi-line), `s` (dot matches newline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

impl RedactionRule {
    pub fn new(name: &str, pattern: &str, replacement: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            replacement: replacement.map(|r| r.to_string()),
            flags: None,
        }
    }

    /// The built-in rule set
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "private-key-block",
                r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
                None,
            ),
            Self::new(
                "password-assignment",
                r#"(?i)\b(password|passwd|pwd)(\s*[:=]\s*)[^\s'",;]+"#,
                Some("${1}${2}***REDACTED***"),
            ),
            Self::new(
                "secret-assignment",
                r#"(?i)\b(api[_-]?key|secret|access[_-]?token|auth[_-]?token)(\s*[:=]\s*)[^\s'",;]+"#,
                Some("${1}${2}***REDACTED***"),
            ),
            Self::new(
                "bearer-token",
                r"(?i)\b(bearer\s+)[A-Za-z0-9._~+/-]+=*",
                Some("${1}***REDACTED***"),
            ),
            Self::new("aws-access-key", r"\bAKIA[0-9A-Z]{16}\b", None),
        ]
    }

    fn compile(&self) -> std::result::Result<Regex, regex::Error> {
        let flags = self.flags.as_deref().unwrap_or("");
        RegexBuilder::new(&self.pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .build()
    }
}

/// Result of redacting a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub text: String,
    pub changed: bool,
}

struct CompiledRule {
    regex: Regex,
    replacement: String,
}

/// Compiled, ordered rule set
pub struct Redactor {
    rules: Vec<CompiledRule>,
}

impl Redactor {
    /// Compile every rule; fails on the first invalid pattern
    pub fn new(rules: &[RedactionRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = rule.compile().map_err(|e| {
                    BridgeError::InvalidInput(format!("redaction rule '{}': {}", rule.name, e))
                })?;
                Ok(CompiledRule {
                    regex,
                    replacement: rule
                        .replacement
                        .clone()
                        .unwrap_or_else(|| REDACTED.to_string()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Check a single rule without building a redactor
    pub fn check_rule(rule: &RedactionRule) -> std::result::Result<(), String> {
        rule.compile().map(|_| ()).map_err(|e| e.to_string())
    }

    pub fn redact(&self, text: &str) -> Redacted {
        let mut current = text.to_string();
        let mut changed = false;

        for rule in &self.rules {
            if rule.regex.is_match(&current) {
                changed = true;
                current = rule
                    .regex
                    .replace_all(&current, rule.replacement.as_str())
                    .into_owned();
            }
        }

        Redacted {
            text: current,
            changed,
        }
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("rules", &self.rules.len())
            .finish()
    }
}
