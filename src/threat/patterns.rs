//! Attack-signature table.
//!
//! One fixed rule set, compiled once on first use. The rules are signatures
//! for well-known injection shapes, not a parser; anything they miss is
//! caught by rate limits and volume detection downstream.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Category of a detected threat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    SqlInjection,
    ScriptInjection,
    PathTraversal,
    CodeInjection,
    VolumeFlood,
}

impl ThreatCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ThreatCategory::SqlInjection => "sql_injection",
            ThreatCategory::ScriptInjection => "script_injection",
            ThreatCategory::PathTraversal => "path_traversal",
            ThreatCategory::CodeInjection => "code_injection",
            ThreatCategory::VolumeFlood => "volume_flood",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sql_injection" => Some(ThreatCategory::SqlInjection),
            "script_injection" => Some(ThreatCategory::ScriptInjection),
            "path_traversal" => Some(ThreatCategory::PathTraversal),
            "code_injection" => Some(ThreatCategory::CodeInjection),
            "volume_flood" => Some(ThreatCategory::VolumeFlood),
            _ => None,
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Rule {
    pattern: Regex,
    category: ThreatCategory,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        // Patterns are fixed strings; a compile failure here is a programming
        // error caught by the rule-table test.
        let table: &[(&str, ThreatCategory)] = &[
            (
                r#"(?i)\bunion\s+select\b|\bor\s+1\s*=\s*1\b|'\s*or\s*'|;\s*drop\s+table\b|\bsleep\s*\(|--\s"#,
                ThreatCategory::SqlInjection,
            ),
            (
                r"(?i)<script\b|javascript:|\bon(?:error|load|click)\s*=",
                ThreatCategory::ScriptInjection,
            ),
            (
                r"(?i)\.\./|\.\.\\|%2e%2e%2f|%2e%2e/|\.\.%2f",
                ThreatCategory::PathTraversal,
            ),
            (
                r"(?i);\s*(?:cat|ls|rm|wget|curl|nc)\b|\b(?:eval|exec|system)\s*\(|\$\(|`[^`]*`",
                ThreatCategory::CodeInjection,
            ),
        ];
        table
            .iter()
            .map(|(pattern, category)| Rule {
                pattern: Regex::new(pattern).expect("rule table regex"),
                category: *category,
            })
            .collect()
    })
}

/// Scans one text fragment; returns the first matching rule's category.
#[must_use]
pub fn scan(fragment: &str) -> Option<ThreatCategory> {
    rules()
        .iter()
        .find(|rule| rule.pattern.is_match(fragment))
        .map(|rule| rule.category)
}
