//! Password policy evaluation and decomposition of provider policy messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single unmet password rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum PolicyRule {
    MinLength(usize),
    Uppercase,
    Lowercase,
    Digit,
    Symbol,
    /// Provider text that matched none of the known rules.
    Other(String),
}

impl PolicyRule {
    pub fn user_message(&self) -> String {
        match self {
            PolicyRule::MinLength(n) => format!("Password must be at least {n} characters long."),
            PolicyRule::Uppercase => "Password must contain an uppercase letter.".to_string(),
            PolicyRule::Lowercase => "Password must contain a lowercase letter.".to_string(),
            PolicyRule::Digit => "Password must contain a number.".to_string(),
            PolicyRule::Symbol => "Password must contain a special character.".to_string(),
            PolicyRule::Other(message) => message.clone(),
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyRule::MinLength(n) => write!(f, "min_length={n}"),
            PolicyRule::Uppercase => write!(f, "uppercase"),
            PolicyRule::Lowercase => write!(f, "lowercase"),
            PolicyRule::Digit => write!(f, "digit"),
            PolicyRule::Symbol => write!(f, "symbol"),
            PolicyRule::Other(_) => write!(f, "other"),
        }
    }
}

/// The set of rules a proposed secret failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rules: Vec<PolicyRule>,
}

impl PolicyViolation {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Decompose an unstructured provider message into the unmet rules.
    ///
    /// The provider text is free-form, so this matches keywords
    /// case-insensitively. The minimum length is taken from `policy` because
    /// the provider does not always state it.
    pub fn from_provider_message(message: &str, policy: &PasswordPolicy) -> Self {
        let lower = message.to_lowercase();
        let mut rules = Vec::new();

        if lower.contains("uppercase") || lower.contains("upper case") {
            rules.push(PolicyRule::Uppercase);
        }
        if lower.contains("lowercase") || lower.contains("lower case") {
            rules.push(PolicyRule::Lowercase);
        }
        if lower.contains("numeric") || lower.contains("number") || lower.contains("digit") {
            rules.push(PolicyRule::Digit);
        }
        if lower.contains("symbol") || lower.contains("special") {
            rules.push(PolicyRule::Symbol);
        }
        if lower.contains("long enough") || lower.contains("length") || lower.contains('8') {
            rules.push(PolicyRule::MinLength(policy.min_length));
        }

        if rules.is_empty() {
            rules.push(PolicyRule::Other(message.trim().to_string()));
        }

        Self { rules }
    }

    pub fn cites(&self, rule: &PolicyRule) -> bool {
        self.rules.contains(rule)
    }

    pub fn cites_min_length(&self) -> bool {
        self.rules
            .iter()
            .any(|rule| matches!(rule, PolicyRule::MinLength(_)))
    }

    pub fn user_message(&self) -> String {
        self.rules
            .iter()
            .map(PolicyRule::user_message)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .rules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&rendered)
    }
}

/// Password requirements mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: true,
        }
    }
}

impl PasswordPolicy {
    /// Evaluate every rule and report all the unmet ones.
    pub fn check(&self, secret: &str) -> Result<(), PolicyViolation> {
        let mut rules = Vec::new();

        if secret.chars().count() < self.min_length {
            rules.push(PolicyRule::MinLength(self.min_length));
        }
        if self.require_uppercase && !secret.chars().any(|c| c.is_uppercase()) {
            rules.push(PolicyRule::Uppercase);
        }
        if self.require_lowercase && !secret.chars().any(|c| c.is_lowercase()) {
            rules.push(PolicyRule::Lowercase);
        }
        if self.require_digit && !secret.chars().any(|c| c.is_ascii_digit()) {
            rules.push(PolicyRule::Digit);
        }
        if self.require_symbol && secret.chars().all(|c| c.is_ascii_alphanumeric()) {
            rules.push(PolicyRule::Symbol);
        }

        if rules.is_empty() {
            Ok(())
        } else {
            Err(PolicyViolation::new(rules))
        }
    }
}
