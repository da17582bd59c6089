//! Offline privacy scan of a decrypted entry.
//!
//! Runs a fixed table of regex rules over the body (and title) and reports
//! which kinds of sensitive data were found, a 0-100 score, and what to do
//! about it. Nothing leaves the process.
//!
//! The scanner only accepts a [`DecryptedEntry`], which only the vault
//! session can produce, so a scan always runs after a verified decrypt.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::entry::DecryptedEntry;

/// Score for an entry with no findings.
pub const MAX_SCORE: u8 = 100;

/// Extra penalty when sensitive data shows up in the (unencrypted) title.
const TITLE_PENALTY: u32 = 10;

/// Outcome of a privacy scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// 0 (very exposed) to 100 (nothing found).
    pub security_score: u8,
    pub suggestions: Vec<String>,
    pub privacy_threats: Vec<String>,
}

impl ScanReport {
    /// Whether the scan found nothing.
    pub fn is_clean(&self) -> bool {
        self.privacy_threats.is_empty()
    }
}

struct Rule {
    label: &'static str,
    pattern: &'static str,
    weight: u32,
    threat: &'static str,
    suggestion: &'static str,
    /// Post-filter for matches the pattern alone over-approximates.
    validate: Option<fn(&str) -> bool>,
}

const RULES: &[Rule] = &[
    Rule {
        label: "credential",
        pattern: r"(?i)\b(?:password|passcode|passwd|pin)\s*(?:is|:|=)\s*\S+",
        weight: 35,
        threat: "Inline password or PIN",
        suggestion: "Keep passwords in a password manager, not in journal text",
        validate: None,
    },
    Rule {
        label: "card number",
        pattern: r"\b(?:\d[ -]?){12,18}\d\b",
        weight: 30,
        threat: "Payment card number",
        suggestion: "Remove card numbers or keep only the last four digits",
        validate: Some(luhn_valid),
    },
    Rule {
        label: "social security number",
        pattern: r"\b\d{3}-\d{2}-\d{4}\b",
        weight: 30,
        threat: "Social security number",
        suggestion: "Never write national identity numbers in full",
        validate: None,
    },
    Rule {
        label: "bank account",
        pattern: r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
        weight: 25,
        threat: "Bank account number (IBAN)",
        suggestion: "Refer to accounts by nickname instead of number",
        validate: None,
    },
    Rule {
        label: "secret token",
        pattern: r"(?i)\b(?:api[_-]?key|secret|token)\s*[:=]\s*\S{8,}",
        weight: 25,
        threat: "API key or access token",
        suggestion: "Rotate the exposed token and drop it from the entry",
        validate: None,
    },
    Rule {
        label: "government id",
        pattern: r"(?i)\b(?:passport|licen[cs]e)(?:\s+(?:no\.?|number|#))?\s*[:#]?\s*[A-Z]{0,3}\d{5,}\b",
        weight: 20,
        threat: "Passport or licence number",
        suggestion: "Mention the document without its number",
        validate: None,
    },
    Rule {
        label: "street address",
        pattern: r"(?i)\b\d{1,5}\s+(?:[A-Za-z]+\s+){1,4}(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr)\b",
        weight: 15,
        threat: "Street address",
        suggestion: "Describe places without exact addresses",
        validate: None,
    },
    Rule {
        label: "email address",
        pattern: r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        weight: 10,
        threat: "Email address",
        suggestion: "Use initials instead of full email addresses",
        validate: None,
    },
    Rule {
        label: "phone number",
        pattern: r"(?:\+\d{1,3}[ .-]?)?\(?\b\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b",
        weight: 10,
        threat: "Phone number",
        suggestion: "Leave phone numbers in your contacts app",
        validate: None,
    },
];

static COMPILED: LazyLock<Vec<(&'static Rule, Regex)>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(re) => Some((rule, re)),
            Err(e) => {
                warn!(rule = rule.label, error = %e, "scanner rule failed to compile, skipping");
                None
            }
        })
        .collect()
});

/// Scan a decrypted entry for sensitive data.
pub fn scan(entry: &DecryptedEntry) -> ScanReport {
    let report = scan_text(entry.title(), entry.body());
    debug!(
        entry_id = %entry.id(),
        score = report.security_score,
        threats = report.privacy_threats.len(),
        "entry scanned"
    );
    report
}

fn scan_text(title: &str, body: &str) -> ScanReport {
    let mut penalty = 0u32;
    let mut privacy_threats = Vec::new();
    let mut suggestions = Vec::new();

    for (rule, re) in COMPILED.iter() {
        if rule_matches(rule, re, body) {
            penalty += rule.weight;
            privacy_threats.push(rule.threat.to_owned());
            suggestions.push(rule.suggestion.to_owned());
        }
    }

    let title_hits: Vec<&str> = COMPILED
        .iter()
        .filter(|(rule, re)| rule_matches(rule, re, title))
        .map(|(rule, _)| rule.label)
        .collect();
    if !title_hits.is_empty() {
        penalty += TITLE_PENALTY;
        privacy_threats.push(format!(
            "Title contains {}, and titles are stored unencrypted",
            title_hits.join(", ")
        ));
        suggestions.push("Move sensitive details out of the title into the body".to_owned());
    }

    let security_score = u8::try_from(u32::from(MAX_SCORE).saturating_sub(penalty)).unwrap_or(0);
    ScanReport {
        security_score,
        suggestions,
        privacy_threats,
    }
}

fn rule_matches(rule: &Rule, re: &Regex, text: &str) -> bool {
    re.find_iter(text)
        .any(|m| rule.validate.is_none_or(|check| check(m.as_str())))
}

/// Luhn checksum over the digits of `candidate`, ignoring separators.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
