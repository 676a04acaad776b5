//! Diagnostic classification
//!
//! Console and page-exception text is free-form, so classification is a fixed,
//! ordered rule table: the first rule whose pattern matches decides the bucket.
//! Anything unmatched falls back to the reporting severity.
//!
//! ```text
//! structural markers  ->  structural-error   (+ duplicate-attribute sub-bucket)
//! [framework] tags    ->  framework-error
//! "Error:" prefix     ->  generic-error
//! "Warning:" prefix   ->  generic-warning
//! otherwise           ->  by severity
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use browser::ConsoleLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl From<ConsoleLevel> for Severity {
    fn from(level: ConsoleLevel) -> Self {
        match level {
            ConsoleLevel::Error => Severity::Error,
            ConsoleLevel::Warning => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticSource {
    Console,
    PageException,
}

/// One console or page-level error/warning, as emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub text: String,
    pub severity: Severity,
    pub source: DiagnosticSource,
}

impl DiagnosticMessage {
    pub fn console(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity,
            source: DiagnosticSource::Console,
        }
    }

    /// Uncaught exceptions always report as errors
    pub fn exception(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Error,
            source: DiagnosticSource::PageException,
        }
    }

    /// Empty diagnostics carry no information and are never counted
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Classification buckets. `DuplicateAttribute` is a sub-bucket of
/// `StructuralError` and is never returned as a primary bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    StructuralError,
    FrameworkError,
    GenericError,
    GenericWarning,
    DuplicateAttribute,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    bucket: Bucket,
}

/// Marker for the duplicate-attribute sub-bucket. Also the first rule.
const DUPLICATE_ATTRIBUTE: &str = r"(?i)duplicate attribute";

/// Ordered rule table. Order is the precedence.
const RULE_TABLE: &[(&str, &str, Bucket)] = &[
    ("duplicate-attribute", DUPLICATE_ATTRIBUTE, Bucket::StructuralError),
    (
        "malformed-tag",
        r"(?i)missing end tag|invalid end tag|mismatched end tag|unexpected eof in tag|unterminated|unclosed (?:tag|element)",
        Bucket::StructuralError,
    ),
    (
        "directive-misuse",
        r"(?i)has no adjacent v-if|v-[a-z-]+ is missing expression|v-model can only be used on|failed to resolve directive|invalid directive",
        Bucket::StructuralError,
    ),
    (
        "framework-tag",
        r"(?i)\[\s*(?:vue|vue-router|vue router|vuex|pinia|react|react-dom|angular|svelte|nuxt|vite)\b[^\]]*\]",
        Bucket::FrameworkError,
    ),
    ("error-prefix", r"^\s*Error:", Bucket::GenericError),
    ("warning-prefix", r"^\s*Warning:", Bucket::GenericWarning),
];

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULE_TABLE
        .iter()
        .map(|&(name, pattern, bucket)| Rule {
            name,
            pattern: Regex::new(pattern).expect("classifier rule table holds valid patterns"),
            bucket,
        })
        .collect()
});

static DUPLICATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DUPLICATE_ATTRIBUTE).expect("classifier rule table holds valid patterns")
});

/// Primary bucket of a message. Total and pure.
pub fn classify(message: &DiagnosticMessage) -> Bucket {
    matching_rule(message)
        .map(|rule| rule.bucket)
        .unwrap_or(match message.severity {
            Severity::Error => Bucket::GenericError,
            Severity::Warning => Bucket::GenericWarning,
        })
}

/// Name of the rule that decided the bucket, `None` for the severity fallback
pub fn matched_rule(message: &DiagnosticMessage) -> Option<&'static str> {
    matching_rule(message).map(|rule| rule.name)
}

pub fn is_duplicate_attribute(message: &DiagnosticMessage) -> bool {
    DUPLICATE.is_match(&message.text)
}

fn matching_rule(message: &DiagnosticMessage) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.pattern.is_match(&message.text))
}

/// Per-bucket message counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BucketCounts {
    pub structural_error: u32,
    pub framework_error: u32,
    pub generic_error: u32,
    pub generic_warning: u32,
    pub duplicate_attribute: u32,
}

impl BucketCounts {
    /// Classify and count one message. Blank messages are dropped; returns
    /// whether the message was counted.
    pub fn record(&mut self, message: &DiagnosticMessage) -> bool {
        if message.is_blank() {
            return false;
        }
        *self.slot(classify(message)) += 1;
        if is_duplicate_attribute(message) {
            self.duplicate_attribute += 1;
        }
        true
    }

    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a DiagnosticMessage>) -> Self {
        let mut counts = Self::default();
        for message in messages {
            counts.record(message);
        }
        counts
    }

    pub fn get(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::StructuralError => self.structural_error,
            Bucket::FrameworkError => self.framework_error,
            Bucket::GenericError => self.generic_error,
            Bucket::GenericWarning => self.generic_warning,
            Bucket::DuplicateAttribute => self.duplicate_attribute,
        }
    }

    fn slot(&mut self, bucket: Bucket) -> &mut u32 {
        match bucket {
            Bucket::StructuralError => &mut self.structural_error,
            Bucket::FrameworkError => &mut self.framework_error,
            Bucket::GenericError => &mut self.generic_error,
            Bucket::GenericWarning => &mut self.generic_warning,
            Bucket::DuplicateAttribute => &mut self.duplicate_attribute,
        }
    }

    pub fn merge(&mut self, other: &BucketCounts) {
        self.structural_error += other.structural_error;
        self.framework_error += other.framework_error;
        self.generic_error += other.generic_error;
        self.generic_warning += other.generic_warning;
        self.duplicate_attribute += other.duplicate_attribute;
    }

    /// Errors that aren't structural: generic plus framework
    pub fn errors(&self) -> u32 {
        self.generic_error + self.framework_error
    }

    /// Structural errors plus their duplicate-attribute sub-bucket
    pub fn structural(&self) -> u32 {
        self.structural_error + self.duplicate_attribute
    }

    /// Ranking key: errors + structural + duplicate-attribute
    pub fn problems(&self) -> u32 {
        self.errors() + self.structural()
    }
}
