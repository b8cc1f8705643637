//! Commit classification.
//!
//! A commit is [`CommitClass::Automatic`] when its message carries an
//! automation marker or its author identity looks like a bot or service
//! account; otherwise it is [`CommitClass::Manual`]. Rules are checked in that
//! order and the first match wins.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::vcs::CommitRef;

/// Automation markers looked for in commit messages.
pub const DEFAULT_MESSAGE_PATTERNS: &[&str] = &[r"auto-?merge", r"\bautomatic\b", r"\[bot\]", "🤖"];

/// Bot-like author names.
pub const DEFAULT_AUTHOR_PATTERNS: &[&str] = &["bot", "github", "codex"];

/// Service-account email markers.
pub const DEFAULT_EMAIL_PATTERNS: &[&str] = &["noreply", "bot"];

/// Who produced a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitClass {
    Automatic,
    Manual,
}

impl fmt::Display for CommitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => f.write_str("automatic"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Compiled classification rules.
#[derive(Debug, Clone)]
pub struct CommitClassifier {
    message: Vec<Regex>,
    author: Vec<Regex>,
    email: Vec<Regex>,
}

fn compile(field: &'static str, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::InvalidPattern {
                    field,
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

impl CommitClassifier {
    /// Compile case-insensitive patterns for each rule.
    pub fn new(
        message: &[String],
        author: &[String],
        email: &[String],
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            message: compile("message", message)?,
            author: compile("author", author)?,
            email: compile("email", email)?,
        })
    }

    /// Classify a commit. Pure and deterministic.
    pub fn classify(&self, commit: &CommitRef) -> CommitClass {
        let matches = |rules: &[Regex], text: &str| rules.iter().any(|r| r.is_match(text));

        if matches(&self.message, &commit.message) {
            return CommitClass::Automatic;
        }
        if matches(&self.author, &commit.author) || matches(&self.email, &commit.email) {
            return CommitClass::Automatic;
        }
        CommitClass::Manual
    }
}

impl Default for CommitClassifier {
    fn default() -> Self {
        let owned = |p: &[&str]| p.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        // Built-in patterns are known to compile.
        Self::new(
            &owned(DEFAULT_MESSAGE_PATTERNS),
            &owned(DEFAULT_AUTHOR_PATTERNS),
            &owned(DEFAULT_EMAIL_PATTERNS),
        )
        .unwrap_or(Self {
            message: Vec::new(),
            author: Vec::new(),
            email: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(author: &str, email: &str, message: &str) -> CommitRef {
        CommitRef {
            id: "deadbeef".to_string(),
            author: author.to_string(),
            email: email.to_string(),
            message: message.to_string(),
            timestamp: Some(0),
            branch: "main".to_string(),
        }
    }

    #[test]
    fn message_markers_are_automatic() {
        let classifier = CommitClassifier::default();
        for message in [
            "Auto-merge branch 'dev'",
            "automerge from upstream",
            "Automatic update of lockfile",
            "chore: bump deps [bot]",
            "🤖 generated changes",
        ] {
            assert_eq!(
                classifier.classify(&commit("Ada", "ada@example.com", message)),
                CommitClass::Automatic,
                "{message}"
            );
        }
    }

    #[test]
    fn automatically_is_not_a_marker() {
        let classifier = CommitClassifier::default();
        let c = commit("Ada", "ada@example.com", "Run formatter automatically on save");
        assert_eq!(classifier.classify(&c), CommitClass::Manual);
    }

    #[test]
    fn bot_identities_are_automatic() {
        let classifier = CommitClassifier::default();
        assert_eq!(
            classifier.classify(&commit("dependabot[bot]", "x@example.com", "Bump serde")),
            CommitClass::Automatic
        );
        assert_eq!(
            classifier.classify(&commit("GitHub", "web@example.com", "Update README.md")),
            CommitClass::Automatic
        );
        assert_eq!(
            classifier.classify(&commit("Ada", "ada@users.noreply.github.com", "Fix typo")),
            CommitClass::Automatic
        );
        assert_eq!(
            classifier.classify(&commit("Codex", "agent@example.com", "Refactor module")),
            CommitClass::Automatic
        );
    }

    #[test]
    fn plain_human_commit_is_manual() {
        let classifier = CommitClassifier::default();
        assert_eq!(
            classifier.classify(&commit("Ada Lovelace", "ada@example.com", "Fix off-by-one")),
            CommitClass::Manual
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = CommitClassifier::default();
        let c = commit("Grace", "grace@example.com", "Tidy imports");
        let first = classifier.classify(&c);
        assert!((0..10).all(|_| classifier.classify(&c) == first));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let classifier = CommitClassifier::new(
            &["^release:".to_string()],
            &["ci-runner".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(
            classifier.classify(&commit("Ada", "ada@example.com", "RELEASE: v1.2")),
            CommitClass::Automatic
        );
        assert_eq!(
            classifier.classify(&commit("dependabot", "x@noreply.example", "Bump")),
            CommitClass::Manual
        );
    }
}
