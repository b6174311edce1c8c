//! Keyword-based intent classification.
//!
//! The intent is the last component of a packet's cache key, so the same
//! tool used for a different purpose ranks separately.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Coarse purpose of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Intent {
    /// Authentication, secrets, permissions.
    AuthSecurity,
    /// Schema changes and data moves.
    DataMigration,
    /// Writing or running tests.
    Testing,
    /// Adding or upgrading dependencies.
    DependencyManagement,
    /// Builds, CI and deployment.
    BuildDeploy,
    /// Docs and changelogs.
    Documentation,
    /// Nothing more specific matched.
    General,
}

impl Intent {
    /// Returns the intent as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSecurity => "auth_security",
            Self::DataMigration => "data_migration",
            Self::Testing => "testing",
            Self::DependencyManagement => "dependency_management",
            Self::BuildDeploy => "build_deploy",
            Self::Documentation => "documentation",
            Self::General => "general",
        }
    }

    /// Parses an intent name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auth_security" | "auth" | "security" => Some(Self::AuthSecurity),
            "data_migration" | "migration" => Some(Self::DataMigration),
            "testing" | "test" => Some(Self::Testing),
            "dependency_management" | "dependencies" => Some(Self::DependencyManagement),
            "build_deploy" | "build" | "deploy" => Some(Self::BuildDeploy),
            "documentation" | "docs" => Some(Self::Documentation),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct IntentSignal {
    pattern: Regex,
    intent: Intent,
}

/// Signal patterns, listed in tie-break priority order.
static INTENT_SIGNALS: LazyLock<Vec<IntentSignal>> = LazyLock::new(|| {
    vec![
        IntentSignal {
            pattern: Regex::new(
                r"(?i)\b(auth\w*|login|logout|passwords?|secrets?|tokens?|jwt|oauth2?|credentials?|csrf|xss|encrypt\w*|decrypt\w*|permissions?|rbac|acl|sanitiz\w*)\b",
            )
            .expect("static regex: auth/security"),
            intent: Intent::AuthSecurity,
        },
        IntentSignal {
            pattern: Regex::new(
                r"(?i)\b(migrat\w*|schema|alter\s+table|create\s+table|drop\s+table|sql|database|seeds?)\b",
            )
            .expect("static regex: data migration"),
            intent: Intent::DataMigration,
        },
        IntentSignal {
            pattern: Regex::new(
                r"(?i)(\b(tests?|pytest|jest|vitest|asserts?|assertions?|mocks?|fixtures?|coverage)\b|_test\.|\.spec\.|\btests?/)",
            )
            .expect("static regex: testing"),
            intent: Intent::Testing,
        },
        IntentSignal {
            pattern: Regex::new(
                r"(?i)(\b(cargo\s+add|cargo\s+update|npm\s+(install|i|update)|pip\s+install|yarn\s+add|pnpm\s+add|dependenc\w*|lockfile|upgrade|bump)\b|package\.json|cargo\.toml|requirements\.txt|go\.mod)",
            )
            .expect("static regex: dependency management"),
            intent: Intent::DependencyManagement,
        },
        IntentSignal {
            pattern: Regex::new(
                r"(?i)(\b(build|deploy\w*|docker\w*|kubernetes|k8s|helm|pipeline|release|terraform|makefile)\b|\.github/workflows|dockerfile)",
            )
            .expect("static regex: build/deploy"),
            intent: Intent::BuildDeploy,
        },
        IntentSignal {
            pattern: Regex::new(r"(?i)(\b(readme|docs?|documentation|changelog|docstrings?)\b|\.md\b)")
                .expect("static regex: documentation"),
            intent: Intent::Documentation,
        },
    ]
});

/// Classifies tool calls into an [`Intent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    /// Creates a classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classifies from the tool name, referenced resources and free text.
    ///
    /// The intent with the most matching signals wins; ties go to the intent
    /// listed first in [`INTENT_SIGNALS`].
    #[must_use]
    pub fn classify(&self, tool_name: &str, resources: &[String], text: &str) -> Intent {
        let haystack = format!("{tool_name} {} {text}", resources.join(" "));

        let mut best = Intent::General;
        let mut best_count = 0;
        for signal in INTENT_SIGNALS.iter() {
            let count = signal.pattern.find_iter(&haystack).count();
            if count > best_count {
                best = signal.intent;
                best_count = count;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Edit", &["src/auth/jwt.rs"], "verify the token signature" => Intent::AuthSecurity; "auth")]
    #[test_case("Bash", &[], "cargo test --all" => Intent::Testing; "tests")]
    #[test_case("Write", &["migrations/0003_add_users.sql"], "" => Intent::DataMigration; "migration")]
    #[test_case("Bash", &[], "npm install left-pad" => Intent::DependencyManagement; "deps")]
    #[test_case("Edit", &["Dockerfile"], "" => Intent::BuildDeploy; "docker")]
    #[test_case("Edit", &["README.md"], "" => Intent::Documentation; "docs")]
    #[test_case("Read", &["src/main.rs"], "look around" => Intent::General; "general")]
    fn test_classify(tool: &str, resources: &[&str], text: &str) -> Intent {
        let resources: Vec<String> = resources.iter().map(ToString::to_string).collect();
        IntentClassifier::new().classify(tool, &resources, text)
    }

    #[test]
    fn test_majority_wins() {
        let intent = IntentClassifier::new().classify(
            "Edit",
            &["tests/auth_test.rs".to_string()],
            "add a test with mock fixtures",
        );
        assert_eq!(intent, Intent::Testing);
    }

    #[test]
    fn test_parse_round_trips_names() {
        for intent in [
            Intent::AuthSecurity,
            Intent::DataMigration,
            Intent::Testing,
            Intent::DependencyManagement,
            Intent::BuildDeploy,
            Intent::Documentation,
            Intent::General,
        ] {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
    }
}
