//! The one place that decides whether a status change is allowed.
//!
//! Both the applicant's "submit" path and the reviewer's "set status" path call
//! [`TransitionPolicy::evaluate`]; neither re-implements any part of the table.

use serde::{Deserialize, Serialize};

use super::domain::{ApplicationStatus, Role};

/// How strictly reviewer-initiated transitions are checked.
///
/// `Permissive` mirrors the portal's historical behavior: a reviewer may move an
/// application to any non-draft status from any status, terminal ones included.
/// `Strict` only allows the documented workflow edges and freezes terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    #[default]
    Permissive,
    Strict,
}

impl TransitionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "permissive" => Some(Self::Permissive),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TransitionMode::Permissive => "permissive",
            TransitionMode::Strict => "strict",
        }
    }
}

/// Result of consulting the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionVerdict {
    Allow,
    Deny(DenialKind),
}

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    /// The actor's role may never request this target status.
    Forbidden,
    /// The role may request the target, but not from the current status.
    Invalid,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionPolicy {
    mode: TransitionMode,
}

impl TransitionPolicy {
    pub const fn new(mode: TransitionMode) -> Self {
        Self { mode }
    }

    pub const fn mode(&self) -> TransitionMode {
        self.mode
    }

    pub fn evaluate(
        &self,
        current: ApplicationStatus,
        requested: ApplicationStatus,
        role: Role,
    ) -> TransitionVerdict {
        use super::domain::ApplicationStatus::*;

        match role {
            Role::Student => match (current, requested) {
                (Draft, Submitted) => TransitionVerdict::Allow,
                (_, Submitted) => TransitionVerdict::Deny(DenialKind::Invalid),
                _ => TransitionVerdict::Deny(DenialKind::Forbidden),
            },
            Role::Admin => {
                if requested == Draft {
                    return TransitionVerdict::Deny(DenialKind::Invalid);
                }
                match self.mode {
                    TransitionMode::Permissive => TransitionVerdict::Allow,
                    TransitionMode::Strict => match (current, requested) {
                        (Draft, Submitted)
                        | (Submitted, Review)
                        | (Review, Submitted)
                        | (Review, Accepted)
                        | (Review, Rejected) => TransitionVerdict::Allow,
                        _ => TransitionVerdict::Deny(DenialKind::Invalid),
                    },
                }
            }
        }
    }

    /// Every status reachable from `current` for `role` under this policy.
    pub fn targets(&self, current: ApplicationStatus, role: Role) -> Vec<ApplicationStatus> {
        ApplicationStatus::ALL
            .into_iter()
            .filter(|requested| {
                self.evaluate(current, *requested, role) == TransitionVerdict::Allow
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applications::domain::ApplicationStatus::*;

    const PERMISSIVE: TransitionPolicy = TransitionPolicy::new(TransitionMode::Permissive);
    const STRICT: TransitionPolicy = TransitionPolicy::new(TransitionMode::Strict);

    #[test]
    fn student_may_only_submit_a_draft() {
        for policy in [PERMISSIVE, STRICT] {
            assert_eq!(
                policy.evaluate(Draft, Submitted, Role::Student),
                TransitionVerdict::Allow
            );
            for current in [Submitted, Review, Accepted, Rejected] {
                assert_eq!(
                    policy.evaluate(current, Submitted, Role::Student),
                    TransitionVerdict::Deny(DenialKind::Invalid),
                    "{current} -> submitted"
                );
            }
        }
    }

    #[test]
    fn student_requests_other_than_submitted_are_forbidden() {
        for current in ApplicationStatus::ALL {
            for requested in [Draft, Review, Accepted, Rejected] {
                assert_eq!(
                    PERMISSIVE.evaluate(current, requested, Role::Student),
                    TransitionVerdict::Deny(DenialKind::Forbidden)
                );
            }
        }
    }

    #[test]
    fn permissive_admin_may_jump_anywhere_but_draft() {
        assert_eq!(
            PERMISSIVE.evaluate(Submitted, Accepted, Role::Admin),
            TransitionVerdict::Allow
        );
        assert_eq!(
            PERMISSIVE.evaluate(Rejected, Review, Role::Admin),
            TransitionVerdict::Allow
        );
        assert_eq!(
            PERMISSIVE.evaluate(Review, Review, Role::Admin),
            TransitionVerdict::Allow
        );
        assert_eq!(
            PERMISSIVE.evaluate(Review, Draft, Role::Admin),
            TransitionVerdict::Deny(DenialKind::Invalid)
        );
    }

    #[test]
    fn strict_admin_follows_workflow_edges() {
        assert_eq!(STRICT.targets(Draft, Role::Admin), vec![Submitted]);
        assert_eq!(STRICT.targets(Submitted, Role::Admin), vec![Review]);
        assert_eq!(
            STRICT.targets(Review, Role::Admin),
            vec![Submitted, Accepted, Rejected]
        );
        assert!(STRICT.targets(Accepted, Role::Admin).is_empty());
        assert!(STRICT.targets(Rejected, Role::Admin).is_empty());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(TransitionMode::parse("STRICT"), Some(TransitionMode::Strict));
        assert_eq!(
            TransitionMode::parse(" permissive "),
            Some(TransitionMode::Permissive)
        );
        assert_eq!(TransitionMode::parse("lenient"), None);
        assert_eq!(TransitionMode::default().label(), "permissive");
    }
}
