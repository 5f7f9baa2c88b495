use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Participation status of the current user, as resolved by the orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Valid signed identifiers and preferences are present.
    Participating,
    /// The user explicitly opted out.
    NotParticipating,
    /// An identifier exists but preferences were not chosen yet.
    Unknown,
    /// Local state is insufficient and a redirect to the operator was deferred.
    RedirectNeeded,
}

impl Status {
    /// Raw cookie value used as a sentinel, for the statuses that have one.
    pub fn sentinel(self) -> Option<&'static str> {
        match self {
            Status::NotParticipating => Some(NOT_PARTICIPATING),
            Status::RedirectNeeded => Some(REDIRECT_NEEDED),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Participating => "PARTICIPATING",
            Status::NotParticipating => NOT_PARTICIPATING,
            Status::Unknown => "UNKNOWN",
            Status::RedirectNeeded => REDIRECT_NEEDED,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel stored in a data cookie when the user does not participate.
pub const NOT_PARTICIPATING: &str = "NOT_PARTICIPATING";
/// Sentinel stored in a data cookie when a redirect has been deferred.
pub const REDIRECT_NEEDED: &str = "REDIRECT_NEEDED";

/// Returns `true` if `raw` is one of the status sentinels.
pub fn is_sentinel(raw: &str) -> bool {
    raw == NOT_PARTICIPATING || raw == REDIRECT_NEEDED
}
