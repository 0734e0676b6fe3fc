use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

// ── Profile record ────────────────────────────────────────────────────────────

/// One person extracted from a roster page. Field order is the CSV column order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileRecord {
    pub name: Option<String>,
    pub bio: String,
    pub photo_path: Option<PathBuf>,
    pub role: String,
    pub date: Option<String>,
    pub location: Option<String>,
}

pub const PROFILE_COLUMNS: [&str; 6] = ["name", "bio", "photo_path", "role", "date", "location"];

// ── Page-scoped info ──────────────────────────────────────────────────────────

/// Event date and location, shared by every record on a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub date: Option<String>,
    pub location: Option<String>,
}

// ── Raw parse output ──────────────────────────────────────────────────────────

/// A person block as found in the markup, before any photo is fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProfile {
    pub name: Option<String>,
    pub bio: String,
    pub photo_url: Option<Url>,
}

/// A person block paired with the role heading it was found under.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub role: String,
    pub profile: RawProfile,
}

/// Everything the structural pass pulls out of one roster page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterPage {
    pub info: PageInfo,
    pub entries: Vec<RosterEntry>,
}

// ── Fetch attempts ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Rendered { bytes: usize },
    Failed(String),
}

/// Log-only record of a single render attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttempt {
    pub number: u32,
    pub waited: Duration,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for FetchAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Rendered { bytes } => write!(
                f,
                "attempt {} (after {:.2?}) rendered {} bytes",
                self.number, self.waited, bytes
            ),
            AttemptOutcome::Failed(reason) => write!(
                f,
                "attempt {} (after {:.2?}) failed: {}",
                self.number, self.waited, reason
            ),
        }
    }
}
