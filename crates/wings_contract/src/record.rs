use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::destination::Destination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(pub i64);

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown share state value {0}")]
pub struct StateError(pub i64);

/// Lifecycle of a share record.
///
/// Allowed edges: `Pending -> Processing` (checkout), `Processing -> Processed`
/// (success), `Processing -> Pending` (failure or stuck-record reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareState {
    Pending,
    Processing,
    Processed,
}

impl ShareState {
    pub const fn as_i64(self) -> i64 {
        match self {
            ShareState::Pending => 0,
            ShareState::Processing => 1,
            ShareState::Processed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShareState::Pending => "pending",
            ShareState::Processing => "processing",
            ShareState::Processed => "processed",
        }
    }
}

impl TryFrom<i64> for ShareState {
    type Error = StateError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ShareState::Pending),
            1 => Ok(ShareState::Processing),
            2 => Ok(ShareState::Processed),
            other => Err(StateError(other)),
        }
    }
}

impl std::str::FromStr for ShareState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ShareState::Pending),
            "processing" => Ok(ShareState::Processing),
            "processed" => Ok(ShareState::Processed),
            other => Err(format!("unknown share state '{other}'")),
        }
    }
}

/// One persisted "upload this file to this destination" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: ShareId,
    pub file_path: PathBuf,
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
    pub state: ShareState,
    pub fail_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCounts {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
}

impl ShareCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.processed
    }
}

/// Number of consecutive drain cycles that ended with unresolved records.
///
/// One value per installation, shared by every destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_values_match_persisted_encoding() {
        for state in [ShareState::Pending, ShareState::Processing, ShareState::Processed] {
            assert_eq!(ShareState::try_from(state.as_i64()), Ok(state));
        }
        assert_eq!(ShareState::try_from(7), Err(StateError(7)));
    }

    #[test]
    fn state_parses_from_query_strings() {
        assert_eq!("Pending".parse::<ShareState>(), Ok(ShareState::Pending));
        assert_eq!("processed".parse::<ShareState>(), Ok(ShareState::Processed));
        assert!("done".parse::<ShareState>().is_err());
    }

    #[test]
    fn record_serializes_state_as_snake_case() {
        let record = ShareRecord {
            id: ShareId(4),
            file_path: PathBuf::from("/photos/strip-4.jpg"),
            destination: Destination::new(1, 0),
            created_at: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000)
                .expect("valid timestamp"),
            state: ShareState::Processing,
            fail_count: 2,
        };

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["state"], "processing");
        assert_eq!(json["id"], 4);
        assert_eq!(json["destination"]["endpoint_id"], 1);
    }
}
