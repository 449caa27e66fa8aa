//! Core domain types for catchlog
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Catch** | A logged fish: spot, species, measurements, release flag |
//! | **Mutation** | A catch creation recorded locally and not yet confirmed by the server |
//! | **Local id** | Client-generated id of a mutation; doubles as the idempotency token |
//! | **Sync pass** | One run of the queue-draining algorithm, to completion or abort |
//! | **Terminal failure** | A failed mutation that is no longer retried automatically |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================
// Catch payloads
// ============================================

/// Input for the remote catch-creation endpoint.
///
/// Serialized in camelCase to match the API's JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchCreateInput {
    /// Fishing spot the catch was made at
    pub spot_id: String,
    /// Species caught
    pub species_id: String,
    /// Weight in kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Length in centimetres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    /// Fishing technique (e.g. "fly", "spinning")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique: Option<String>,
    /// Bait or lure used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bait: Option<String>,
    /// Reference to an already-uploaded photo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Whether the fish was released
    #[serde(default)]
    pub released: bool,
    /// When the fish was caught
    pub caught_at: DateTime<Utc>,
}

impl CatchCreateInput {
    /// Minimal payload with only the required fields set
    pub fn new(
        spot_id: impl Into<String>,
        species_id: impl Into<String>,
        caught_at: DateTime<Utc>,
    ) -> Self {
        Self {
            spot_id: spot_id.into(),
            species_id: species_id.into(),
            weight: None,
            length: None,
            technique: None,
            bait: None,
            image_url: None,
            notes: None,
            released: false,
            caught_at,
        }
    }
}

/// Catch record returned by the server after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchRecord {
    /// Server-assigned id
    pub id: String,
    #[serde(default)]
    pub spot_id: Option<String>,
    #[serde(default)]
    pub species_id: Option<String>,
    #[serde(default)]
    pub caught_at: Option<DateTime<Utc>>,
}

// ============================================
// Queue entries
// ============================================

/// Sync status of a queued mutation.
///
/// ```text
/// PENDING → SYNCING → SYNCED (removed)
///                   → FAILED → (next pass) SYNCING ...
///                   → FAILED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    Pending,
    Syncing,
    Failed,
    Synced,
}

impl MutationStatus {
    /// Returns the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "PENDING",
            MutationStatus::Syncing => "SYNCING",
            MutationStatus::Failed => "FAILED",
            MutationStatus::Synced => "SYNCED",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MutationStatus::Pending),
            "SYNCING" => Ok(MutationStatus::Syncing),
            "FAILED" => Ok(MutationStatus::Failed),
            "SYNCED" => Ok(MutationStatus::Synced),
            _ => Err(format!("unknown mutation status: {}", s)),
        }
    }
}

/// A catch creation waiting to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCatchMutation {
    /// Client-generated id, stable across retries; sent as the idempotency token
    pub local_id: String,
    /// Catch to create
    pub payload: CatchCreateInput,
    /// Current sync status
    pub status: MutationStatus,
    /// Set on FAILED entries that must not be retried automatically
    pub terminal: bool,
    /// Number of failed sync attempts
    pub attempts: u32,
    /// Client-side creation time, used for ordering
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Reason of the last failure
    pub last_error: Option<String>,
}

impl PendingCatchMutation {
    /// New PENDING mutation with a fresh local id
    pub fn new(payload: CatchCreateInput) -> Self {
        Self::with_local_id(new_local_id(), payload, Utc::now())
    }

    /// New PENDING mutation with a caller-chosen id and creation time
    pub fn with_local_id(
        local_id: impl Into<String>,
        payload: CatchCreateInput,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            payload,
            status: MutationStatus::Pending,
            terminal: false,
            attempts: 0,
            created_at,
            updated_at: created_at,
            last_error: None,
        }
    }

    /// Whether this entry waits for the user to retry, edit or discard it
    pub fn needs_attention(&self, max_attempts: u32) -> bool {
        self.status == MutationStatus::Failed && (self.terminal || self.attempts >= max_attempts)
    }
}

/// Generate a new local id (UUID v4)
pub fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::Syncing,
            MutationStatus::Failed,
            MutationStatus::Synced,
        ] {
            assert_eq!(status.as_str().parse::<MutationStatus>(), Ok(status));
        }
        assert!("DONE".parse::<MutationStatus>().is_err());
    }

    #[test]
    fn test_catch_input_serializes_camel_case() {
        let mut input = CatchCreateInput::new("spot-1", "pike", Utc::now());
        input.image_url = Some("s3://bucket/pike.jpg".to_string());
        input.released = true;

        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["spotId"], "spot-1");
        assert_eq!(json["speciesId"], "pike");
        assert_eq!(json["imageUrl"], "s3://bucket/pike.jpg");
        assert_eq!(json["released"], true);
        assert!(json.get("weight").is_none());
        assert!(json.get("caughtAt").is_some());
    }

    #[test]
    fn test_new_mutation_is_pending() {
        let mutation = PendingCatchMutation::new(CatchCreateInput::new("s", "t", Utc::now()));
        assert_eq!(mutation.status, MutationStatus::Pending);
        assert_eq!(mutation.attempts, 0);
        assert!(!mutation.needs_attention(5));
        assert_eq!(mutation.local_id.len(), 36);
    }
}
