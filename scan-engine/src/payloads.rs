//! Typed job payloads.
//!
//! Jobs carry opaque JSON; each processor deserializes into its typed
//! payload and re-serializes when enqueueing the next stage.

use serde::{Deserialize, Serialize};

/// Job type handled by the orchestrator processor.
pub const JOB_SCAN: &str = "scan";
/// Job type handled by the ingest processor.
pub const JOB_INGEST: &str = "ingest";
/// Job type handled by the detect processor.
pub const JOB_DETECT: &str = "detect";

/// Payload of `scan` and `ingest` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobPayload {
    pub scan_id: i64,
    pub repo_id: i64,
    pub account_id: i64,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub max_prs: Option<usize>,
}

/// Payload of `detect` jobs: the ingest payload plus the in-scope PR set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectJobPayload {
    #[serde(flatten)]
    pub scan: ScanJobPayload,
    pub pr_numbers: Vec<i64>,
}

/// Extracts the scan id from any pipeline payload, for failure mirroring.
pub fn scan_id_of(payload: &serde_json::Value) -> Option<i64> {
    payload.get("scan_id").and_then(|v| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_payload_flattens_scan_fields() {
        let payload = DetectJobPayload {
            scan: ScanJobPayload {
                scan_id: 1,
                repo_id: 2,
                account_id: 3,
                owner: "o".into(),
                repo: "r".into(),
                max_prs: None,
            },
            pr_numbers: vec![4, 5],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["scan_id"], 1);
        assert_eq!(json["pr_numbers"][1], 5);
        assert_eq!(scan_id_of(&json), Some(1));

        let back: DetectJobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.scan.repo_id, 2);
    }
}
