//! Core data models used throughout leadvault.
//!
//! These types represent the contact rows that flow from uploaded files into
//! the analytical store, the upload lifecycle tracked in the control plane,
//! and the audit records written by the search engine.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::error::InvalidTransition;

/// A contact row as returned to search callers.
///
/// Field order matches the column order of the analytical `contacts` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub linkedin: String,
    pub position: String,
    pub company: String,
    pub company_phone: String,
    pub website: String,
    pub domain: String,
    pub facebook: String,
    pub twitter: String,
    pub linkedin_company_page: String,
    pub country: String,
    pub state: String,
}

/// A contact row on the write side, attributed to the upload that produced it.
#[derive(Debug, Clone)]
pub struct StoredContact {
    pub record: ContactRecord,
    pub upload_id: i64,
    /// Unix seconds.
    pub created_at: i64,
}

/// Upload lifecycle.
///
/// The only valid moves are `Uploaded -> Processing`, `Processing -> Succeeded`
/// and `Processing -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploaded,
    Processing,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Processing => "processing",
            UploadStatus::Succeeded => "succeeded",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed)
    }

    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (UploadStatus::Uploaded, UploadStatus::Processing)
                | (UploadStatus::Processing, UploadStatus::Succeeded)
                | (UploadStatus::Processing, UploadStatus::Failed)
        )
    }

    pub fn transition(self, next: UploadStatus) -> Result<UploadStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "uploaded" => UploadStatus::Uploaded,
            "processing" => UploadStatus::Processing,
            "succeeded" => UploadStatus::Succeeded,
            "failed" => UploadStatus::Failed,
            other => bail!("unknown upload status: '{}'", other),
        })
    }
}

/// Read-only projection of an upload row.
#[derive(Debug, Clone, Serialize)]
pub struct Upload {
    pub id: i64,
    pub original_filename: String,
    pub safe_name: String,
    pub serial_number: Option<i64>,
    pub status: UploadStatus,
    pub size_bytes: i64,
    pub sha256: String,
    pub row_count: Option<i64>,
    pub processed_rows: i64,
    pub progress_pct: f64,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Audit record written once per non-cached search that completed its
/// backend query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchLogEntry {
    pub id: i64,
    pub user_id: String,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    /// Serialized [`SearchFilter`](crate::filter::SearchFilter).
    pub params: String,
    pub normalized_key: String,
    pub total_results: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_accepted() {
        assert_eq!(
            UploadStatus::Uploaded.transition(UploadStatus::Processing),
            Ok(UploadStatus::Processing)
        );
        assert!(UploadStatus::Processing.can_transition_to(UploadStatus::Succeeded));
        assert!(UploadStatus::Processing.can_transition_to(UploadStatus::Failed));
    }

    #[test]
    fn backward_and_skipping_transitions_are_rejected() {
        let all = [
            UploadStatus::Uploaded,
            UploadStatus::Processing,
            UploadStatus::Succeeded,
            UploadStatus::Failed,
        ];
        let mut allowed = 0;
        for from in all {
            for to in all {
                if from.can_transition_to(to) {
                    allowed += 1;
                }
            }
        }
        assert_eq!(allowed, 3);

        let err = UploadStatus::Succeeded
            .transition(UploadStatus::Processing)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid upload transition succeeded -> processing");
        assert!(UploadStatus::Uploaded
            .transition(UploadStatus::Succeeded)
            .is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in ["uploaded", "processing", "succeeded", "failed"] {
            assert_eq!(s.parse::<UploadStatus>().unwrap().as_str(), s);
        }
        assert!("done".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn contact_record_serializes_camel_case() {
        let rec = ContactRecord {
            company_phone: "1".into(),
            linkedin_company_page: "x".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["companyPhone"], "1");
        assert_eq!(json["linkedinCompanyPage"], "x");
    }
}
