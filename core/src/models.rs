use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ApiId = i64;
pub type RequestId = i64;
pub type UserId = i64;

/// Every user is implicitly a member of this group.
pub const GUEST_GROUP: &str = "guest";

// A command the portal can run on behalf of a user.
// Lists are parsed once when the registry is loaded; see `registry::comma_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub id: ApiId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    pub num_input_params: u32,
    #[serde(deserialize_with = "crate::registry::comma_list")]
    pub output_files: Vec<String>,
    #[serde(deserialize_with = "crate::registry::comma_list")]
    pub authorized_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Human readable label shown in status listings.
    pub fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Processing => "Processing",
            RequestStatus::Completed => "Completed",
            RequestStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub owner: UserId,
    pub api_id: ApiId,
    pub input_params: Vec<String>,
    pub status: RequestStatus,
    pub date_added: DateTime<Utc>,
}

// Row of the status listing, already localized for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestView {
    pub request_id: RequestId,
    pub api_name: String,
    pub input_params: String,
    pub date_added: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Processing,
            RequestStatus::Completed,
            RequestStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("done".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert_eq!(RequestStatus::Processing.label(), "Processing");
    }
}
