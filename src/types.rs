//! Domain enums shared by the store, services and HTTP layer.
//!
//! Rows keep statuses as plain text; these enums are the parse/validate edge.

use serde::{Deserialize, Serialize};

/// Account status for admin users and promoters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    Active,
    Suspended,
    Pending,
}

impl PrincipalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Active => "active",
            PrincipalStatus::Suspended => "suspended",
            PrincipalStatus::Pending => "pending",
        }
    }

    /// Only active principals may log in or use a token.
    pub fn can_authenticate(&self) -> bool {
        matches!(self, PrincipalStatus::Active)
    }
}

impl std::fmt::Display for PrincipalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrincipalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(PrincipalStatus::Active),
            "suspended" => Ok(PrincipalStatus::Suspended),
            "pending" => Ok(PrincipalStatus::Pending),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Review lifecycle of an activity recce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    InProgress,
    Completed,
    Approved,
    Rejected,
}

impl ActivityStatus {
    pub const ALL: [ActivityStatus; 5] = [
        ActivityStatus::Pending,
        ActivityStatus::InProgress,
        ActivityStatus::Completed,
        ActivityStatus::Approved,
        ActivityStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::InProgress => "in_progress",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Approved => "approved",
            ActivityStatus::Rejected => "rejected",
        }
    }

    /// Approval and rejection are review decisions and need the approve permission.
    pub fn is_review_decision(&self) -> bool {
        matches!(self, ActivityStatus::Approved | ActivityStatus::Rejected)
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ActivityStatus::Pending),
            "in_progress" | "in-progress" => Ok(ActivityStatus::InProgress),
            "completed" => Ok(ActivityStatus::Completed),
            "approved" => Ok(ActivityStatus::Approved),
            "rejected" => Ok(ActivityStatus::Rejected),
            _ => Err(format!("Unknown activity status: {}", s)),
        }
    }
}

/// Route plan lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePlanStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl RoutePlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutePlanStatus::Pending => "pending",
            RoutePlanStatus::Active => "active",
            RoutePlanStatus::Completed => "completed",
            RoutePlanStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for RoutePlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(RoutePlanStatus::Pending),
            "active" => Ok(RoutePlanStatus::Active),
            "completed" => Ok(RoutePlanStatus::Completed),
            "cancelled" | "canceled" => Ok(RoutePlanStatus::Cancelled),
            _ => Err(format!("Unknown route plan status: {}", s)),
        }
    }
}
