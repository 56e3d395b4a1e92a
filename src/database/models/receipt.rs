use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::user::{User, UserStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Approved => "approved",
            ReceiptStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiptStatus::Pending),
            "approved" => Ok(ReceiptStatus::Approved),
            "rejected" => Ok(ReceiptStatus::Rejected),
            other => Err(format!("unknown receipt status '{other}'")),
        }
    }
}

/// Proof of an offline payment, reviewed once by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: i64,
    pub user_id: i64,
    pub image_url: String,
    pub status: ReceiptStatus,
    pub approved_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// An admin's verdict on a pending registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn user_status(&self) -> UserStatus {
        match self {
            Decision::Approve => UserStatus::Confirmed,
            Decision::Reject => UserStatus::Rejected,
        }
    }

    pub fn receipt_status(&self) -> ReceiptStatus {
        match self {
            Decision::Approve => ReceiptStatus::Approved,
            Decision::Reject => ReceiptStatus::Rejected,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Approve => "approved",
            Decision::Reject => "rejected",
        }
    }
}

/// Result of committing the registration dialogue.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub receipt: Option<Receipt>,
}
