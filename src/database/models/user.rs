use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Review state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Confirmed => "confirmed",
            UserStatus::Rejected => "rejected",
        }
    }

    /// Whether a registration in this state blocks a new `/start` dialogue.
    pub fn blocks_registration(&self) -> bool {
        matches!(self, UserStatus::Pending | UserStatus::Confirmed)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "confirmed" => Ok(UserStatus::Confirmed),
            "rejected" => Ok(UserStatus::Rejected),
            other => Err(format!("unknown user status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Online,
    Offline,
    /// Free course, nothing to pay.
    None,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "online",
            PaymentMethod::Offline => "offline",
            PaymentMethod::None => "none",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PaymentMethod::Online),
            "offline" => Ok(PaymentMethod::Offline),
            "none" => Ok(PaymentMethod::None),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub name: String,
    pub phone: String,
    pub plan: String,
    pub payment_method: PaymentMethod,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

/// Row written when the registration dialogue commits.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub name: String,
    pub phone: String,
    pub plan: String,
    pub payment_method: PaymentMethod,
    pub status: UserStatus,
}
