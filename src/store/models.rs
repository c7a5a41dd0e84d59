use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Punch direction. Always toggles from the user's last punch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PunchType {
    In,
    Out,
}

impl PunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchType::In => "IN",
            PunchType::Out => "OUT",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            PunchType::In => PunchType::Out,
            PunchType::Out => PunchType::In,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN" => Some(PunchType::In),
            "OUT" => Some(PunchType::Out),
            _ => None,
        }
    }
}

impl std::fmt::Display for PunchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentinel match score recorded for non-biometric (companion-device) punches.
pub const DEVICE_MATCH_SCORE_SENTINEL: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub employee_code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub user_id: i64,
    pub template_path: String,
    pub quality: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Punch {
    pub id: i64,
    pub user_id: i64,
    pub timestamp_utc: DateTime<Utc>,
    /// Kiosk-local wall clock at punch time, naive (no offset attached).
    /// Stored verbatim (not re-derived from `timestamp_utc`) because the
    /// kiosk's local timezone is the authority for "today" boundaries, not UTC.
    pub timestamp_local: NaiveDateTime,
    pub punch_type: PunchType,
    pub match_score: i64,
    pub device_id: String,
    pub synced: bool,
    pub sync_error: Option<String>,
    pub sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub enrolled_user_agent: Option<String>,
}

/// A device joined with its owning user, as returned by lookups that need both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceWithUser {
    pub device: Device,
    pub user: User,
}

/// Admin-facing user summary including the enrolled template count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub employee_code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub template_count: i64,
}
