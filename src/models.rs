use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::store::RowKey;

/// A student or participant as the desk sees them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Person {
    #[serde(alias = "studentId")]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub school: String,
    pub email: String,
    pub grade: String,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Full name, or the id when no name is known.
    pub fn display_name(&self) -> String {
        let full = self.full_name();
        if full.is_empty() {
            self.id.clone()
        } else {
            full
        }
    }

    pub fn trimmed(&self) -> Self {
        Self {
            id: self.id.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            school: self.school.trim().to_string(),
            email: self.email.trim().to_string(),
            grade: self.grade.trim().to_string(),
        }
    }
}

/// A row of the known_students directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownStudent {
    #[serde(flatten)]
    pub person: Person,
    pub created_at: String,
    pub last_sign_in: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Group,
    Individual,
}

impl SessionType {
    /// Anything other than "group" is an individual session.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("group") {
            Self::Group
        } else {
            Self::Individual
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Individual => "individual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInSession {
    pub row_key: RowKey,
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Calendar day, `yyyy-MM-dd`
    pub date: String,
    pub is_active: bool,
    pub created_at: String,
    pub closed_at: String,
    pub last_sign_in_at: String,
    pub sign_in_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    Pending,
    Claimed,
    Processed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Claimed => "Claimed",
            Self::Processed => "Processed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "processed" => Some(Self::Processed),
            _ => None,
        }
    }
}

/// An individual sign-in awaiting staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub row_key: RowKey,
    pub timestamp: String,
    pub id: String,
    pub display_name: String,
    pub school: String,
    pub group: String,
    pub mentor_id: String,
    pub mentor_name: String,
    pub status: QueueStatus,
    pub claimed_by: String,
    pub claimed_at: String,
    pub processed_at: String,
    pub contact_id: String,
    /// Claimed by the staff member asking for the list
    pub mine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNote {
    pub topic: String,
    pub summary: String,
    pub duration: u32,
}

/// `{id, name}` pair used for group participants, group mentors and name lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedPerson {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPrefill {
    pub contact_id: Option<String>,
    pub note: Option<GroupNote>,
    pub mentors: Vec<LinkedPerson>,
}

/// Fields of an individual contact note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndividualContactPayload {
    pub contact_with: String,
    pub type_of_contact: String,
    pub topic: String,
    pub success: String,
    pub notes: String,
    pub referrals: String,
    pub location: String,
    #[serde(deserialize_with = "lenient_minutes")]
    pub duration_minutes: u32,
    pub mentor_id: String,
}

/// A person named on an individual note, optionally tied to their queue row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonRef {
    pub id: String,
    pub row_key: Option<RowKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mentor {
    pub id: String,
    pub first: String,
    pub last: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentContact {
    pub contact_id: String,
    pub display_name: String,
    #[serde(rename = "dateYMD")]
    pub date: String,
    pub duration: u32,
    pub contact_with: String,
    pub type_of_contact: String,
    pub topic: String,
    pub success: String,
    pub notes: String,
    pub referrals: String,
    pub location: String,
    pub edited: String,
    pub mentor_id: String,
    pub mentor_name: String,
}

/// Parse a minutes cell or payload value; anything unusable is 0.
pub fn parse_minutes(raw: &str) -> u32 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|minutes| minutes.is_finite() && *minutes > 0.0)
        .map(|minutes| minutes.min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

fn lenient_minutes<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number
            .as_f64()
            .map(|minutes| parse_minutes(&minutes.to_string()))
            .unwrap_or(0),
        Value::String(raw) => parse_minutes(&raw),
        _ => 0,
    })
}
