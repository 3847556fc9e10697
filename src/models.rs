use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub uuid: Uuid,
    pub name: String,
    pub admission_number: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Unit {
    pub uuid: Uuid,
    pub name: String,
    pub lecturer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lesson {
    pub uuid: Uuid,
    pub unit_uuid: Uuid,
    pub venue: String,
    pub duration_minutes: i64,
    /// Timetable slot, kept verbatim for display.
    pub scheduled_start: String,
    pub scheduled_end: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub lecturer_otp: String,
    pub lecturer_present: bool,
    pub otp_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendance {
    pub uuid: Uuid,
    pub lesson_uuid: Uuid,
    pub student_uuid: Uuid,
    pub otp: String,
    pub status: AttendanceStatus,
    pub marked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Pending,
    Present,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
}
