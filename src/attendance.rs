use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{Attendance, AttendanceStatus, Lesson, Student};
use crate::notify::{Change, Notifier};
use crate::sessions::{active_lesson, sweep_expired, window_closed};
use crate::{breaks, proceeds, Error, Payload};

/// Checks shared by student and lecturer submissions: a session must be
/// running, codes must be enabled, and the window must still be open.
/// A late call runs the sweep before reporting expiry.
async fn submission_gate(pool: &SqlitePool, notifier: &Notifier) -> Result<Lesson, Error> {
    let lesson = match active_lesson(pool).await? {
        Some(lesson) => lesson,
        None => {
            return Err(Error::NoActiveSession {
                message: "No session is currently active!".to_string(),
            })
        }
    };
    if !lesson.otp_enabled {
        return Err(Error::OtpDisabled {
            message: "Code submission has not been enabled for this session!".to_string(),
        });
    }
    if window_closed(&lesson) {
        let swept = sweep_expired(pool, &lesson).await?;
        if swept > 0 {
            notifier.notify(Change::Attendance);
        }
        return Err(Error::SessionExpired {
            message: "The submission window has closed!".to_string(),
        });
    }
    Ok(lesson)
}

pub async fn submit_code(
    Json(submission): Json<SubmitCode>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<Marked> {
    if submission.otp.is_empty() || submission.admission_number.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`admission_number` and `otp` must not be empty".to_string(),
        });
    }

    let lesson = match submission_gate(&pool, &notifier).await {
        Ok(lesson) => lesson,
        Err(err) => return breaks(err),
    };

    let student = sqlx::query_as::<_, Student>(
        "SELECT * FROM students WHERE admission_number = $1 LIMIT 1",
    )
    .bind(&submission.admission_number)
    .fetch_optional(&pool)
    .await
    .map_err(Error::from)?;
    let student = match student {
        Some(student) => student,
        None => {
            return breaks(Error::StudentDoesNotExist {
                message: format!(
                    "No student with admission number `{}`!",
                    submission.admission_number
                ),
            })
        }
    };

    let row = sqlx::query_as::<_, Attendance>(
        "SELECT * FROM attendance WHERE lesson_uuid = $1 AND student_uuid = $2 LIMIT 1",
    )
    .bind(lesson.uuid)
    .bind(student.uuid)
    .fetch_optional(&pool)
    .await
    .map_err(Error::from)?;
    let row = match row {
        Some(row) => row,
        None => {
            return breaks(Error::NotFound {
                message: "No attendance entry for this student in the current session!"
                    .to_string(),
            })
        }
    };

    match row.status {
        AttendanceStatus::Present => {
            return breaks(Error::AlreadyMarked {
                message: "Attendance already marked for this session!".to_string(),
            })
        }
        AttendanceStatus::Absent => {
            return breaks(Error::SessionExpired {
                message: "Already marked absent for this session!".to_string(),
            })
        }
        AttendanceStatus::Pending => {}
    }

    // exact, case-sensitive match against the issued code
    if row.otp != submission.otp {
        return breaks(Error::InvalidOtp {
            message: "The submitted code is not valid!".to_string(),
        });
    }

    let marked_at = Utc::now();
    let res = sqlx::query(
        "UPDATE attendance SET status = 'present', marked_at = $1 \
         WHERE uuid = $2 AND status = 'pending'",
    )
    .bind(marked_at)
    .bind(row.uuid)
    .execute(&pool)
    .await
    .map_err(Error::from)?;

    // pending is re-checked in the statement; present stays terminal
    if res.rows_affected() < 1 {
        return breaks(Error::AlreadyMarked {
            message: "Attendance already marked for this session!".to_string(),
        });
    }

    log::info!(
        "Student {} marked present for lesson {}",
        student.admission_number,
        lesson.uuid
    );
    notifier.notify(Change::Attendance);
    proceeds(Marked {
        student_uuid: student.uuid,
        lesson_uuid: lesson.uuid,
        status: AttendanceStatus::Present,
        marked_at,
    })
}

/// Single shot against the lesson's shared code. No per-lecturer
/// identity, only the boolean flag on the lesson row.
pub async fn lecturer_code(
    Json(submission): Json<LecturerCode>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<LecturerMarked> {
    if submission.otp.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`otp` parameter was empty".to_string(),
        });
    }

    let lesson = match submission_gate(&pool, &notifier).await {
        Ok(lesson) => lesson,
        Err(err) => return breaks(err),
    };

    if lesson.lecturer_present {
        return breaks(Error::AlreadyMarked {
            message: "Lecturer already verified for this session!".to_string(),
        });
    }
    if lesson.lecturer_otp != submission.otp {
        return breaks(Error::InvalidOtp {
            message: "The submitted code is not valid!".to_string(),
        });
    }

    sqlx::query("UPDATE lessons SET lecturer_present = 1 WHERE uuid = $1")
        .bind(lesson.uuid)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    log::info!("Lecturer verified for lesson {}", lesson.uuid);
    notifier.notify(Change::Session);
    proceeds(LecturerMarked {
        lesson_uuid: lesson.uuid,
        lecturer_present: true,
    })
}

pub async fn lesson_attendance(
    Path(lesson): Path<String>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<LessonRoster> {
    let lesson_uuid = Uuid::from_str(&lesson)?;
    let entries = roster(&pool, lesson_uuid).await?;
    proceeds(LessonRoster {
        lesson_uuid,
        entries,
    })
}

pub async fn roster(pool: &SqlitePool, lesson_uuid: Uuid) -> Result<Vec<RosterEntry>, Error> {
    sqlx::query_as::<_, RosterEntry>(
        "SELECT a.student_uuid, s.name, s.admission_number, a.otp, a.status, a.marked_at \
         FROM attendance a JOIN students s ON s.uuid = a.student_uuid \
         WHERE a.lesson_uuid = $1 ORDER BY s.admission_number",
    )
    .bind(lesson_uuid)
    .fetch_all(pool)
    .await
    .map_err(Error::from)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitCode {
    pub admission_number: String,
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LecturerCode {
    pub otp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Marked {
    pub student_uuid: Uuid,
    pub lesson_uuid: Uuid,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LecturerMarked {
    pub lesson_uuid: Uuid,
    pub lecturer_present: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RosterEntry {
    pub student_uuid: Uuid,
    pub name: String,
    pub admission_number: String,
    pub otp: String,
    pub status: AttendanceStatus,
    pub marked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonRoster {
    pub lesson_uuid: Uuid,
    pub entries: Vec<RosterEntry>,
}
