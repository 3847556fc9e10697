use axum::{Extension, Json};
use chrono::{Duration, Utc};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::ops::Add;
use uuid::Uuid;

use crate::attendance::{roster, RosterEntry};
use crate::models::{Lesson, Student, Unit};
use crate::notify::{Change, Notifier};
use crate::{breaks, proceeds, Error, Payload};

/// Codes stop being accepted this long after the session starts.
pub const OTP_WINDOW_MINUTES: i64 = 20;

/// A lesson counts as active only while its creation is this recent.
/// There is no closed state; recency is the liveness signal.
pub const ACTIVE_WITHIN_HOURS: i64 = 24;

/// Six decimal digits, zero-padded. Not a secret worth more than the
/// lesson it belongs to.
pub fn generate_otp() -> String {
    format!("{:06}", thread_rng().gen_range(0..1_000_000))
}

pub fn window_closed(lesson: &Lesson) -> bool {
    Utc::now() - lesson.start_time > Duration::minutes(OTP_WINDOW_MINUTES)
}

/// The most recently created lesson within the last 24 hours, if any.
pub async fn active_lesson(pool: &SqlitePool) -> Result<Option<Lesson>, Error> {
    let cutoff = Utc::now() - Duration::hours(ACTIVE_WITHIN_HOURS);
    let lesson = sqlx::query_as::<_, Lesson>(
        "SELECT * FROM lessons WHERE created_at > $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(cutoff)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?;
    Ok(lesson)
}

/// Flip every still-pending row of an expired lesson to absent. Rows
/// already present or absent are left alone. Returns how many flipped.
pub async fn sweep_expired(pool: &SqlitePool, lesson: &Lesson) -> Result<u64, Error> {
    if !window_closed(lesson) {
        return Ok(0);
    }
    let res = sqlx::query(
        "UPDATE attendance SET status = 'absent', marked_at = $1 \
         WHERE lesson_uuid = $2 AND status = 'pending'",
    )
    .bind(Utc::now())
    .bind(lesson.uuid)
    .execute(pool)
    .await
    .map_err(Error::from)?;
    if res.rows_affected() > 0 {
        log::info!(
            "Swept {} pending students to absent for lesson {}",
            res.rows_affected(),
            lesson.uuid
        );
    }
    Ok(res.rows_affected())
}

/// One fresh pending row per registered student.
pub async fn mint_roster(pool: &SqlitePool, lesson_uuid: Uuid) -> Result<u64, Error> {
    let students = sqlx::query_as::<_, Student>("SELECT * FROM students")
        .fetch_all(pool)
        .await
        .map_err(Error::from)?;

    for student in &students {
        sqlx::query("INSERT INTO attendance VALUES ($1, $2, $3, $4, 'pending', NULL)")
            .bind(Uuid::new_v4())
            .bind(lesson_uuid)
            .bind(student.uuid)
            .bind(generate_otp())
            .execute(pool)
            .await
            .map_err(Error::from)?;
    }
    Ok(students.len() as u64)
}

pub async fn start_session(
    Json(start): Json<StartSession>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<SessionStarted> {
    if start.venue.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`venue` parameter was empty".to_string(),
        });
    }
    if start.duration_minutes <= 0 {
        return breaks(Error::InvalidPayload {
            message: "`duration_minutes` must be positive".to_string(),
        });
    }

    let unit = sqlx::query_as::<_, Unit>("SELECT * FROM units WHERE uuid = $1 LIMIT 1")
        .bind(start.unit_uuid)
        .fetch_optional(&pool)
        .await
        .map_err(Error::from)?;
    if unit.is_none() {
        return breaks(Error::UnitDoesNotExist {
            message: format!("Unit with uuid `{}` does not exist!", start.unit_uuid),
        });
    }

    let now = Utc::now();
    let lesson_uuid = Uuid::new_v4();
    let lecturer_otp = generate_otp();
    let end_time = now.add(Duration::minutes(start.duration_minutes));

    sqlx::query(
        "INSERT INTO lessons VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, $10)",
    )
    .bind(lesson_uuid)
    .bind(start.unit_uuid)
    .bind(&start.venue)
    .bind(start.duration_minutes)
    .bind(&start.scheduled_start)
    .bind(&start.scheduled_end)
    .bind(now)
    .bind(end_time)
    .bind(&lecturer_otp)
    .bind(now)
    .execute(&pool)
    .await
    .map_err(Error::from)?;

    let students_enrolled = mint_roster(&pool, lesson_uuid).await?;
    log::info!(
        "Session {} started for unit {} with {} students",
        lesson_uuid,
        start.unit_uuid,
        students_enrolled
    );

    notifier.notify(Change::Session);
    proceeds(SessionStarted {
        lesson_uuid,
        lecturer_otp,
        students_enrolled,
    })
}

/// Wipe the roster of the active lesson and re-mint every code. Reuses
/// the lesson row; only the clocks and codes reset.
pub async fn restart_session(
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<SessionStarted> {
    let lesson = match active_lesson(&pool).await? {
        Some(lesson) => lesson,
        None => {
            return breaks(Error::NoActiveSession {
                message: "No session is currently active!".to_string(),
            })
        }
    };

    sqlx::query("DELETE FROM attendance WHERE lesson_uuid = $1")
        .bind(lesson.uuid)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    let now = Utc::now();
    let lecturer_otp = generate_otp();
    let end_time = now.add(Duration::minutes(lesson.duration_minutes));
    sqlx::query(
        "UPDATE lessons SET lecturer_otp = $1, lecturer_present = 0, otp_enabled = 0, \
         start_time = $2, end_time = $3 WHERE uuid = $4",
    )
    .bind(&lecturer_otp)
    .bind(now)
    .bind(end_time)
    .bind(lesson.uuid)
    .execute(&pool)
    .await
    .map_err(Error::from)?;

    let students_enrolled = mint_roster(&pool, lesson.uuid).await?;
    log::info!("Session {} restarted", lesson.uuid);

    notifier.notify(Change::Session);
    proceeds(SessionStarted {
        lesson_uuid: lesson.uuid,
        lecturer_otp,
        students_enrolled,
    })
}

/// One-way gate: once enabled, students may submit codes. Enabling an
/// already-enabled session is a no-op.
pub async fn enable_otp(
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<OtpEnabled> {
    let lesson = match active_lesson(&pool).await? {
        Some(lesson) => lesson,
        None => {
            return breaks(Error::NoActiveSession {
                message: "No session is currently active!".to_string(),
            })
        }
    };

    sqlx::query("UPDATE lessons SET otp_enabled = 1 WHERE uuid = $1")
        .bind(lesson.uuid)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    notifier.notify(Change::Session);
    proceeds(OtpEnabled {
        lesson_uuid: lesson.uuid,
    })
}

/// The representative dashboard polls this; it doubles as the lazy
/// expiry sweep.
pub async fn active_session(
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<ActiveSession> {
    let lesson = match active_lesson(&pool).await? {
        Some(lesson) => lesson,
        None => {
            return breaks(Error::NoActiveSession {
                message: "No session is currently active!".to_string(),
            })
        }
    };

    let swept = sweep_expired(&pool, &lesson).await?;
    if swept > 0 {
        notifier.notify(Change::Attendance);
    }

    let unit = sqlx::query_as::<_, Unit>("SELECT * FROM units WHERE uuid = $1 LIMIT 1")
        .bind(lesson.unit_uuid)
        .fetch_optional(&pool)
        .await
        .map_err(Error::from)?;
    let unit = match unit {
        Some(unit) => unit,
        None => {
            return breaks(Error::UnitDoesNotExist {
                message: format!("Unit with uuid `{}` does not exist!", lesson.unit_uuid),
            })
        }
    };

    let entries = roster(&pool, lesson.uuid).await?;
    let otp_expired = window_closed(&lesson);
    proceeds(ActiveSession {
        lesson,
        unit,
        otp_expired,
        roster: entries,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSession {
    pub unit_uuid: Uuid,
    pub venue: String,
    pub duration_minutes: i64,
    pub scheduled_start: String,
    pub scheduled_end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStarted {
    pub lesson_uuid: Uuid,
    pub lecturer_otp: String,
    pub students_enrolled: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpEnabled {
    pub lesson_uuid: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub lesson: Lesson,
    pub unit: Unit,
    pub otp_expired: bool,
    pub roster: Vec<RosterEntry>,
}
