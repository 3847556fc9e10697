use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::settings::DEFAULT_SETTINGS;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    uuid BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    admission_number TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS units (
    uuid BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    lecturer TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lessons (
    uuid BLOB PRIMARY KEY,
    unit_uuid BLOB NOT NULL REFERENCES units(uuid) ON DELETE CASCADE,
    venue TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    scheduled_start TEXT NOT NULL,
    scheduled_end TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    lecturer_otp TEXT NOT NULL,
    lecturer_present INTEGER NOT NULL DEFAULT 0,
    otp_enabled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    uuid BLOB PRIMARY KEY,
    lesson_uuid BLOB NOT NULL REFERENCES lessons(uuid) ON DELETE CASCADE,
    student_uuid BLOB NOT NULL REFERENCES students(uuid) ON DELETE CASCADE,
    otp TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    marked_at TEXT,
    UNIQUE(lesson_uuid, student_uuid)
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Open (or create) the database file and bring the schema up.
pub async fn connect(path: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path))?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    log::info!("Database ready at {}", path);
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }
    for &(key, value) in DEFAULT_SETTINGS.iter() {
        sqlx::query("INSERT OR IGNORE INTO settings VALUES ($1, $2)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// In-memory pool for tests. Single connection, otherwise every
/// connection would see its own empty database.
pub async fn connect_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        migrate(&pool).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, DEFAULT_SETTINGS.len() as i64);
    }
}
