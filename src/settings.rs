use axum::extract::Path;
use axum::{Extension, Json};
use lazy_static::lazy_static;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::models::Setting;
use crate::notify::{Change, Notifier};
use crate::{breaks, proceeds, Error, Payload};

lazy_static! {
    /// Seeded into the settings table at startup when missing.
    pub static ref DEFAULT_SETTINGS: Vec<(&'static str, &'static str)> = vec![
        ("rep_name", "Class Rep"),
        ("license_expiry", ""),
    ];
}

pub async fn get_setting(
    Path(key): Path<String>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<Setting> {
    let setting = sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE key = $1 LIMIT 1")
        .bind(&key)
        .fetch_optional(&pool)
        .await
        .map_err(Error::from)?;

    return if let Some(setting) = setting {
        proceeds(setting)
    } else {
        breaks(Error::NotFound {
            message: format!("No setting named `{}`", key),
        })
    };
}

pub async fn set_setting(
    Json(setting): Json<SetSetting>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<Setting> {
    if setting.key.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`key` parameter was empty".to_string(),
        });
    }

    sqlx::query(
        "INSERT INTO settings VALUES ($1, $2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(&setting.key)
    .bind(&setting.value)
    .execute(&pool)
    .await
    .map_err(Error::from)?;

    notifier.notify(Change::Settings);
    proceeds(Setting {
        key: setting.key,
        value: setting.value,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSetting {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use crate::err::Maybe;

    #[tokio::test]
    async fn set_overwrites_seeded_default() {
        let pool = connect_memory().await.unwrap();
        let notifier = Notifier::new();

        let Json(result) = set_setting(
            Json(SetSetting {
                key: "rep_name".to_string(),
                value: "Jane".to_string(),
            }),
            Extension(pool.clone()),
            Extension(notifier),
        )
        .await
        .unwrap();
        assert!(matches!(result, Maybe::Fine(_)));

        let row: Setting = sqlx::query_as("SELECT * FROM settings WHERE key = 'rep_name'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.value, "Jane");
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let pool = connect_memory().await.unwrap();
        let Json(result) = get_setting(Path("no_such_key".to_string()), Extension(pool))
            .await
            .unwrap();
        assert!(matches!(result, Maybe::Nothing(Error::NotFound { .. })));
    }
}
