use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::Unit;
use crate::notify::{Change, Notifier};
use crate::{breaks, proceeds, Error, Payload};

pub async fn create_unit(
    Json(unit): Json<CreateUnit>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<Unit> {
    if unit.name.is_empty() || unit.lecturer.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`name` and `lecturer` must not be empty".to_string(),
        });
    }

    let row = Unit {
        uuid: Uuid::new_v4(),
        name: unit.name,
        lecturer: unit.lecturer,
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO units VALUES ($1, $2, $3, $4)")
        .bind(row.uuid)
        .bind(&row.name)
        .bind(&row.lecturer)
        .bind(row.created_at)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    notifier.notify(Change::Units);
    proceeds(row)
}

pub async fn list_units(Extension(pool): Extension<SqlitePool>) -> Payload<UnitList> {
    let units = sqlx::query_as::<_, Unit>("SELECT * FROM units ORDER BY name")
        .fetch_all(&pool)
        .await
        .map_err(Error::from)?;
    proceeds(UnitList { units })
}

pub async fn delete_unit(
    Json(body): Json<DeleteUnit>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<UnitDeleted> {
    let res = sqlx::query("DELETE FROM units WHERE uuid = $1")
        .bind(body.uuid)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    if res.rows_affected() < 1 {
        return breaks(Error::UnitDoesNotExist {
            message: format!("Unit with uuid `{}` does not exist!", body.uuid),
        });
    }

    // lessons and their attendance cascade with the unit
    notifier.notify(Change::Units);
    notifier.notify(Change::Session);
    proceeds(UnitDeleted {
        unit_uuid: body.uuid,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUnit {
    pub name: String,
    pub lecturer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteUnit {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitList {
    pub units: Vec<Unit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDeleted {
    pub unit_uuid: Uuid,
}
