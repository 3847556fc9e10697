use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::Student;
use crate::notify::{Change, Notifier};
use crate::sessions::{active_lesson, generate_otp};
use crate::{breaks, proceeds, Error, Payload};

pub async fn create_student(
    Json(student): Json<CreateStudent>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<Student> {
    if student.name.is_empty() || student.admission_number.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`name` and `admission_number` must not be empty".to_string(),
        });
    }

    let existing = sqlx::query_as::<_, Student>(
        "SELECT * FROM students WHERE admission_number = $1 LIMIT 1",
    )
    .bind(&student.admission_number)
    .fetch_optional(&pool)
    .await
    .map_err(Error::from)?;
    if existing.is_some() {
        return breaks(Error::DuplicateAdmission {
            message: format!(
                "A student with admission number `{}` is already registered!",
                student.admission_number
            ),
        });
    }

    let row = Student {
        uuid: Uuid::new_v4(),
        name: student.name,
        admission_number: student.admission_number,
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO students VALUES ($1, $2, $3, $4)")
        .bind(row.uuid)
        .bind(&row.name)
        .bind(&row.admission_number)
        .bind(row.created_at)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    // registered mid-session: mint a pending code so they can still
    // check in to the running lesson
    if let Some(lesson) = active_lesson(&pool).await? {
        sqlx::query("INSERT INTO attendance VALUES ($1, $2, $3, $4, 'pending', NULL)")
            .bind(Uuid::new_v4())
            .bind(lesson.uuid)
            .bind(row.uuid)
            .bind(generate_otp())
            .execute(&pool)
            .await
            .map_err(Error::from)?;
        notifier.notify(Change::Attendance);
    }

    notifier.notify(Change::Students);
    proceeds(row)
}

pub async fn list_students(Extension(pool): Extension<SqlitePool>) -> Payload<StudentList> {
    let students =
        sqlx::query_as::<_, Student>("SELECT * FROM students ORDER BY admission_number")
            .fetch_all(&pool)
            .await
            .map_err(Error::from)?;
    proceeds(StudentList { students })
}

pub async fn delete_student(
    Json(body): Json<DeleteStudent>,
    Extension(pool): Extension<SqlitePool>,
    Extension(notifier): Extension<Notifier>,
) -> Payload<StudentDeleted> {
    let res = sqlx::query("DELETE FROM students WHERE uuid = $1")
        .bind(body.uuid)
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    if res.rows_affected() < 1 {
        return breaks(Error::StudentDoesNotExist {
            message: format!("Student with uuid `{}` does not exist!", body.uuid),
        });
    }

    // attendance rows cascade with the student
    notifier.notify(Change::Students);
    notifier.notify(Change::Attendance);
    proceeds(StudentDeleted {
        student_uuid: body.uuid,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStudent {
    pub name: String,
    pub admission_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteStudent {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentList {
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDeleted {
    pub student_uuid: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use crate::err::Maybe;

    async fn create(pool: &SqlitePool, name: &str, admission: &str) -> Maybe<Student> {
        let Json(result) = create_student(
            Json(CreateStudent {
                name: name.to_string(),
                admission_number: admission.to_string(),
            }),
            Extension(pool.clone()),
            Extension(Notifier::new()),
        )
        .await
        .unwrap();
        result
    }

    #[tokio::test]
    async fn duplicate_admission_number_is_rejected() {
        let pool = connect_memory().await.unwrap();
        assert!(matches!(
            create(&pool, "Wanjiku", "CT201/001").await,
            Maybe::Fine(_)
        ));
        assert!(matches!(
            create(&pool, "Another", "CT201/001").await,
            Maybe::Nothing(Error::DuplicateAdmission { .. })
        ));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM students")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn mid_session_registration_gets_a_pending_code() {
        let pool = connect_memory().await.unwrap();

        let unit_uuid = Uuid::new_v4();
        sqlx::query("INSERT INTO units VALUES ($1, 'Databases', 'Dr. Otieno', $2)")
            .bind(unit_uuid)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        let lesson_uuid = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO lessons VALUES ($1, $2, 'LT-4', 120, '08:00', '10:00', $3, NULL, \
             '123456', 0, 0, $4)",
        )
        .bind(lesson_uuid)
        .bind(unit_uuid)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        assert!(matches!(
            create(&pool, "Wanjiku", "CT201/001").await,
            Maybe::Fine(_)
        ));

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM attendance WHERE lesson_uuid = $1 AND status = 'pending'",
        )
        .bind(lesson_uuid)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_attendance() {
        let pool = connect_memory().await.unwrap();

        let unit_uuid = Uuid::new_v4();
        sqlx::query("INSERT INTO units VALUES ($1, 'Databases', 'Dr. Otieno', $2)")
            .bind(unit_uuid)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        let lesson_uuid = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO lessons VALUES ($1, $2, 'LT-4', 120, '08:00', '10:00', $3, NULL, \
             '123456', 0, 0, $4)",
        )
        .bind(lesson_uuid)
        .bind(unit_uuid)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let student = match create(&pool, "Wanjiku", "CT201/001").await {
            Maybe::Fine(_) => {
                sqlx::query_as::<_, Student>("SELECT * FROM students LIMIT 1")
                    .fetch_one(&pool)
                    .await
                    .unwrap()
            }
            Maybe::Nothing(err) => panic!("create failed: {:?}", err),
        };

        let Json(result) = delete_student(
            Json(DeleteStudent { uuid: student.uuid }),
            Extension(pool.clone()),
            Extension(Notifier::new()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Maybe::Fine(_)));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attendance")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn deleting_unknown_student_is_rejected() {
        let pool = connect_memory().await.unwrap();
        let Json(result) = delete_student(
            Json(DeleteStudent {
                uuid: Uuid::new_v4(),
            }),
            Extension(pool),
            Extension(Notifier::new()),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Maybe::Nothing(Error::StudentDoesNotExist { .. })
        ));
    }
}
