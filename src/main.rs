pub mod attendance;
pub mod config;
pub mod db;
pub mod err;
pub mod models;
pub mod notify;
pub mod sessions;
pub mod settings;
pub mod students;
pub mod units;

use axum::{routing::get, routing::post, response::IntoResponse, Router, Json};

use axum::handler::Handler;
use axum::http::Uri;
use axum::Extension;
use serde::Serialize;
use tower::ServiceBuilder;

use crate::config::Config;
use crate::err::{Error, Fine, Maybe, Nothing};
use crate::notify::Notifier;

pub type Payload<T> = axum::response::Result<Json<Maybe<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V> where V: Serialize {
    Ok(Json(Fine(value)))
}

pub fn breaks<V>(err: Error) -> Payload<V> where V: Serialize {
    Ok(Json(Nothing(err)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::load();
    let pool = db::connect(&config.database_path).await?;
    let notifier = Notifier::new();

    let app = Router::new()
        .route("/students/create", post(students::create_student))
        .route("/students/list", get(students::list_students))
        .route("/students/delete", post(students::delete_student))
        .route("/units/create", post(units::create_unit))
        .route("/units/list", get(units::list_units))
        .route("/units/delete", post(units::delete_unit))
        .route("/sessions/start", post(sessions::start_session))
        .route("/sessions/restart", post(sessions::restart_session))
        .route("/sessions/enable-otp", post(sessions::enable_otp))
        .route("/sessions/active", get(sessions::active_session))
        .route("/attendance/submit", post(attendance::submit_code))
        .route("/attendance/lecturer", post(attendance::lecturer_code))
        .route("/attendance/list/:lesson", get(attendance::lesson_attendance))
        .route("/settings/get/:key", get(settings::get_setting))
        .route("/settings/set", post(settings::set_setting))
        .route("/events", get(notify::events))
        .fallback(err::handler404.into_service())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(pool))
                .layer(Extension(notifier)),
        );

    log::info!("Starting Rollcall HTTP Server on http://{}", config.addr);
    axum::Server::bind(&config.addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
