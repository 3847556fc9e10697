use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::Stream;

/// What changed. Clients treat any event as "re-poll now"; the name is
/// only a hint for which view to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Students,
    Units,
    Session,
    Attendance,
    Settings,
}

impl Change {
    pub fn as_str(self) -> &'static str {
        match self {
            Change::Students => "students",
            Change::Units => "units",
            Change::Session => "session",
            Change::Attendance => "attendance",
            Change::Settings => "settings",
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Change>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Send errors only mean nobody is listening right now.
    pub fn notify(&self, change: Change) {
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.tx.subscribe()
    }
}

pub async fn events(
    Extension(notifier): Extension<Notifier>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = notifier.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let body = serde_json::json!({ "changed": change.as_str() });
                    yield Ok(Event::default().event("change").data(body.to_string()));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Push client lagged, skipped {} events", skipped);
                    let body = serde_json::json!({ "changed": "resync" });
                    yield Ok(Event::default().event("change").data(body.to_string()));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
