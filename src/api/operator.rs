use rocket::{serde::json::Json, Route, State};

use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::model::{CloseReceipt, PublishedResult, StatusView};

pub fn routes() -> Vec<Route> {
    routes![close, status, tally]
}

#[post("/close")]
async fn close(collector: &State<Collector>) -> Result<Json<CloseReceipt>> {
    let snapshot = collector.close().await?;
    Ok(Json(CloseReceipt {
        collector: collector.handle().id(),
        voter_count: snapshot.voter_count,
    }))
}

#[get("/status")]
fn status(collector: &State<Collector>) -> Json<StatusView> {
    Json(collector.handle().status())
}

/// The final tally, only once both collectors have confirmed it.
#[get("/tally")]
fn tally(collector: &State<Collector>) -> Result<Json<PublishedResult>> {
    let progress = collector.handle().progress();
    if let Some(reason) = progress.failure {
        return Err(Error::Halted(reason));
    }
    progress
        .published
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("{:?} tally", progress.lifecycle)))
}
