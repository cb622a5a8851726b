use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};

use crate::collector::Collector;

/// Sequence number of a request, for matching up its log lines.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID, wrapping back to zero past `usize::MAX`.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lets handlers tag their own log lines with the request's ID.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(req.local_cache(RequestId::next))
    }
}

/// Name of the collector a rocket is serving, for log lines.
fn collector_name(rocket: &Rocket<Orbit>) -> String {
    rocket
        .state::<Collector>()
        .map(|collector| collector.handle().id().to_string())
        .unwrap_or_else(|| "collector".to_string())
}

/// Logs every request and response by method, URI and status. Both
/// collectors often write to one terminal, so every line names its
/// collector. Bodies are never logged: they carry ballot shares and
/// partial sums.
#[derive(Debug, Copy, Clone)]
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let scheme = if rocket.config().tls_enabled() {
            "https"
        } else {
            "http"
        };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("{} listening on {scheme}://{ip}:{port}", collector_name(rocket));
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        // Assign an ID.
        let id = req.local_cache(RequestId::next);
        // Peer traffic is worth telling apart from voters at a glance.
        let origin = if req.uri().path().starts_with("/peer/") {
            "peer"
        } else {
            "client"
        };
        // Log the incoming request.
        let name = collector_name(req.rocket());
        info!("{name} ->req{id} {} {} from {origin}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        // Get the ID assigned on the way in.
        let id = req.local_cache(RequestId::next);
        let code = res.status();
        // Name the matched route, if any.
        let route = match req.route() {
            Some(r) => match r.name {
                Some(ref name) => format!("{name} ({})", r.uri),
                None => r.uri.to_string(),
            },
            None => "UNKNOWN ROUTE".to_string(),
        };
        // Refusals are expected traffic; only server errors are errors.
        let line = format!("{} <-rsp{id} {code} {route}", collector_name(req.rocket()));
        match code.class() {
            StatusClass::ServerError => error!("{line}"),
            StatusClass::ClientError => warn!("{line}"),
            _ => info!("{line}"),
        }
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        match rocket.state::<Collector>() {
            Some(collector) => {
                let status = collector.handle().status();
                warn!(
                    "Shutdown requested, {} stopping in {:?} with {} voters counted",
                    status.collector, status.lifecycle, status.voters_counted
                );
                if let Some(failure) = status.failure {
                    warn!("{} had halted: {failure}", status.collector);
                }
            }
            None => warn!("Shutdown requested, stopping gracefully..."),
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client};

    use super::*;

    #[test]
    fn ids_increase() {
        let first = RequestId::next();
        let second = RequestId::next();
        assert!(second > first);
        assert_eq!(format!("{}", RequestId(7)), "7");
    }

    #[collector_test(b)]
    async fn requests_are_answered_with_the_logger_attached(client: Client) {
        let response = client.get("/status").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let response = client.get("/no-such-route").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}
