use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A task scheduled for a specific point in the future.
/// It will automatically execute at that point unless cancelled first.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
    run_at: DateTime<Utc>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule the given task to execute at time `run_at`.
    /// If `run_at` is in the past, the task will execute immediately.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let delay = datetime_to_duration(run_at);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await
        });
        Self { handle, run_at }
    }

    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Cancel the task if it has not run yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// Implement `Future` for `ScheduledTask` so we can directly `await` it.
impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// Convert a `DateTime` into a duration from the current instant.
/// A `DateTime` in the past will produce a duration of zero.
fn datetime_to_duration(datetime: DateTime<Utc>) -> Duration {
    let target_timestamp = datetime.timestamp_millis();
    let now_timestamp = Utc::now().timestamp_millis();
    let time_diff = u64::try_from(target_timestamp - now_timestamp).unwrap_or(0);
    Duration::from_millis(time_diff)
}
