//! Publish coalescing buffer.
//!
//! Local agent state can churn many times a second. [`PublishCoalescer`]
//! holds only the most recent value and hands it to the sink once the
//! window has elapsed since the first un-flushed push. Explicit
//! [`flush`](PublishCoalescer::flush) (leave, teardown) and dropping the
//! coalescer deliver any pending value immediately, so the latest state is
//! never lost.

use std::time::Duration;

use huddle_settings::PresenceSettings;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

enum Command<T> {
    Push(T),
    Flush(oneshot::Sender<()>),
}

/// Latest-value-wins buffer in front of a publish sink.
///
/// Must be created inside a Tokio runtime; the sink runs on a background
/// task.
pub struct PublishCoalescer<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> PublishCoalescer<T> {
    /// Spawn the buffer task.
    pub fn new<F>(window: Duration, sink: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(window, rx, sink));
        Self { tx, task }
    }

    /// Spawn the buffer task with the configured `coalesceWindowMs`.
    pub fn from_settings<F>(settings: &PresenceSettings, sink: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::new(Duration::from_millis(settings.coalesce_window_ms), sink)
    }

    /// Replace the pending value, starting the window if none is pending.
    pub fn push(&self, value: T) {
        let _ = self.tx.send(Command::Push(value));
    }

    /// Deliver the pending value now, if any, and wait until the sink ran.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush and stop the background task.
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

async fn run<T, F>(window: Duration, mut rx: mpsc::UnboundedReceiver<Command<T>>, mut sink: F)
where
    F: FnMut(T),
{
    let mut pending: Option<T> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Push(value)) => {
                    pending = Some(value);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + window);
                    }
                }
                Some(Command::Flush(ack)) => {
                    deadline = None;
                    if let Some(value) = pending.take() {
                        sink(value);
                    }
                    let _ = ack.send(());
                }
                None => {
                    if let Some(value) = pending.take() {
                        debug!("flushing pending presence on teardown");
                        sink(value);
                    }
                    break;
                }
            },
            () = wait_for(deadline) => {
                deadline = None;
                if let Some(value) = pending.take() {
                    sink(value);
                }
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    fn collecting() -> (PublishCoalescer<u32>, mpsc::UnboundedReceiver<u32>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let coalescer = PublishCoalescer::new(WINDOW, move |v| {
            let _ = out_tx.send(v);
        });
        (coalescer, out_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_value_survives_window() {
        let (coalescer, mut out) = collecting();
        let start = Instant::now();
        coalescer.push(1);
        coalescer.push(2);
        coalescer.push(3);

        assert_eq!(out.recv().await, Some(3));
        assert!(start.elapsed() >= WINDOW);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_starts_at_first_push() {
        let (coalescer, mut out) = collecting();
        let start = Instant::now();
        coalescer.push(1);
        tokio::time::sleep(Duration::from_millis(150)).await;
        coalescer.push(2);

        assert_eq!(out.recv().await, Some(2));
        let elapsed = start.elapsed();
        assert!(elapsed >= WINDOW && elapsed < WINDOW + Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn each_window_publishes_once() {
        let (coalescer, mut out) = collecting();
        coalescer.push(1);
        assert_eq!(out.recv().await, Some(1));
        coalescer.push(2);
        coalescer.push(3);
        assert_eq!(out.recv().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_delivers_immediately() {
        let (coalescer, mut out) = collecting();
        let start = Instant::now();
        coalescer.push(9);
        coalescer.flush().await;

        assert_eq!(out.try_recv().ok(), Some(9));
        assert!(start.elapsed() < WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_with_nothing_pending_is_noop() {
        let (coalescer, mut out) = collecting();
        coalescer.flush().await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_flushes_pending_value() {
        let (coalescer, mut out) = collecting();
        coalescer.push(7);
        drop(coalescer);

        assert_eq!(out.recv().await, Some(7));
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn window_comes_from_presence_settings() {
        let settings = PresenceSettings {
            coalesce_window_ms: 300,
            ..PresenceSettings::default()
        };
        let (out_tx, mut out) = mpsc::unbounded_channel();
        let coalescer = PublishCoalescer::from_settings(&settings, move |v: u32| {
            let _ = out_tx.send(v);
        });
        let start = Instant::now();
        coalescer.push(1);

        assert_eq!(out.recv().await, Some(1));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_and_stops() {
        let (coalescer, mut out) = collecting();
        coalescer.push(4);
        coalescer.shutdown().await;

        assert_eq!(out.try_recv().ok(), Some(4));
        assert!(out.try_recv().is_err());
    }
}
