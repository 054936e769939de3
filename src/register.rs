//! Single-slot "latest value" registers
//!
//! Every cross-task hand-off in the control loop goes through one of these
//! instead of a queue. Writers overwrite, readers observe the most recent value
//! without blocking, so network jitter can never build up a backlog between
//! producer and consumer.
//!
//! Registers are a thin layer over [`tokio::sync::watch`] that stamps each value
//! with its local receipt time.

use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;

use crate::watchdog::within_window;

/// A value together with the local time it was written
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub received_at: Instant,
}

impl<T> Stamped<T> {
    pub fn new(value: T, received_at: Instant) -> Self {
        Self { value, received_at }
    }

    /// Age of the value at `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.received_at)
    }

    /// True if the value is no older than `window` at `now`
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        within_window(self.received_at, now, window)
    }
}

/// Result of a freshness-bounded read
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Freshness<T> {
    /// The latest value is within the requested age
    Fresh(T),
    /// No value, or the latest value is too old
    Stale,
}

impl<T> Freshness<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Freshness::Fresh(value) => Some(value),
            Freshness::Stale => None,
        }
    }
}

/// Create a new empty register
pub fn register<T>() -> (RegisterWriter<T>, RegisterReader<T>) {
    let (tx, rx) = watch::channel(None);
    (RegisterWriter { tx }, RegisterReader { rx })
}

/// Write half of a register. There is exactly one writer per register.
#[derive(Debug)]
pub struct RegisterWriter<T> {
    tx: watch::Sender<Option<Stamped<T>>>,
}

impl<T> RegisterWriter<T> {
    /// Overwrite the register, stamping the value with the current time
    pub fn publish(&self, value: T) {
        self.publish_at(value, Instant::now());
    }

    /// Overwrite the register with an explicit receipt time
    pub fn publish_at(&self, value: T, received_at: Instant) {
        // send_replace stores the value even while no reader is subscribed
        self.tx.send_replace(Some(Stamped::new(value, received_at)));
    }

    /// Empty the register so readers see no value at all
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Create another reader for this register
    pub fn reader(&self) -> RegisterReader<T> {
        RegisterReader { rx: self.tx.subscribe() }
    }
}

/// Read half of a register. Cloning creates an independent reader.
#[derive(Debug, Clone)]
pub struct RegisterReader<T> {
    rx: watch::Receiver<Option<Stamped<T>>>,
}

impl<T: Clone> RegisterReader<T> {
    /// Latest value, if any, without marking it as seen
    pub fn latest(&self) -> Option<Stamped<T>> {
        self.rx.borrow().clone()
    }

    /// Latest value if it is no older than `window` at `now`
    pub fn latest_within(&self, now: Instant, window: Duration) -> Freshness<T> {
        match self.rx.borrow().as_ref() {
            Some(stamped) if stamped.is_fresh(now, window) => Freshness::Fresh(stamped.value.clone()),
            _ => Freshness::Stale,
        }
    }

    /// Latest value if it was written since the last call, marking it as seen
    pub fn take_changed(&mut self) -> Option<Stamped<T>> {
        if !self.rx.has_changed().unwrap_or(false) {
            return None;
        }
        self.rx.borrow_and_update().clone()
    }

    /// Mark the current value as seen without reading it
    pub fn mark_seen(&mut self) {
        let _ = self.rx.borrow_and_update();
    }

    /// Wait until the register is written (or cleared) again
    ///
    /// Returns an error once the writer has been dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

impl<T: Clone + Send + Sync + 'static> RegisterReader<T> {
    /// Stream of values written after this call; clears are skipped
    pub fn into_stream(self) -> impl Stream<Item = Stamped<T>> + Send + 'static {
        WatchStream::from_changes(self.rx).filter_map(|opt| async move { opt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn writer_overwrites_and_reader_sees_latest() {
        let (writer, reader) = register::<u32>();
        assert!(reader.latest().is_none());

        writer.publish(1);
        writer.publish(2);
        writer.publish(3);

        assert_eq!(reader.latest().map(|s| s.value), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn latest_within_respects_window() {
        let (writer, reader) = register::<&'static str>();
        let start = Instant::now();
        writer.publish_at("go", start);

        let window = Duration::from_millis(300);
        assert_eq!(reader.latest_within(start + Duration::from_millis(300), window), Freshness::Fresh("go"));
        assert_eq!(reader.latest_within(start + Duration::from_millis(301), window), Freshness::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_empties_register() {
        let (writer, reader) = register::<u8>();
        writer.publish(9);
        writer.clear();
        assert!(reader.latest().is_none());
        assert_eq!(reader.latest_within(Instant::now(), Duration::from_secs(1)), Freshness::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn take_changed_only_yields_new_writes() {
        let (writer, mut reader) = register::<u8>();
        assert!(reader.take_changed().is_none());

        writer.publish(1);
        assert_eq!(reader.take_changed().map(|s| s.value), Some(1));
        assert!(reader.take_changed().is_none());

        writer.publish(2);
        writer.publish(3);
        assert_eq!(reader.take_changed().map(|s| s.value), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn publishing_without_readers_is_retained() {
        let (writer, reader) = register::<u8>();
        drop(reader);
        writer.publish(5);
        assert_eq!(writer.reader().latest().map(|s| s.value), Some(5));
    }

    #[tokio::test]
    async fn stream_yields_values_after_subscription() {
        let (writer, reader) = register::<u8>();
        writer.publish(1);
        let mut stream = Box::pin(reader.into_stream());

        writer.publish(2);
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should yield")
            .expect("stream should not end");
        assert_eq!(next.value, 2);
    }
}
