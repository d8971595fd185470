//! In-flight request counter.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::error::BoxError;
use crate::response::{self, Body};

/// Lock-free count of requests currently being served.
///
/// The dispatcher holds a [`LoadGuard`] for the whole lifetime of a request,
/// response body included, so the count is released on every exit path,
/// panics included.
#[derive(Debug, Default)]
pub struct LoadCounter {
    in_flight: AtomicUsize,
}

impl LoadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the count. A decrement at zero is ignored.
    pub fn decrement(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn get(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Increments now and decrements when the returned guard drops.
    pub fn track(self: &Arc<Self>) -> LoadGuard {
        self.increment();
        LoadGuard { counter: Arc::clone(self) }
    }
}

/// Releases one unit of load on drop.
///
/// Owns its counter, so it can travel with a response body after the
/// handler that created it has returned.
#[must_use = "the load is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LoadGuard {
    counter: Arc<LoadCounter>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

// ── Body tracking ─────────────────────────────────────────────────────────────

/// A body that holds a [`LoadGuard`] until it has been read to the end,
/// has failed, or is dropped.
struct TrackedBody {
    inner: Body,
    guard: Option<LoadGuard>,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        // End of stream or an error: the client has everything it will get.
        if matches!(polled, Poll::Ready(None | Some(Err(_)))) {
            this.guard = None;
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Moves `guard` into `body`, releasing the load once the body is done.
pub(crate) fn track_body(body: Body, guard: LoadGuard) -> Body {
    response::boxed(TrackedBody { inner: body, guard: Some(guard) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn guard_releases_on_drop() {
        let counter = Arc::new(LoadCounter::new());
        {
            let _a = counter.track();
            let _b = counter.track();
            assert_eq!(counter.get(), 2);
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn never_goes_negative() {
        let counter = LoadCounter::new();
        counter.decrement();
        assert_eq!(counter.get(), 0);
        counter.increment();
        counter.decrement();
        counter.decrement();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn guard_releases_during_unwind() {
        let counter = Arc::new(LoadCounter::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = counter.track();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn balanced_concurrent_updates_return_to_zero() {
        let counter = Arc::new(LoadCounter::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let _guard = counter.track();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn tracked_body_holds_load_until_read_to_the_end() {
        let counter = Arc::new(LoadCounter::new());
        let body = track_body(response::full("payload"), counter.track());
        assert_eq!(counter.get(), 1);

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, "payload");
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn dropping_an_unread_tracked_body_releases_load() {
        let counter = Arc::new(LoadCounter::new());
        let body = track_body(response::empty(), counter.track());
        assert_eq!(counter.get(), 1);
        drop(body);
        assert_eq!(counter.get(), 0);
    }
}
