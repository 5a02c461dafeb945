use std::future::Future;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// One-shot timer bound to a cancellation token.
///
/// Either the expiry action runs or the timer is cancelled, never both.
/// Dropping the handle cancels it, and so does cancelling the parent token
/// the deadline was armed under.
#[derive(Debug)]
pub(crate) struct Deadline {
    token: CancellationToken,
}

impl Deadline {
    pub fn arm<F, Fut>(parent: &CancellationToken, after: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let guard = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => {}
                _ = time::sleep(after) => on_expire().await,
            }
        });
        Self { token }
    }

    /// Token cancelled together with this deadline; tasks that only make
    /// sense while the deadline is pending hang off it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(fired: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        let fired = Arc::clone(fired);
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let session = CancellationToken::new();
        let deadline = Deadline::arm(&session, Duration::from_secs(5), counting(&fired));

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Dropping after expiry does nothing
        drop(deadline);
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_deadline_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let session = CancellationToken::new();
        let deadline = Deadline::arm(&session, Duration::from_secs(5), counting(&fired));

        time::sleep(Duration::from_secs(2)).await;
        drop(deadline);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_cancel_stops_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let session = CancellationToken::new();
        let _deadline = Deadline::arm(&session, Duration::from_secs(5), counting(&fired));

        session.cancel();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
