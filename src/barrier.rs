use std::{collections::HashSet, sync::Arc};

use tokio::sync::watch;

/// Holds sessions back until a fixed number of agencies finished submitting
#[derive(Debug, Clone)]
pub struct AgencyBarrier {
    expected: usize,
    progress: Arc<watch::Sender<Progress>>,
}

#[derive(Debug, Default)]
struct Progress {
    finished: HashSet<u8>,
    released: bool,
}

impl Progress {
    fn is_open(&self, expected: usize) -> bool {
        self.released || self.finished.len() >= expected
    }
}

impl AgencyBarrier {
    pub fn new(expected: usize) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            expected,
            progress: Arc::new(progress),
        }
    }

    /// Marks an agency as done, and waits for the rest of the expected agencies
    ///
    /// returns early once the barrier was released.
    pub async fn finish(&self, agency: u8) {
        let mut rx = self.progress.subscribe();
        self.progress.send_modify(|progress| {
            progress.finished.insert(agency);
        });

        let done = self.progress.borrow().finished.len();
        tracing::debug!(
            "agency {} finished submitting, {}/{} agencies are done",
            agency,
            done,
            self.expected
        );

        let expected = self.expected;
        // the sender lives inside self, this can't fail
        let _ = rx.wait_for(|progress| progress.is_open(expected)).await;
    }

    /// Lets every current and future waiter through, whether or not all agencies arrived
    pub fn release(&self) {
        self.progress.send_modify(|progress| {
            if !progress.is_open(self.expected) {
                tracing::warn!(
                    "releasing the barrier with {}/{} agencies done",
                    progress.finished.len(),
                    self.expected
                );
            }
            progress.released = true;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AgencyBarrier;

    #[tokio::test]
    async fn waits_for_every_agency() {
        let barrier = AgencyBarrier::new(2);

        let first = tokio::spawn({
            let barrier = barrier.clone();
            async move { barrier.finish(1).await }
        });

        // finishing twice from the same agency doesn't count
        let again = tokio::spawn({
            let barrier = barrier.clone();
            async move { barrier.finish(1).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!first.is_finished());
        assert!(!again.is_finished());

        barrier.finish(2).await;
        first.await.unwrap();
        again.await.unwrap();
    }

    #[tokio::test]
    async fn release_lets_waiters_through() {
        let barrier = AgencyBarrier::new(3);

        let waiting = tokio::spawn({
            let barrier = barrier.clone();
            async move { barrier.finish(1).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        barrier.release();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();

        // late agencies don't wait on a released barrier either
        tokio::time::timeout(Duration::from_secs(1), barrier.finish(2))
            .await
            .unwrap();
    }
}
