use std::{future::Future, sync::Arc};

use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};

/// A fixed number of workers, each running one job at a time
///
/// jobs are queued without bounds, so submitting never waits for a worker
/// to become free. a job that is about to sit idle can [`Detach::detach`]
/// itself, handing its worker back to the pool while it keeps running.
pub struct WorkerPool<T> {
    sender: mpsc::UnboundedSender<T>,
    workers: Vec<JoinHandle<Vec<JoinHandle<()>>>>,
}

/// Hands back a job that was submitted after the pool was closed
#[derive(Debug)]
pub struct PoolClosed<T>(pub T);

/// Given to every job, lets it release its worker before it completes
#[derive(Debug, Default)]
pub struct Detach(Option<oneshot::Sender<()>>);

impl Detach {
    /// Frees the worker running this job, only the first call has an effect
    pub fn detach(&mut self) {
        if let Some(detach) = self.0.take() {
            let _ = detach.send(());
        }
    }
}

/// Jobs that left their worker and may still be running
#[derive(Debug, Default)]
pub struct DetachedJobs(Vec<JoinHandle<()>>);

impl DetachedJobs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub async fn join(self) {
        for job in self.0 {
            if let Err(err) = job.await {
                tracing::error!("a detached job failed: {}", err);
            }
        }
    }
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    /// Starts `size` workers that feed every submitted job into `handler`
    ///
    /// note: this function needs to be called from inside a tokio runtime context
    pub fn start<F, Fut>(size: usize, handler: F) -> Self
    where
        F: Fn(T, Detach) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let workers = (0..size)
            .map(|id| tokio::spawn(worker(id, queue.clone(), handler.clone())))
            .collect();

        Self { sender, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job for the next free worker
    pub fn submit(&self, job: T) -> Result<(), PoolClosed<T>> {
        self.sender.send(job).map_err(|err| PoolClosed(err.0))
    }

    /// Closes the pool to new work and waits for the workers to run out of jobs
    ///
    /// once this returns every queued job either completed or detached, the
    /// detached ones are handed back to be joined by the caller.
    pub async fn close(self) -> DetachedJobs {
        drop(self.sender);

        let mut detached = DetachedJobs::default();
        for worker in self.workers {
            match worker.await {
                Ok(jobs) => detached.0.extend(jobs),
                Err(err) => tracing::error!("a worker exited abnormally: {}", err),
            }
        }

        detached
    }
}

type SharedQueue<T> = Arc<Mutex<mpsc::UnboundedReceiver<T>>>;

async fn worker<T, F, Fut>(
    id: usize,
    queue: SharedQueue<T>,
    handler: Arc<F>,
) -> Vec<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(T, Detach) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut detached = vec![];

    loop {
        // only one idle worker waits on the queue at a time
        let Some(job) = queue.lock().await.recv().await else {
            break;
        };

        // run the job on its own task, so a panic only takes down this job
        let (detach, detached_rx) = oneshot::channel();
        let mut running = tokio::spawn(handler(job, Detach(Some(detach))));

        tokio::select! {
            joined = &mut running => {
                if let Err(err) = joined {
                    tracing::error!("worker {} lost a job: {}", id, err);
                }
            }
            // a job that completes without detaching drops the sender, disabling this branch
            Ok(()) = detached_rx => {
                tracing::debug!("worker {} was released by its job", id);
                detached.retain(|job: &JoinHandle<()>| !job.is_finished());
                detached.push(running);
            }
        }
    }

    tracing::debug!("worker {} has no more work, exiting", id);
    detached
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use tokio::sync::oneshot;

    use super::{Detach, WorkerPool};

    #[tokio::test]
    async fn runs_at_most_size_jobs_at_once() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let pool = WorkerPool::start(3, {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            move |_: usize, _: Detach| {
                let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        assert_eq!(pool.size(), 3);

        for job in 0..12 {
            pool.submit(job).unwrap();
        }
        assert!(pool.close().await.is_empty());

        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn submitting_never_waits_for_a_worker() {
        let pool = WorkerPool::start(1, |release: oneshot::Receiver<()>, _| async move {
            let _ = release.await;
        });

        // the only worker is busy, the other jobs are queued
        let mut releases = vec![];
        for _ in 0..5 {
            let (tx, rx) = oneshot::channel();
            pool.submit(rx).unwrap();
            releases.push(tx);
        }

        for tx in releases {
            tx.send(()).unwrap();
        }
        pool.close().await.join().await;
    }

    #[tokio::test]
    async fn panicking_jobs_do_not_kill_workers() {
        let done = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::start(1, {
            let done = done.clone();
            move |job: u32, _| {
                let done = done.clone();
                async move {
                    if job == 0 {
                        panic!("job failed");
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        for job in 0..3 {
            pool.submit(job).unwrap();
        }
        pool.close().await.join().await;

        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug)]
    struct Parkable {
        detach: bool,
        release: oneshot::Receiver<()>,
        done: oneshot::Sender<()>,
    }

    #[tokio::test]
    async fn detached_jobs_free_their_worker() {
        let pool = WorkerPool::start(1, |job: Parkable, mut detach: Detach| async move {
            if job.detach {
                detach.detach();
            }
            let _ = job.release.await;
            let _ = job.done.send(());
        });

        let mut jobs = vec![];
        for detach in [true, false] {
            let (release, rx) = oneshot::channel();
            let (tx, done) = oneshot::channel();
            pool.submit(Parkable {
                detach,
                release: rx,
                done: tx,
            })
            .unwrap();
            jobs.push((release, done));
        }
        let (second_release, second_done) = jobs.pop().unwrap();
        let (first_release, first_done) = jobs.pop().unwrap();

        // the single worker left the first job behind, so the second one runs
        second_release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), second_done)
            .await
            .unwrap()
            .unwrap();

        let detached = pool.close().await;
        assert_eq!(detached.len(), 1);

        first_release.send(()).unwrap();
        detached.join().await;
        first_done.await.unwrap();
    }
}
