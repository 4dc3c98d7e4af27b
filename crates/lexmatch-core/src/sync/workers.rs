use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{info, warn};

use crate::error::Result;

use super::{IndexSynchronizer, wait_for_shutdown};

/// Handle for the synchronizer's background threads.
///
/// `shutdown()` (or drop) disconnects the shared shutdown channel and joins
/// every thread; in-flight index writes finish first.
pub struct SyncWorkers {
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorkers")
            .field("threads", &self.handles.len())
            .field("running", &self.shutdown.is_some())
            .finish()
    }
}

impl SyncWorkers {
    /// Starts the change-feed consumer plus the incremental and verifier timers.
    pub fn start(sync: IndexSynchronizer) -> Result<Self> {
        let (tx, rx) = bounded::<()>(1);
        let mut workers = Self {
            shutdown: Some(tx),
            handles: Vec::with_capacity(3),
        };

        let feed = sync.clone();
        let feed_rx = rx.clone();
        workers.spawn("lexmatch-feed", move || {
            feed.run_change_feed_worker(&feed_rx);
        })?;

        let incremental = sync.clone();
        let incremental_rx = rx.clone();
        let interval = sync.config().incremental_interval();
        workers.spawn("lexmatch-incremental", move || {
            run_timer("incremental", &incremental_rx, interval, || {
                incremental.incremental_sync(&incremental_rx).map(|_| ())
            });
        })?;

        let verify_interval = sync.config().verify_interval();
        workers.spawn("lexmatch-verify", move || {
            run_timer("verify", &rx, verify_interval, || {
                sync.verify_consistency().map(|_| ())
            });
        })?;

        info!(threads = workers.handles.len(), "sync workers started");
        Ok(workers)
    }

    fn spawn(&mut self, name: &str, f: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
        self.handles.push(handle);
        Ok(())
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.shutdown.take().is_none() {
            return;
        }
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("sync").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "sync worker panicked");
            }
        }
        info!("sync workers stopped");
    }
}

impl Drop for SyncWorkers {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(
    task: &'static str,
    shutdown: &Receiver<()>,
    interval: Duration,
    mut run: impl FnMut() -> Result<()>,
) {
    while !wait_for_shutdown(shutdown, interval) {
        if let Err(err) = run() {
            warn!(task, code = err.code(), error = %err, "scheduled sync task failed");
        }
    }
}
