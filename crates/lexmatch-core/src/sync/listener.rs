use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::error::{LexMatchError, Result};
use crate::models::{ChangeEvent, ChangeOp, EventPhase, FeedReport};
use crate::projection::Project;
use crate::state::FEED_WORKER;
use crate::store::{ChangeFeed, FeedWait};
use crate::sync_policy::{retry_backoff, should_retry};

use super::{IndexSynchronizer, wait_for_shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventOutcome {
    Acknowledged,
    DeadLettered,
    /// Shutdown arrived while retrying; the event stays unacknowledged.
    Interrupted,
}

impl EventOutcome {
    pub(crate) const fn phase(self) -> EventPhase {
        match self {
            Self::Acknowledged => EventPhase::Acknowledged,
            Self::DeadLettered => EventPhase::DeadLettered,
            Self::Interrupted => EventPhase::Retrying,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumed {
    Drained,
    Interrupted,
}

impl IndexSynchronizer {
    /// Applies one change event to the index. Insert and update index the
    /// snapshot carried by the event; delete removes the id.
    pub fn apply_event(&self, event: &ChangeEvent) -> Result<()> {
        match event.op {
            ChangeOp::Delete => self.index.delete(&event.profile_id),
            ChangeOp::Insert | ChangeOp::Update => {
                let profile = match &event.document {
                    Some(profile) => Some(profile.clone()),
                    None => self.store.get(&event.profile_id)?,
                };
                match profile {
                    Some(profile) => self.index.index(&profile.project(self.embedding_dim)),
                    None => self.index.delete(&event.profile_id),
                }
            }
        }
    }

    /// Applies `event` until it succeeds, its retries are exhausted, or
    /// shutdown arrives. Non-transient failures are dead-lettered on the first attempt.
    pub(crate) fn process_event(
        &self,
        event: &ChangeEvent,
        shutdown: &Receiver<()>,
        report: &mut FeedReport,
    ) -> Result<EventOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(
                position = event.position,
                profile_id = %event.profile_id,
                op = event.op.as_str(),
                attempt,
                phase = EventPhase::Applying.as_str(),
                "applying change event"
            );
            let err = match self.apply_event(event) {
                Ok(()) => return Ok(EventOutcome::Acknowledged),
                Err(err) => err,
            };

            if err.is_transient() && should_retry(attempt, self.config.max_attempts) {
                report.retries += 1;
                let delay = retry_backoff(&self.config, attempt, event.position);
                warn!(
                    position = event.position,
                    profile_id = %event.profile_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    phase = EventPhase::Retrying.as_str(),
                    error = %err,
                    "index write failed; retrying"
                );
                if wait_for_shutdown(shutdown, delay) {
                    return Ok(EventOutcome::Interrupted);
                }
                continue;
            }

            let id = self.state.record_dead_letter(event, &err.to_string(), attempt)?;
            warn!(
                dead_letter_id = id,
                position = event.position,
                profile_id = %event.profile_id,
                attempts = attempt,
                phase = EventPhase::DeadLettered.as_str(),
                error = %err,
                "change event dead-lettered"
            );
            return Ok(EventOutcome::DeadLettered);
        }
    }

    /// Consumes every event currently in the feed, then returns. Used by
    /// operators and tests; the long-running consumer is
    /// [`IndexSynchronizer::run_change_feed_worker`].
    pub fn drain_change_feed(&self, shutdown: &Receiver<()>) -> Result<FeedReport> {
        let mut report = FeedReport::default();
        let Some(from) = self.resume_position(shutdown, &mut report)? else {
            report.interrupted = true;
            return Ok(report);
        };
        let mut feed = self.open_feed(from);
        loop {
            match self.consume_available(&mut feed, shutdown, &mut report) {
                Ok(Consumed::Drained) => break,
                Ok(Consumed::Interrupted) => {
                    report.interrupted = true;
                    break;
                }
                Err(LexMatchError::FeedCursorExpired {
                    cursor,
                    retained_after,
                }) => {
                    warn!(cursor, retained_after, "feed cursor expired; escalating to full resync");
                    let Some(position) = self.resync_from_head(shutdown, &mut report)? else {
                        report.interrupted = true;
                        break;
                    };
                    feed = self.open_feed(position);
                }
                Err(err) => return Err(err),
            }
        }
        report.cursor = Some(feed.position());
        Ok(report)
    }

    /// Long-running change-feed consumer. Returns only on shutdown; read
    /// failures resubscribe from the last persisted cursor after a backoff.
    pub fn run_change_feed_worker(&self, shutdown: &Receiver<()>) {
        let mut failures = 0u32;
        loop {
            match self.run_feed_session(shutdown) {
                Ok(()) => return,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let delay = retry_backoff(&self.config, failures, 0);
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "change feed session failed; resubscribing"
                    );
                    if wait_for_shutdown(shutdown, delay) {
                        return;
                    }
                }
            }
        }
    }

    fn run_feed_session(&self, shutdown: &Receiver<()>) -> Result<()> {
        let mut report = FeedReport::default();
        let Some(from) = self.resume_position(shutdown, &mut report)? else {
            return Ok(());
        };
        let mut feed = self.open_feed(from);
        info!(position = from, "change feed subscribed");
        loop {
            match self.consume_available(&mut feed, shutdown, &mut report) {
                Ok(Consumed::Drained) => {}
                Ok(Consumed::Interrupted) => return Ok(()),
                Err(LexMatchError::FeedCursorExpired {
                    cursor,
                    retained_after,
                }) => {
                    warn!(cursor, retained_after, "feed cursor expired; escalating to full resync");
                    let Some(position) = self.resync_from_head(shutdown, &mut report)? else {
                        return Ok(());
                    };
                    feed = self.open_feed(position);
                    continue;
                }
                Err(err) => return Err(err),
            }
            if feed.wait(shutdown, self.config.feed_poll()) == FeedWait::Shutdown {
                return Ok(());
            }
        }
    }

    fn open_feed(&self, from: u64) -> ChangeFeed {
        ChangeFeed::open(Arc::clone(&self.store), from, self.config.feed_batch_size)
    }

    /// Persisted cursor, or the head captured before a bootstrap resync when
    /// no cursor exists yet. `None` when shutdown interrupted the resync.
    fn resume_position(
        &self,
        shutdown: &Receiver<()>,
        report: &mut FeedReport,
    ) -> Result<Option<u64>> {
        match self.state.get_checkpoint(FEED_WORKER)? {
            Some(position) => Ok(Some(position)),
            None => {
                info!("no feed cursor; bootstrapping with a full resync");
                self.resync_from_head(shutdown, report)
            }
        }
    }

    /// Full resync that hands the feed over to the head observed before it
    /// started, so writes racing the resync are still replayed.
    fn resync_from_head(
        &self,
        shutdown: &Receiver<()>,
        report: &mut FeedReport,
    ) -> Result<Option<u64>> {
        let head = self.store.head_position()?;
        let resync = self.full_resync(shutdown)?;
        report.retries += resync.retries;
        if resync.interrupted {
            return Ok(None);
        }
        self.state.set_checkpoint(FEED_WORKER, head)?;
        report.resynced = true;
        Ok(Some(head))
    }

    fn consume_available(
        &self,
        feed: &mut ChangeFeed,
        shutdown: &Receiver<()>,
        report: &mut FeedReport,
    ) -> Result<Consumed> {
        loop {
            let batch = feed.next_batch()?;
            if batch.is_empty() {
                return Ok(Consumed::Drained);
            }
            report.fetched += batch.len();
            debug!(
                events = batch.len(),
                first = batch.first().map(|event| event.position),
                last = batch.last().map(|event| event.position),
                phase = EventPhase::Pending.as_str(),
                "fetched change events"
            );
            for event in &batch {
                let outcome = self.process_event(event, shutdown, report)?;
                let phase = outcome.phase();
                // Only a settled event may move the checkpoint past itself.
                if !phase.is_terminal() {
                    return Ok(Consumed::Interrupted);
                }
                match outcome {
                    EventOutcome::DeadLettered => report.dead_lettered += 1,
                    _ => report.acknowledged += 1,
                }
                self.state.set_checkpoint(FEED_WORKER, event.position)?;
                feed.ack(event.position);
                report.cursor = Some(event.position);
                debug!(
                    position = event.position,
                    phase = phase.as_str(),
                    "change event settled"
                );
            }
        }
    }
}
