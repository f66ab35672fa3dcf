//! Fixed-period scheduler driving tail, parse and route.

use crate::chat::parse_line;
use crate::error::Result;
use crate::router::Router;
use crate::sources::{SourceSet, SourceUpdate, UpdateOutcome};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns every watched source and polls them on one logical task.
pub struct Pipeline {
    sources: SourceSet,
    router: Router,
    max_lines_per_poll: usize,
    updates: Option<mpsc::UnboundedReceiver<SourceUpdate>>,
}

impl Pipeline {
    /// Scheduler reading at most `max_lines_per_poll` lines per source per tick.
    #[must_use]
    pub fn new(sources: SourceSet, router: Router, max_lines_per_poll: usize) -> Self {
        Self {
            sources,
            router,
            max_lines_per_poll: max_lines_per_poll.max(1),
            updates: None,
        }
    }

    /// Open a channel through which another task can change the source set.
    /// Updates are applied at the start of the next tick. A second call
    /// replaces the previous channel.
    pub fn update_sender(&mut self) -> mpsc::UnboundedSender<SourceUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(rx);
        tx
    }

    /// Watched sources.
    #[must_use]
    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Router events are handed to.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Apply one source change. Stopping a source's tailing also empties
    /// both sink queues.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` for unknown or duplicate paths.
    pub fn apply(&mut self, update: SourceUpdate) -> Result<()> {
        if self.sources.apply(update)? == UpdateOutcome::TailingStopped {
            let sinks = self.router.sinks();
            sinks.clear_speech();
            sinks.clear_forward();
        }
        Ok(())
    }

    /// Run one scheduling cycle. Returns the number of events routed.
    pub fn tick(&mut self) -> usize {
        self.drain_updates();

        let mut routed = 0;
        for source in self.sources.iter_mut() {
            let flags = source.config().sink_flags();
            for _ in 0..self.max_lines_per_poll {
                let Some(line) = source.poll() else {
                    break;
                };
                if let Some(event) = parse_line(&line) {
                    self.router.route(&event, flags);
                    routed += 1;
                }
            }
        }
        routed
    }

    fn drain_updates(&mut self) {
        let mut pending = Vec::new();
        if let Some(rx) = self.updates.as_mut() {
            while let Ok(update) = rx.try_recv() {
                pending.push(update);
            }
        }
        for update in pending {
            debug!(?update, "applying source update");
            if let Err(e) = self.apply(update) {
                warn!(error = %e, "source update rejected");
            }
        }
    }

    /// Tick every `interval` until `cancel` fires, then close every source.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        info!(
            sources = self.sources.len(),
            interval_ms = interval.as_millis() as u64,
            "chat pipeline started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        for source in self.sources.iter_mut() {
            source.close();
        }
        info!("chat pipeline stopped");
    }
}
