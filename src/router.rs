//! Fan-out of chat events to the sinks enabled for their source.

use crate::chat::ChatEvent;
use crate::forward::{ForwardQueue, ForwardTarget};
use crate::sources::SinkFlags;
use crate::speech::SpeechHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Entry points into both sinks. Every operation returns immediately.
#[derive(Debug, Clone)]
pub struct Sinks {
    speech: SpeechHandle,
    /// `None` when no forward consumer runs; forwarded text is then dropped.
    forward: Option<ForwardQueue>,
    target: ForwardTarget,
    drop_warned: Arc<AtomicBool>,
}

impl Sinks {
    /// Sinks feeding a running forward consumer through `forward`.
    #[must_use]
    pub fn new(speech: SpeechHandle, forward: ForwardQueue, target: ForwardTarget) -> Self {
        Self {
            speech,
            forward: Some(forward),
            target,
            drop_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sinks for a relay without a forwarding service.
    #[must_use]
    pub fn without_forwarding(speech: SpeechHandle) -> Self {
        Self {
            speech,
            forward: None,
            target: ForwardTarget::new(None),
            drop_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue text for speaking; a stopped worker is logged, not returned.
    pub fn enqueue_speech(&self, text: impl Into<String>) {
        if let Err(e) = self.speech.speak(text) {
            warn!(error = %e, "speech sink unavailable");
        }
    }

    /// Stop speech and drop everything queued so far.
    pub fn clear_speech(&self) {
        if let Err(e) = self.speech.clear() {
            warn!(error = %e, "speech sink unavailable");
        }
    }

    /// Queue text for forwarding, or drop it when forwarding is disabled.
    pub fn enqueue_forward(&self, text: impl Into<String>) {
        match &self.forward {
            Some(queue) => queue.push(text),
            None => {
                if !self.drop_warned.swap(true, Ordering::Relaxed) {
                    warn!("forwarding is disabled; dropping forwarded chat");
                }
            }
        }
    }

    /// Drop queued forward messages without sending them.
    pub fn clear_forward(&self) {
        if let Some(queue) = &self.forward {
            let dropped = queue.clear();
            debug!(dropped, "forward queue cleared");
        }
    }

    /// Move the forward target.
    pub fn set_forward_target(&self, id: impl Into<String>) {
        self.target.set(id);
    }

    /// Producer handle of the speech worker.
    #[must_use]
    pub fn speech(&self) -> &SpeechHandle {
        &self.speech
    }

    /// Forward queue, if forwarding is enabled.
    #[must_use]
    pub fn forward_queue(&self) -> Option<&ForwardQueue> {
        self.forward.as_ref()
    }

    /// Shared forward target cell.
    #[must_use]
    pub fn forward_target(&self) -> &ForwardTarget {
        &self.target
    }
}

/// Routes parsed events by per-source flags.
#[derive(Debug, Clone)]
pub struct Router {
    sinks: Sinks,
}

impl Router {
    /// Router over `sinks`.
    #[must_use]
    pub fn new(sinks: Sinks) -> Self {
        Self { sinks }
    }

    /// The sinks events are routed to.
    #[must_use]
    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    /// Enqueue `event` on every sink `flags` enables.
    pub fn route(&self, event: &ChatEvent, flags: SinkFlags) {
        debug!(
            speaker = event.speaker().unwrap_or(""),
            speech = flags.speech,
            forward = flags.forward,
            "routing chat event"
        );
        if flags.speech {
            self.sinks.enqueue_speech(event.rendered_message());
        }
        if flags.forward {
            self.sinks.enqueue_forward(event.forward_message());
        }
    }
}
