//! Accept failure handling shared by both backends.
//!
//! A failed `accept` either concerns a single peer (it reset before we got to
//! it) or the whole process (out of descriptors or memory). The first kind is
//! skipped and the backlog drained further. The second kind pauses the
//! listener for a short while: retrying immediately would spin on a
//! level-triggered listener, and an edge-triggered one needs an explicit
//! retry once the pause ends since the kernel will not report it again.

use std::io;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// How long the listener is ignored after a process-level accept failure.
pub(crate) const ACCEPT_PAUSE: Duration = Duration::from_millis(100);

/// What to do after `accept` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptFailure {
    /// Only this peer is affected; keep accepting.
    Skip,
    /// Accepting cannot make progress right now; stop and pause.
    Pause,
}

pub(crate) fn classify(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => AcceptFailure::Skip,
        _ if err.raw_os_error() == Some(libc::EPROTO) => AcceptFailure::Skip,
        _ => AcceptFailure::Pause,
    }
}

/// Listener pause state. At most one error is logged per pause.
#[derive(Debug)]
pub(crate) struct AcceptThrottle {
    pause: Duration,
    paused_until: Option<Instant>,
}

impl AcceptThrottle {
    pub(crate) fn new(pause: Duration) -> Self {
        Self {
            pause,
            paused_until: None,
        }
    }

    /// Stop accepting until `pause` has elapsed from `now`.
    pub(crate) fn pause(&mut self, err: &io::Error, now: Instant) {
        if self.paused_until.is_none() {
            error!(
                error = %err,
                pause_ms = self.pause.as_millis() as u64,
                "Accept failed, pausing listener"
            );
        }
        self.paused_until = Some(now + self.pause);
    }

    pub(crate) fn is_paused(&self, now: Instant) -> bool {
        matches!(self.paused_until, Some(until) if now < until)
    }

    /// End an elapsed pause. Returns true exactly once per pause, when the
    /// caller should drain the backlog again.
    pub(crate) fn resume_if_elapsed(&mut self, now: Instant) -> bool {
        match self.paused_until {
            Some(until) if now >= until => {
                self.paused_until = None;
                info!("Resuming accepts");
                true
            }
            _ => false,
        }
    }

    /// Bound a readiness wait so it ends no later than the current pause.
    pub(crate) fn wait_bound(&self, timeout: Duration, now: Instant) -> Duration {
        match self.paused_until {
            Some(until) => timeout.min(until.saturating_duration_since(now)),
            None => timeout,
        }
    }
}
