//! Single-flight refresh coordination.
//!
//! The coordinator owns the refresh state: a `refreshing` flag and the FIFO
//! queue of requests parked behind the in-flight refresh. Both are only ever
//! changed together inside one critical section, and the lock is never held
//! across an `.await`.
//!
//! ```text
//!   IDLE --first 401--> REFRESHING --settle--> IDLE
//!                        |   ^
//!                        +---+ later 401s are queued
//! ```

use std::collections::VecDeque;

use parking_lot::Mutex;
use reqwest::Response;
use tokio::sync::oneshot;

use super::{ApiError, ApiRequest};

/// Outcome delivered to a parked caller
pub type Outcome = Result<Response, ApiError>;

/// A request that failed authorization and is waiting on the refresh.
#[derive(Debug)]
pub struct PendingRequest {
    request: ApiRequest,
    reply: oneshot::Sender<Outcome>,
}

impl PendingRequest {
    /// Park `request`, returning the receiver its caller awaits
    pub fn new(request: ApiRequest) -> (Self, oneshot::Receiver<Outcome>) {
        let (reply, outcome) = oneshot::channel();
        (Self { request, reply }, outcome)
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Settle the caller's future. A caller that stopped waiting is ignored.
    pub fn settle(self, outcome: Outcome) {
        let _ = self.reply.send(outcome);
    }
}

/// How `admit` placed a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No refresh was running; the caller must start one
    Leader,
    /// A refresh is already in flight; the request waits for it
    Queued,
}

#[derive(Debug, Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
}

#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request rejected with 401 and report whether it opened the episode.
    ///
    /// The leader's own request is queued first, so it is replayed first.
    pub fn admit(&self, pending: PendingRequest) -> Admission {
        let mut state = self.state.lock();
        state.queue.push_back(pending);
        if state.refreshing {
            Admission::Queued
        } else {
            state.refreshing = true;
            Admission::Leader
        }
    }

    /// End the episode: drain the queue in arrival order and return to idle.
    pub fn settle(&self) -> Vec<PendingRequest> {
        let mut state = self.state.lock();
        state.refreshing = false;
        state.queue.drain(..).collect()
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    /// Number of requests parked behind the current refresh
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}
