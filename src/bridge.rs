//! Thread-safe hand-off between the protocol worker and the host thread.
//!
//! ```text
//!  worker thread (blocking pool)            host thread (timer tick)
//!  ─────────────────────────────            ────────────────────────
//!  send_request ── request queue ─────────▶ get_pending_request (never blocks)
//!       ▲                                          │ execute
//!       └──────── response queue ◀──────────── send_response
//! ```
//!
//! The worker side is the only side that ever blocks, and only up to the
//! configured response ceiling. `shutdown()` latches the channel closed and
//! injects one sentinel response so a parked waiter returns immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reserved `request_id` carried by the response injected on shutdown.
pub const SHUTDOWN_REQUEST_ID: &str = "shutdown";
pub const SHUTDOWN_MESSAGE: &str = "Server shutting down";
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest a worker may ever wait; larger timeouts are clamped to it.
pub const RESPONSE_TIMEOUT_CEILING: Duration = Duration::from_secs(3_600);

pub type Arguments = Map<String, Value>;

/// A call to run `operation` on the host thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub request_id: String,
    pub operation: String,
    pub arguments: Arguments,
}

impl BridgeRequest {
    /// Builds a request with a fresh UUID v4 id.
    pub fn new(operation: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    Success(Value),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub request_id: String,
    pub outcome: Outcome,
}

impl BridgeResponse {
    pub fn success(request_id: impl Into<String>, value: Value) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Outcome::Success(value),
        }
    }

    pub fn failure(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Outcome::Failure(message.into()),
        }
    }

    pub(crate) fn sentinel() -> Self {
        Self::failure(SHUTDOWN_REQUEST_ID, SHUTDOWN_MESSAGE)
    }

    pub fn is_sentinel(&self) -> bool {
        self.request_id == SHUTDOWN_REQUEST_ID
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge is shutting down")]
    ShuttingDown,

    #[error("no response from the host thread within {0:?}")]
    Timeout(Duration),

    #[error("bridge channel disconnected")]
    Disconnected,
}

/// The two queues plus the shutdown latch. One instance per connection session.
#[derive(Debug)]
pub struct BridgeChannel {
    request_tx: Sender<BridgeRequest>,
    request_rx: Receiver<BridgeRequest>,
    response_tx: Sender<BridgeResponse>,
    response_rx: Receiver<BridgeResponse>,
    shutdown: AtomicBool,
    response_timeout: Duration,
}

impl Default for BridgeChannel {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TIMEOUT)
    }
}

impl BridgeChannel {
    pub fn new(response_timeout: Duration) -> Self {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        Self {
            request_tx,
            request_rx,
            response_tx,
            response_rx,
            shutdown: AtomicBool::new(false),
            response_timeout: response_timeout.min(RESPONSE_TIMEOUT_CEILING),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    // -------------------------------------------------------------------------
    // worker side
    // -------------------------------------------------------------------------

    /// Enqueue `request` and block until its response (or the sentinel) arrives.
    ///
    /// Never call this from the host thread: it blocks for up to the
    /// response ceiling.
    pub fn send_request(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        let request_id = request.request_id.clone();
        self.enqueue_request(request)?;
        self.wait_for_response(&request_id)
    }

    /// First half of [`send_request`](Self::send_request): fails fast once
    /// shutdown is latched, without touching the queue.
    pub fn enqueue_request(&self, request: BridgeRequest) -> Result<(), BridgeError> {
        if self.is_shutdown() {
            return Err(BridgeError::ShuttingDown);
        }
        debug!(request_id = %request.request_id, operation = %request.operation, "enqueue request");
        self.request_tx
            .send(request)
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Second half of [`send_request`](Self::send_request).
    ///
    /// Responses for other ids are left over from requests whose waiter
    /// already timed out; they are dropped here.
    pub fn wait_for_response(&self, request_id: &str) -> Result<BridgeResponse, BridgeError> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            match self.response_rx.recv_deadline(deadline) {
                Ok(response) if response.request_id == request_id || response.is_sentinel() => {
                    return Ok(response);
                }
                Ok(stale) => {
                    warn!(
                        awaited = %request_id,
                        stale = %stale.request_id,
                        "discarding response nobody is waiting for"
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(request_id = %request_id, timeout = ?self.response_timeout, "request timed out");
                    return Err(BridgeError::Timeout(self.response_timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(BridgeError::Disconnected),
            }
        }
    }

    // -------------------------------------------------------------------------
    // host side
    // -------------------------------------------------------------------------

    /// Next queued request, or `None` straight away if there is none.
    pub fn get_pending_request(&self) -> Option<BridgeRequest> {
        match self.request_rx.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn send_response(&self, response: BridgeResponse) {
        // both ends live in `self`, so the queue cannot be disconnected
        let _ = self.response_tx.send(response);
    }

    /// Latch the channel closed and wake the waiter, if any.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("bridge shutting down");
        self.send_response(BridgeResponse::sentinel());
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // introspection
    // -------------------------------------------------------------------------

    pub fn pending_requests(&self) -> usize {
        self.request_rx.len()
    }

    pub fn pending_responses(&self) -> usize {
        self.response_rx.len()
    }

    /// Non-blocking pop from the response queue.
    pub fn take_response(&self) -> Option<BridgeResponse> {
        self.response_rx.try_recv().ok()
    }
}
