//! Host-side drain of the bridge, driven by a recurring host timer.
//!
//! A tick empties the whole request queue. Every outcome, including an
//! unknown name and a panic inside the operation, is turned into a
//! `BridgeResponse` so nothing escapes back into the host's event loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeChannel, BridgeRequest, BridgeResponse};
use crate::host::{HostScheduler, TimerId};
use crate::registry::{HostAccess, OperationError, OperationTable};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct CooperativePoller<H> {
    channel: Arc<BridgeChannel>,
    table: Rc<OperationTable<H>>,
    scheduler: HostScheduler<H>,
    timer: Option<TimerId>,
}

impl<H> std::fmt::Debug for CooperativePoller<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativePoller")
            .field("timer", &self.timer)
            .field("operations", &self.table.len())
            .finish()
    }
}

impl<H: HostAccess + 'static> CooperativePoller<H> {
    pub fn new(
        channel: Arc<BridgeChannel>,
        table: Rc<OperationTable<H>>,
        scheduler: HostScheduler<H>,
    ) -> Self {
        Self {
            channel,
            table,
            scheduler,
            timer: None,
        }
    }

    /// Register the recurring drain. Returns `false` if it was already running.
    pub fn start(&mut self, interval: Duration) -> bool {
        if self.timer.is_some_and(|id| self.scheduler.is_active(id)) {
            return false;
        }
        let channel = self.channel.clone();
        let table = self.table.clone();
        let id = self.scheduler.start_timer(interval, move |host: &mut H| {
            drain_pending(&channel, &table, host);
        });
        self.timer = Some(id);
        info!(?interval, "poller started");
        true
    }

    /// Cancel the recurring drain. Returns `false` if it was not running.
    pub fn stop(&mut self) -> bool {
        match self.timer.take() {
            Some(id) => {
                self.scheduler.stop_timer(id);
                info!("poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some_and(|id| self.scheduler.is_active(id))
    }

    /// Drain once, right now. Returns how many requests were handled.
    pub fn tick(&self, host: &mut H) -> usize {
        drain_pending(&self.channel, &self.table, host)
    }
}

impl<H> Drop for CooperativePoller<H> {
    fn drop(&mut self) {
        if let Some(id) = self.timer.take() {
            self.scheduler.stop_timer(id);
        }
    }
}

/// Execute every queued request in FIFO order and answer each one.
pub fn drain_pending<H: HostAccess>(
    channel: &BridgeChannel,
    table: &OperationTable<H>,
    host: &mut H,
) -> usize {
    let mut handled = 0;
    while let Some(request) = channel.get_pending_request() {
        let response = execute_request(table, host, request);
        channel.send_response(response);
        handled += 1;
    }
    if handled > 0 {
        debug!(handled, "drained bridge requests");
    }
    handled
}

/// Run one request and capture its outcome, panics included.
pub fn execute_request<H: HostAccess>(
    table: &OperationTable<H>,
    host: &mut H,
    request: BridgeRequest,
) -> BridgeResponse {
    let BridgeRequest {
        request_id,
        operation,
        arguments,
    } = request;
    debug!(%request_id, %operation, "executing request");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        table.execute(host, &operation, arguments)
    }));

    let result = match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%request_id, %operation, %message, "operation panicked");
            Err(OperationError::Panicked {
                operation: operation.clone(),
                message,
            })
        }
    };

    match result {
        Ok(value) => BridgeResponse::success(request_id, value),
        Err(err) => {
            warn!(%request_id, %operation, error = %err, "request failed");
            BridgeResponse::failure(request_id, err.to_string())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Outcome;
    use crate::host::HostEventLoop;
    use crate::registry::{NoArguments, OperationSpec};
    use serde_json::{Value, json};
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct Host {
        calls: usize,
    }

    impl HostAccess for Host {
        fn collection_open(&self) -> bool {
            true
        }
        fn begin_write(&mut self, _: &str) {}
        fn end_write(&mut self, _: &str) {}
    }

    fn table() -> Rc<OperationTable<Host>> {
        let mut builder = OperationTable::builder();
        builder
            .register(OperationSpec::raw("echo", "", json!({}), |host: &mut Host, args| {
                host.calls += 1;
                Ok(Value::Object(args))
            }))
            .register(OperationSpec::new("boom", "", |_: &mut Host, _: NoArguments| {
                panic!("index out of range")
            }));
        Rc::new(builder.build().unwrap())
    }

    fn request(op: &str, value: Value) -> BridgeRequest {
        BridgeRequest::new(op, value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn one_tick_drains_everything_in_order() {
        let channel = Arc::new(BridgeChannel::default());
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let req = request("echo", json!({ "i": i }));
                let id = req.request_id.clone();
                channel.enqueue_request(req).unwrap();
                id
            })
            .collect();

        let scheduler = HostScheduler::new();
        let poller = CooperativePoller::new(channel.clone(), table(), scheduler);
        let mut host = Host::default();
        assert_eq!(poller.tick(&mut host), 5);
        assert_eq!(host.calls, 5);

        let answered: Vec<String> = std::iter::from_fn(|| channel.take_response())
            .map(|r| r.request_id)
            .collect();
        assert_eq!(answered, ids);
    }

    #[test]
    fn echo_preserves_arguments() {
        let table = table();
        let payload = json!({"deck": "日本語", "nested": {"list": [1, null, true]}});
        let response = execute_request(&table, &mut Host::default(), request("echo", payload.clone()));
        assert_eq!(response.outcome, Outcome::Success(payload));
    }

    #[test]
    fn unknown_operation_becomes_failure() {
        let table = table();
        let req = request("no_such_tool", json!({}));
        let id = req.request_id.clone();
        let response = execute_request(&table, &mut Host::default(), req);
        assert_eq!(response.request_id, id);
        match response.outcome {
            Outcome::Failure(msg) => assert!(msg.contains("no_such_tool"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn panic_is_captured_as_failure() {
        let table = table();
        let response = execute_request(&table, &mut Host::default(), request("boom", json!({})));
        assert_eq!(
            response.outcome,
            Outcome::Failure("operation `boom` panicked: index out of range".into())
        );
    }

    #[test]
    fn start_is_idempotent_and_stop_cancels() {
        let channel = Arc::new(BridgeChannel::default());
        let event_loop: HostEventLoop<Host> = HostEventLoop::new(Host::default());
        let mut poller = CooperativePoller::new(channel, table(), event_loop.scheduler().clone());

        assert!(poller.start(DEFAULT_POLL_INTERVAL));
        assert!(!poller.start(DEFAULT_POLL_INTERVAL));
        assert_eq!(event_loop.scheduler().active_timers(), 1);

        assert!(poller.stop());
        assert!(!poller.stop());
        assert_eq!(event_loop.scheduler().active_timers(), 0);
    }

    #[test]
    fn timer_answers_a_blocked_worker() {
        let channel = Arc::new(BridgeChannel::new(Duration::from_secs(5)));
        let mut event_loop = HostEventLoop::new(Host::default());
        let mut poller =
            CooperativePoller::new(channel.clone(), table(), event_loop.scheduler().clone());
        poller.start(Duration::from_millis(5));

        let worker = {
            let channel = channel.clone();
            thread::spawn(move || channel.send_request(request("echo", json!({"x": 1}))))
        };

        let started = Instant::now();
        event_loop.run_until(|host| host.calls == 1, Duration::from_secs(5));
        let response = worker.join().unwrap().unwrap();
        assert_eq!(response.outcome, Outcome::Success(json!({"x": 1})));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn dropping_poller_cancels_timer() {
        let scheduler: HostScheduler<Host> = HostScheduler::new();
        {
            let mut poller =
                CooperativePoller::new(Arc::new(BridgeChannel::default()), table(), scheduler.clone());
            poller.start(DEFAULT_POLL_INTERVAL);
            assert_eq!(scheduler.active_timers(), 1);
        }
        assert_eq!(scheduler.active_timers(), 0);
    }
}
