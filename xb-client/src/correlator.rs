use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use xb_wire::{Frame, RequestId};

use crate::error::ClientError;

/// What a caller blocked in `await_response` eventually sees.
enum Slot {
    Pending,
    Done(Frame),
    /// The reader thread hit EOF or an unrecoverable I/O error while this
    /// request was outstanding (§4.3: "synthetically completed with a
    /// connection-lost error").
    ConnectionLost,
}

struct Inner {
    slots: Mutex<HashMap<RequestId, Slot>>,
    condvar: Condvar,
}

/// Matches INVOKE request IDs to their RESPONSE/EXCEPTION frames across the
/// request/reader-thread boundary (C3, §4.3).
///
/// One shared `Mutex` + `Condvar` rather than a condvar per outstanding
/// request: every waiter re-checks its own slot on each wakeup, so a single
/// shared condvar is correct and avoids a per-request allocation.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Register a request ID before sending its frame, so the reader thread
    /// always has somewhere to deliver the response even if it races ahead
    /// of the caller reaching `await_response`.
    pub fn begin(&self, request_id: RequestId) {
        let mut slots = self.inner.slots.lock().unwrap();
        slots.insert(request_id, Slot::Pending);
    }

    /// Drop a registration without waiting — used when a oneway send never
    /// expects a reply, or when the caller gives up before sending.
    pub fn cancel(&self, request_id: RequestId) {
        let mut slots = self.inner.slots.lock().unwrap();
        slots.remove(&request_id);
    }

    /// Called from the reader thread with a RESPONSE/EXCEPTION frame.
    /// Returns `false` if nobody is waiting on this request ID (it may have
    /// already timed out and been cancelled).
    pub fn complete(&self, request_id: RequestId, frame: Frame) -> bool {
        let mut slots = self.inner.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(&request_id) {
            *slot = Slot::Done(frame);
            self.inner.condvar.notify_all();
            true
        } else {
            false
        }
    }

    /// Called from the reader thread on EOF: every outstanding request is
    /// synthetically failed so no caller blocks forever on a dead socket.
    pub fn fail_all(&self) {
        let mut slots = self.inner.slots.lock().unwrap();
        for slot in slots.values_mut() {
            *slot = Slot::ConnectionLost;
        }
        self.inner.condvar.notify_all();
    }

    /// Block until `request_id`'s frame arrives, the connection is declared
    /// lost, or `timeout` elapses (§4.3, §7 `ResponseTimeout`).
    pub fn await_response(&self, request_id: RequestId, timeout: Duration) -> Result<Frame, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.inner.slots.lock().unwrap();

        loop {
            match slots.remove(&request_id) {
                Some(Slot::Done(frame)) => return Ok(frame),
                Some(Slot::ConnectionLost) => return Err(ClientError::NoConnection),
                Some(Slot::Pending) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::ResponseTimeout(timeout));
                    }
                    let (guard, result) = self
                        .inner
                        .condvar
                        .wait_timeout(slots, deadline - now)
                        .unwrap();
                    slots = guard;
                    if result.timed_out() {
                        // one more pass to distinguish "timed out waiting"
                        // from "woke up right as the slot was filled"
                        match slots.remove(&request_id) {
                            Some(Slot::Done(frame)) => return Ok(frame),
                            Some(Slot::ConnectionLost) => return Err(ClientError::NoConnection),
                            Some(other) => {
                                slots.insert(request_id, other);
                                return Err(ClientError::ResponseTimeout(timeout));
                            }
                            None => return Err(ClientError::ResponseTimeout(timeout)),
                        }
                    }
                    slots.insert(request_id, Slot::Pending);
                }
                None => return Err(ClientError::NullPointer { what: "correlator slot" }),
            }
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.slots.lock().unwrap().len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Correlator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xb_wire::{Frame, FrameBody, FrameType};

    fn response_frame(request_id: RequestId) -> Frame {
        Frame::new(FrameType::Response, request_id, "publish".to_owned(), String::new(), FrameBody::Units(vec![]))
    }

    #[test]
    fn completes_before_wait() {
        let correlator = Correlator::new();
        let id = RequestId::new(1);
        correlator.begin(id);
        assert!(correlator.complete(id, response_frame(id)));
        let frame = correlator.await_response(id, Duration::from_secs(1)).unwrap();
        assert_eq!(frame.request_id, id);
    }

    #[test]
    fn completes_from_other_thread() {
        let correlator = Correlator::new();
        let id = RequestId::new(2);
        correlator.begin(id);

        let other = correlator.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            other.complete(id, response_frame(id));
        });

        let frame = correlator.await_response(id, Duration::from_secs(1)).unwrap();
        assert_eq!(frame.request_id, id);
        handle.join().unwrap();
    }

    #[test]
    fn times_out_when_nobody_completes() {
        let correlator = Correlator::new();
        let id = RequestId::new(3);
        correlator.begin(id);
        let result = correlator.await_response(id, Duration::from_millis(20));
        assert!(matches!(result, Err(ClientError::ResponseTimeout(_))));
    }

    #[test]
    fn fail_all_wakes_every_waiter() {
        let correlator = Correlator::new();
        let id = RequestId::new(4);
        correlator.begin(id);

        let other = correlator.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            other.fail_all();
        });

        let result = correlator.await_response(id, Duration::from_secs(1));
        assert!(matches!(result, Err(ClientError::NoConnection)));
        handle.join().unwrap();
    }
}
