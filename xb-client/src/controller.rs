use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use xb_queue::{PersistentQueue, QueueEntry};
use xb_wire::{Frame, FrameBody, FrameType, Method, RequestId, RequestIdGenerator};

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::ClientError;
use crate::hooks::{ConnectionHooks, NoopHooks};
use crate::receiver::Receiver;
use crate::router::Router;
use crate::scheduler::Scheduler;
use crate::transport::{self, TransportWriter};
use xb_wire::MessageUnit;

/// Connection lifecycle state (§3, §4.7). Kept as a plain data-free enum
/// rather than an enum-of-structs carrying its own payload per variant,
/// because every state here shares the same associated data (one `Inner`)
/// instead of each carrying its own — widening the enum would just
/// duplicate `Inner`'s fields across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Start,
    Alive,
    Polling,
    Dead,
    End,
}

struct Inner {
    state: ConnState,
    config: ClientConfig,
    writer: Option<TransportWriter>,
    correlator: Correlator,
    router: Router,
    queue: PersistentQueue,
    hooks: Arc<dyn ConnectionHooks>,
    secret_session_id: String,
    absolute_name: Option<String>,
    request_ids: RequestIdGenerator,
    retries_left: i64,
    first_reconnect: bool,
    receiver: Option<Receiver>,
    udp_receiver: Option<Receiver>,
    scheduler: Scheduler,
    handler_lock: Arc<Mutex<()>>,
    cached_connect_reply: Option<Vec<MessageUnit>>,
    pending_connect: Option<Vec<MessageUnit>>,
    unique_id_source: AtomicI64,
}

/// The state machine that decides the fate of each invocation and drives
/// reconnection (C7, §4.7). Cloning is cheap — every clone shares the same
/// underlying state through an `Arc<Mutex<Inner>>`, which is how the
/// Receiver thread and the Scheduler timer callback get their own handle
/// back into the Controller without the facade handing out raw pointers.
#[derive(Clone)]
pub struct Controller(Arc<Mutex<Inner>>);

/// Alias used at call sites (Receiver, Scheduler) that only need to push
/// notifications back into the Controller, to keep those modules'
/// signatures readable without implying a separate type.
pub type ControllerHandle = Controller;

fn queued_ack() -> MessageUnit {
    MessageUnit::new("", Vec::new(), "<qos><state id='OK' info='QUEUED'/></qos>")
}

fn alive_ack() -> MessageUnit {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    MessageUnit::new(
        "",
        Vec::new(),
        format!("<qos><rcvTimestamp nanos='{}'/></qos>", now.as_nanos()),
    )
}

impl Controller {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_hooks(config, Arc::new(NoopHooks))
    }

    pub fn with_hooks(config: ClientConfig, hooks: Arc<dyn ConnectionHooks>) -> Result<Self, ClientError> {
        let queue = PersistentQueue::open(
            &config.queue_db_name,
            &config.queue_node_id,
            &config.queue_name,
            config.queue_max_entries,
            config.queue_max_bytes,
        )?;
        let retries_left = config.retries;

        let inner = Inner {
            state: ConnState::Start,
            config,
            writer: None,
            correlator: Correlator::new(),
            router: Router::new(),
            queue,
            hooks,
            secret_session_id: String::new(),
            absolute_name: None,
            request_ids: RequestIdGenerator::new(),
            retries_left,
            first_reconnect: true,
            receiver: None,
            udp_receiver: None,
            scheduler: Scheduler::new(),
            handler_lock: Arc::new(Mutex::new(())),
            cached_connect_reply: None,
            pending_connect: None,
            unique_id_source: AtomicI64::new(0),
        };

        Ok(Controller(Arc::new(Mutex::new(inner))))
    }

    pub fn state(&self) -> ConnState {
        self.0.lock().unwrap().state
    }

    pub fn router(&self) -> Router {
        self.0.lock().unwrap().router.clone()
    }

    /// Diagnostic one-line dump used by `trace!`/tests, not part of the
    /// typed return surface.
    pub fn debug_summary(&self) -> String {
        let inner = self.0.lock().unwrap();
        format!(
            "Controller[state={:?} absoluteName={} secretSessionId={} queued={} retriesLeft={}]",
            inner.state,
            inner.absolute_name.as_deref().unwrap_or("-"),
            if inner.secret_session_id.is_empty() { "-" } else { "***" },
            inner.queue.num_entries(),
            inner.retries_left,
        )
    }

    /// Monotonically increasing queue-entry id (§3 "strictly increasing
    /// timestamp"). Falls back to a bumped counter if the wall clock
    /// hasn't advanced since the previous call.
    fn next_unique_id(&self, inner: &Inner) -> i64 {
        let now_nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64;
        loop {
            let previous = inner.unique_id_source.load(Ordering::SeqCst);
            let candidate = now_nanos.max(previous + 1);
            if inner
                .unique_id_source
                .compare_exchange(previous, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// Connect to the broker using a pre-built connect invocation
    /// (§1: credential gathering is the embedder's job, not this core's).
    pub fn connect(&self, connect_units: Vec<MessageUnit>) -> Result<Vec<MessageUnit>, ClientError> {
        let mut inner = self.0.lock().unwrap();
        match inner.state {
            ConnState::Alive => return Ok(inner.cached_connect_reply.clone().unwrap_or_default()),
            ConnState::Dead => return Err(ClientError::NoConnectionDead),
            ConnState::End => return Err(ClientError::NoConnection),
            ConnState::Polling => {
                inner.pending_connect = Some(connect_units);
                return Ok(vec![queued_ack()]);
            }
            ConnState::Start => {}
        }
        drop(inner);

        let mut last_err = match self.attempt_connect(&connect_units) {
            Ok(reply) => return Ok(reply),
            Err(err) => err,
        };

        // Only the very first connect attempt gets this synchronous
        // immediate-retry loop, distinct from the steady-state POLLING
        // backoff the Scheduler drives later.
        let (initial_retries, initial_delay_ms) = {
            let inner = self.0.lock().unwrap();
            (inner.config.initial_connect_retries, inner.config.initial_connect_delay_ms)
        };
        for attempt in 1..=initial_retries {
            debug!("initial connect attempt {}/{} failed: {}", attempt, initial_retries, last_err);
            std::thread::sleep(Duration::from_millis(initial_delay_ms));
            match self.attempt_connect(&connect_units) {
                Ok(reply) => return Ok(reply),
                Err(err) => last_err = err,
            }
        }

        let failsafe = self.0.lock().unwrap().config.failsafe_enabled();
        if failsafe {
            let mut inner = self.0.lock().unwrap();
            inner.pending_connect = Some(connect_units);
            inner.state = ConnState::Polling;
            inner.first_reconnect = true;
            let interval = Duration::from_millis(inner.config.delay_ms);
            let handle = self.clone();
            inner.scheduler.schedule_reconnect(interval, true, handle);
            drop(inner);
            Ok(vec![queued_ack()])
        } else {
            Err(ClientError::Connect(format!(
                "initial connect failed after {} attempt(s): {}",
                initial_retries + 1,
                last_err
            )))
        }
    }

    /// Opens the transport, sends the CONNECT invocation, and on success
    /// wires up the Receiver + Scheduler and transitions to ALIVE.
    fn attempt_connect(&self, connect_units: &[MessageUnit]) -> Result<Vec<MessageUnit>, ClientError> {
        let config = self.0.lock().unwrap().config.clone();
        let (writer, mut reader) = transport::connect(&config)?;
        let udp_socket = reader.take_udp();

        let correlator = self.0.lock().unwrap().correlator.clone();
        let request_id = self.0.lock().unwrap().request_ids.next();
        correlator.begin(request_id);

        let frame = Frame::new(
            FrameType::Invoke,
            request_id,
            Method::Connect.as_str(),
            "",
            FrameBody::Units(connect_units.to_vec()),
        );

        if let Err(err) = writer.send_frame(&frame) {
            correlator.cancel(request_id);
            return Err(err);
        }

        let router = self.0.lock().unwrap().router.clone();
        let handler_lock = self.0.lock().unwrap().handler_lock.clone();
        let receiver = Receiver::spawn_tcp(reader, writer.clone(), correlator.clone(), router.clone(), self.clone(), handler_lock.clone());
        let udp_receiver = udp_socket.map(|socket| Receiver::spawn_udp(socket, writer.clone(), correlator.clone(), router, handler_lock));

        let timeout = Duration::from_millis(config.response_timeout_ms);
        let reply = match correlator.await_response(request_id, timeout) {
            Ok(frame) => frame,
            Err(err) => {
                writer.shutdown();
                return Err(err);
            }
        };

        let (secret_session_id, reply_units) = match reply.body {
            FrameBody::Units(units) => (reply.secret_session_id.clone(), units),
            FrameBody::Exception { error_code, message } => {
                writer.shutdown();
                return Err(ClientError::Remote { error_code, message });
            }
        };

        let mut inner = self.0.lock().unwrap();
        let from = format!("{:?}", inner.state);
        inner.writer = Some(writer);
        inner.receiver = Some(receiver);
        inner.udp_receiver = udp_receiver;
        inner.secret_session_id = secret_session_id;
        inner.absolute_name = reply_units.first().map(|u| u.key.clone());
        inner.cached_connect_reply = Some(reply_units.clone());
        inner.state = ConnState::Alive;
        inner.retries_left = inner.config.retries;
        let interval = Duration::from_millis(inner.config.ping_interval_ms);
        let handle = self.clone();
        inner.scheduler.schedule_ping(interval, handle);
        let hooks = inner.hooks.clone();
        drop(inner);
        hooks.on_state_change(&from, "Alive");

        self.drain_queue();

        Ok(reply_units)
    }

    /// Per-state policy table (§4.7): START fails (never connected, nothing
    /// to tear down), ALIVE dispatches the invocation and transitions to
    /// DEAD, POLLING fails with `NoConnectionPolling` (nothing live to
    /// disconnect from), and DEAD/END are an idempotent no-op (§8: "double
    /// disconnect in DEAD state is a no-op returning false").
    pub fn disconnect(&self) -> Result<bool, ClientError> {
        let mut inner = self.0.lock().unwrap();
        match inner.state {
            ConnState::Dead | ConnState::End => return Ok(false),
            ConnState::Start => return Err(ClientError::NotConnected),
            ConnState::Polling => return Err(ClientError::NoConnectionPolling),
            ConnState::Alive => {}
        }

        let writer = inner.writer.take();
        let correlator = inner.correlator.clone();
        let request_id = inner.request_ids.next();
        inner.state = ConnState::Dead;
        inner.scheduler.shutdown();
        let hooks = inner.hooks.clone();
        drop(inner);

        if let Some(writer) = writer {
            let frame = Frame::new(FrameType::Invoke, request_id, Method::Disconnect.as_str(), "", FrameBody::Units(vec![]));
            let _ = writer.send_frame(&frame);
            writer.shutdown();
        }
        correlator.fail_all();
        hooks.on_state_change("Alive", "Dead");
        Ok(true)
    }

    /// Generic invocation path shared by publish/publishArr/publishOneway/
    /// subscribe/unSubscribe/erase/get/ping (§4.7's policy table).
    pub fn invoke(&self, method: Method, units: Vec<MessageUnit>, queueable: bool) -> Result<Vec<MessageUnit>, ClientError> {
        let oneway = method.is_inherently_oneway();

        // Stabilize a subscribe's subscriptionId before deciding whether to
        // dispatch or queue it (§4.7 "Subscribe stability") — the enqueued
        // blob must carry the same client-side id the facade already
        // registered a handler under, not just the frame sent while ALIVE.
        let units = if method == Method::Subscribe && self.0.lock().unwrap().config.failsafe_enabled() {
            self.with_stable_subscription_id(units)
        } else {
            units
        };

        enum Plan {
            Queued(Vec<MessageUnit>),
            Dispatch { writer: TransportWriter, request_id: RequestId, secret_session_id: String, timeout: Duration },
        }

        let plan = {
            let mut inner = self.0.lock().unwrap();
            match inner.state {
                ConnState::Start | ConnState::End => return Err(ClientError::NotConnected),
                ConnState::Dead => return Err(ClientError::NoConnectionDead),
                ConnState::Polling => {
                    if queueable {
                        self.enqueue_locked(&mut inner, method, &units)?;
                        Plan::Queued(vec![queued_ack()])
                    } else {
                        return Err(ClientError::NoConnectionPolling);
                    }
                }
                ConnState::Alive => {
                    let writer = inner.writer.clone().ok_or(ClientError::NoConnection)?;
                    let request_id = inner.request_ids.next();
                    let secret_session_id = inner.secret_session_id.clone();
                    let timeout = Duration::from_millis(inner.config.response_timeout_ms);
                    Plan::Dispatch { writer, request_id, secret_session_id, timeout }
                }
            }
        };

        let (writer, request_id, secret_session_id, timeout) = match plan {
            Plan::Queued(ack) => return Ok(ack),
            Plan::Dispatch { writer, request_id, secret_session_id, timeout } => (writer, request_id, secret_session_id, timeout),
        };

        let units_for_frame = units;

        let frame = Frame::new(FrameType::Invoke, request_id, method.as_str(), secret_session_id, FrameBody::Units(units_for_frame.clone()));

        if oneway {
            return match writer.send_frame(&frame) {
                Ok(()) => Ok(vec![alive_ack()]),
                Err(err) => self.handle_dispatch_failure(method, units_for_frame, queueable, err),
            };
        }

        let correlator = self.0.lock().unwrap().correlator.clone();
        correlator.begin(request_id);
        if let Err(err) = writer.send_frame(&frame) {
            correlator.cancel(request_id);
            return self.handle_dispatch_failure(method, units_for_frame, queueable, err);
        }

        match correlator.await_response(request_id, timeout) {
            Ok(reply) => match reply.body {
                FrameBody::Units(units) => Ok(units),
                FrameBody::Exception { error_code, message } => Err(ClientError::Remote { error_code, message }),
            },
            Err(ClientError::ResponseTimeout(d)) => Err(ClientError::ResponseTimeout(d)),
            Err(err) => self.handle_dispatch_failure(method, units_for_frame, queueable, err),
        }
    }

    /// After a failed write or a connection-lost response while ALIVE:
    /// transition per §4.7 and either queue (queueable ops) or fail.
    fn handle_dispatch_failure(
        &self,
        method: Method,
        units: Vec<MessageUnit>,
        queueable: bool,
        err: ClientError,
    ) -> Result<Vec<MessageUnit>, ClientError> {
        self.on_comm_failure();
        if queueable && self.0.lock().unwrap().config.failsafe_enabled() {
            let mut inner = self.0.lock().unwrap();
            self.enqueue_locked(&mut inner, method, &units)?;
            Ok(vec![queued_ack()])
        } else {
            Err(err)
        }
    }

    fn with_stable_subscription_id(&self, mut units: Vec<MessageUnit>) -> Vec<MessageUnit> {
        let absolute_name = self.0.lock().unwrap().absolute_name.clone().unwrap_or_default();
        for unit in &mut units {
            if unit.qos_property("subscriptionId").is_none() {
                let subscription_id = compute_stable_subscription_id(&absolute_name, &unit.key);
                unit.qos = format!("{}<clientProperty name='subscriptionId'>{}</clientProperty>", unit.qos, subscription_id);
            }
        }
        units
    }

    /// The stable client-generated subscriptionId a subscribe on `key`
    /// would be stamped with while failsafe is active (§4.7 "Subscribe
    /// stability"), or `None` when failsafe is off and the broker's own
    /// assigned id is authoritative instead.
    ///
    /// Exposed so `Session::subscribe` can register its handler under this
    /// id *before* invoking — the invocation may end up queued (POLLING, or
    /// an ALIVE dispatch that hits a comm error and falls back to the
    /// queue), in which case the ack it gets back is a generic `QUEUED`
    /// marker with no subscriptionId of its own to read. Computed with the
    /// same `(absoluteName, key)` hash [`Self::with_stable_subscription_id`]
    /// uses, so the id returned here is exactly the one that ends up
    /// embedded in the wire frame (or queued blob) for this subscribe.
    pub fn stable_subscription_id(&self, key: &str) -> Option<String> {
        let inner = self.0.lock().unwrap();
        if !inner.config.failsafe_enabled() {
            return None;
        }
        let absolute_name = inner.absolute_name.clone().unwrap_or_default();
        drop(inner);
        Some(compute_stable_subscription_id(&absolute_name, key))
    }

    fn enqueue_locked(&self, inner: &mut Inner, method: Method, units: &[MessageUnit]) -> Result<(), ClientError> {
        let blob = encode_units_for_queue(units);
        let unique_id = self.next_unique_id(inner);
        let entry = QueueEntry::new(unique_id, QueueEntry::DEFAULT_PRIORITY, format!("MSG_RAW|{}", method.as_str()), blob);
        inner.queue.put(entry)?;
        Ok(())
    }

    /// Called by the Receiver thread on EOF/I/O error, and internally on a
    /// failed write (§4.7 transition triggers).
    pub fn notify_connection_lost(&self) {
        self.on_comm_failure();
    }

    fn on_comm_failure(&self) {
        let mut inner = self.0.lock().unwrap();
        if matches!(inner.state, ConnState::Dead | ConnState::End) {
            return;
        }
        let from = format!("{:?}", inner.state);
        if let Some(writer) = inner.writer.take() {
            writer.shutdown();
        }
        inner.correlator.fail_all();

        if inner.config.failsafe_enabled() {
            inner.state = ConnState::Polling;
            inner.first_reconnect = true;
            let interval = Duration::from_millis(inner.config.delay_ms);
            let handle = self.clone();
            inner.scheduler.schedule_reconnect(interval, true, handle);
        } else {
            inner.state = ConnState::Dead;
            inner.scheduler.shutdown();
        }
        let to = format!("{:?}", inner.state);
        let hooks = inner.hooks.clone();
        drop(inner);
        hooks.on_state_change(&from, &to);
    }

    /// Scheduler timer fire while ALIVE: send a ping, reschedule on
    /// success, transition on comm failure (§4.8).
    pub fn on_timer_fire_ping(&self) {
        if self.state() != ConnState::Alive {
            return;
        }
        match self.invoke(Method::Ping, vec![MessageUnit::new("", Vec::new(), "<qos/>")], false) {
            Ok(_) => {
                let mut inner = self.0.lock().unwrap();
                let interval = Duration::from_millis(inner.config.ping_interval_ms);
                let handle = self.clone();
                inner.scheduler.schedule_ping(interval, handle);
            }
            Err(_) => {
                // invoke() already drove the transition on failure.
            }
        }
    }

    /// Scheduler timer fire while POLLING: attempt a reconnect; on success
    /// drain the queue, on failure reschedule or give up per `retries`
    /// (§4.8, §4.7 step 1).
    pub fn on_timer_fire_reconnect(&self) {
        if self.state() != ConnState::Polling {
            return;
        }

        let pending_connect = self.0.lock().unwrap().pending_connect.clone();
        let result = match pending_connect {
            Some(units) => self.attempt_connect(&units),
            None => self.attempt_ping_only(),
        };

        match result {
            Ok(_) => {
                let mut inner = self.0.lock().unwrap();
                inner.pending_connect = None;
                inner.first_reconnect = true;
            }
            Err(err) => {
                debug!("reconnect attempt failed: {}", err);
                let mut inner = self.0.lock().unwrap();
                if inner.retries_left > 0 {
                    inner.retries_left -= 1;
                }
                if inner.retries_left == 0 {
                    inner.state = ConnState::Dead;
                    inner.scheduler.shutdown();
                    let hooks = inner.hooks.clone();
                    drop(inner);
                    hooks.on_state_change("Polling", "Dead");
                } else {
                    let delay = Duration::from_millis(inner.config.delay_ms);
                    let first = inner.first_reconnect;
                    inner.first_reconnect = false;
                    let handle = self.clone();
                    inner.scheduler.schedule_reconnect(delay, first, handle);
                }
            }
        }
    }

    /// A reconnect attempt when there is no pending connect-intent to
    /// replay: open the transport and ping once to confirm liveness
    /// (§4.7 step 1: "attempt ping; on success transition ALIVE").
    fn attempt_ping_only(&self) -> Result<(), ClientError> {
        let config = self.0.lock().unwrap().config.clone();
        let (writer, mut reader) = transport::connect(&config)?;
        let udp_socket = reader.take_udp();

        let correlator = self.0.lock().unwrap().correlator.clone();
        let request_id = self.0.lock().unwrap().request_ids.next();
        correlator.begin(request_id);
        let secret_session_id = self.0.lock().unwrap().secret_session_id.clone();
        let frame = Frame::new(
            FrameType::Invoke,
            request_id,
            Method::Ping.as_str(),
            secret_session_id,
            FrameBody::Units(vec![MessageUnit::new("", Vec::new(), "<qos/>")]),
        );
        if let Err(err) = writer.send_frame(&frame) {
            correlator.cancel(request_id);
            return Err(err);
        }

        let router = self.0.lock().unwrap().router.clone();
        let handler_lock = self.0.lock().unwrap().handler_lock.clone();
        let receiver = Receiver::spawn_tcp(reader, writer.clone(), correlator.clone(), router.clone(), self.clone(), handler_lock.clone());
        let udp_receiver = udp_socket.map(|socket| Receiver::spawn_udp(socket, writer.clone(), correlator.clone(), router, handler_lock));

        let timeout = Duration::from_millis(self.0.lock().unwrap().config.response_timeout_ms);
        if let Err(err) = correlator.await_response(request_id, timeout) {
            writer.shutdown();
            return Err(err);
        }

        let mut inner = self.0.lock().unwrap();
        let from = format!("{:?}", inner.state);
        inner.writer = Some(writer);
        inner.receiver = Some(receiver);
        inner.udp_receiver = udp_receiver;
        inner.state = ConnState::Alive;
        inner.retries_left = inner.config.retries;
        let interval = Duration::from_millis(inner.config.ping_interval_ms);
        let handle = self.clone();
        inner.scheduler.schedule_ping(interval, handle);
        let hooks = inner.hooks.clone();
        drop(inner);
        hooks.on_state_change(&from, "Alive");

        self.drain_queue();
        Ok(())
    }

    /// Priority drain after POLLING→ALIVE (§4.7 step 2).
    fn drain_queue(&self) {
        loop {
            if self.state() != ConnState::Alive {
                return;
            }

            let (batch, writer, correlator, secret_session_id, timeout, hooks) = {
                let mut inner = self.0.lock().unwrap();
                if inner.queue.empty() {
                    return;
                }
                let batch = match inner.queue.peek_with_same_priority(64, 4 * 1024 * 1024) {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!("queue peek failed during drain: {}", err);
                        return;
                    }
                };
                let writer = match inner.writer.clone() {
                    Some(w) => w,
                    None => return,
                };
                (
                    batch,
                    writer,
                    inner.correlator.clone(),
                    inner.secret_session_id.clone(),
                    Duration::from_millis(inner.config.response_timeout_ms),
                    inner.hooks.clone(),
                )
            };

            if batch.is_empty() {
                return;
            }

            let mut sent_ids = Vec::with_capacity(batch.len());
            let mut comm_failed = false;
            let mut drop_ids = Vec::new();

            for entry in &batch {
                hooks.on_pre_send(entry.unique_id);
                let method = entry
                    .embedded_type
                    .strip_prefix("MSG_RAW|")
                    .and_then(|m| m.parse::<Method>().ok())
                    .unwrap_or(Method::Publish);
                let units = decode_units_from_queue(&entry.blob);
                let request_id = self.0.lock().unwrap().request_ids.next();
                let frame = Frame::new(FrameType::Invoke, request_id, method.as_str(), secret_session_id.clone(), FrameBody::Units(units));

                let oneway = method.is_inherently_oneway();
                if oneway {
                    match writer.send_frame(&frame) {
                        Ok(()) => sent_ids.push(entry.unique_id),
                        Err(_) => {
                            comm_failed = true;
                            break;
                        }
                    }
                    continue;
                }

                correlator.begin(request_id);
                if writer.send_frame(&frame).is_err() {
                    correlator.cancel(request_id);
                    comm_failed = true;
                    break;
                }
                match correlator.await_response(request_id, timeout) {
                    Ok(reply) => match reply.body {
                        FrameBody::Exception { error_code, message } => {
                            if hooks.on_sending_failed(entry.unique_id, &format!("{}: {}", error_code, message)) {
                                drop_ids.push(entry.unique_id);
                            } else {
                                let mut inner = self.0.lock().unwrap();
                                inner.state = ConnState::Dead;
                                inner.scheduler.shutdown();
                                drop(inner);
                                hooks.on_state_change("Alive", "Dead");
                                return;
                            }
                        }
                        FrameBody::Units(_) => sent_ids.push(entry.unique_id),
                    },
                    Err(ClientError::NoConnection) => {
                        comm_failed = true;
                        break;
                    }
                    Err(err) => {
                        if hooks.on_sending_failed(entry.unique_id, &err.to_string()) {
                            drop_ids.push(entry.unique_id);
                        } else {
                            comm_failed = true;
                            break;
                        }
                    }
                }
            }

            let mut to_remove = sent_ids;
            to_remove.extend(drop_ids);
            if !to_remove.is_empty() {
                let mut inner = self.0.lock().unwrap();
                if let Err(err) = inner.queue.random_remove(&to_remove) {
                    warn!("failed to remove drained entries: {}", err);
                }
                drop(inner);
                hooks.on_post_send(to_remove.len());
            }

            if comm_failed {
                self.on_comm_failure();
                return;
            }
        }
    }

    /// Cancels the scheduler and fails every outstanding request;
    /// idempotent (§5 "shutdown is idempotent").
    pub fn shutdown(&self) {
        let mut inner = self.0.lock().unwrap();
        inner.scheduler.shutdown();
        if let Some(writer) = inner.writer.take() {
            writer.shutdown();
        }
        inner.correlator.fail_all();
        inner.state = ConnState::End;
    }
}

fn compute_stable_subscription_id(absolute_name: &str, key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    absolute_name.hash(&mut hasher);
    key.hash(&mut hasher);
    format!("sub-failsafe-{:016x}", hasher.finish())
}

fn encode_units_for_queue(units: &[MessageUnit]) -> Vec<u8> {
    let frame = Frame::new(FrameType::Invoke, RequestId::new(0), "queued", "", FrameBody::Units(units.to_vec()));
    frame.encode()
}

fn decode_units_from_queue(blob: &[u8]) -> Vec<MessageUnit> {
    let mut cursor = std::io::Cursor::new(blob);
    match Frame::decode(&mut cursor) {
        Ok(frame) => match frame.body {
            FrameBody::Units(units) => units,
            FrameBody::Exception { .. } => Vec::new(),
        },
        Err(err) => {
            warn!("failed to decode queued invocation: {}", err);
            Vec::new()
        }
    }
}
