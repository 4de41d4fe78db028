use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use xb_wire::{Method, MessageUnit};

use crate::config::ClientConfig;
use crate::controller::{ConnState, Controller};
use crate::error::ClientError;
use crate::hooks::{ConnectionHooks, NoopHooks};
use crate::router::{Router, UpdateHandler};

/// Thin synchronous API over the Connection Controller and Subscription
/// Router (C9, §4.9).
///
/// The reentrancy requirement in §4.9 step 2 ("a callback handler invoked
/// from C4 can in turn make calls") falls out for free here: `Controller`
/// only ever takes its internal lock for short critical sections around
/// state reads/transitions, never across a blocking `Correlator::await`,
/// so a handler calling back into `Session` from the reader thread never
/// contends with the thread that's waiting on its own response.
pub struct Session {
    controller: Controller,
    router: Router,
    temp_topic_counter: AtomicU64,
}

impl Session {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_hooks(config, Arc::new(NoopHooks))
    }

    pub fn with_hooks(config: ClientConfig, hooks: Arc<dyn ConnectionHooks>) -> Result<Self, ClientError> {
        let controller = Controller::with_hooks(config, hooks)?;
        let router = controller.router();
        Ok(Session { controller, router, temp_topic_counter: AtomicU64::new(0) })
    }

    pub fn state(&self) -> ConnState {
        self.controller.state()
    }

    /// Diagnostic one-line dump, used only by `trace!`/tests.
    pub fn debug_summary(&self) -> String {
        self.controller.debug_summary()
    }

    /// `user` becomes the connect key; `qos_extra` is appended verbatim to
    /// the connect qos document (e.g. security credentials — gathering
    /// them is explicitly the embedder's job, not this core's, per §1).
    ///
    /// Also advertises a `sessionCallbackAddress` client property (§3
    /// Session context) naming this process' host — informational only,
    /// since callbacks here always arrive back over the same tunneled
    /// connection rather than a separate listener the broker dials into.
    pub fn connect(&self, user: &str, qos_extra: &str) -> Result<Vec<MessageUnit>, ClientError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let qos = format!(
            "<qos>{}<clientProperty name='__UTC'>{}</clientProperty><clientProperty name='sessionCallbackAddress'>{}</clientProperty></qos>",
            qos_extra,
            now.as_secs(),
            local_callback_address(),
        );
        let unit = MessageUnit::new(format!("<key clientId='{}'/>", user), Vec::new(), qos);
        self.controller.connect(vec![unit])
    }

    pub fn disconnect(&self) -> Result<bool, ClientError> {
        self.controller.disconnect()
    }

    fn stamp_utc(&self, qos: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        format!("{}<clientProperty name='__UTC'>{}</clientProperty>", qos, now.as_secs())
    }

    pub fn publish(&self, key: &str, content: Vec<u8>, qos: &str) -> Result<MessageUnit, ClientError> {
        let unit = MessageUnit::new(key, content, self.stamp_utc(qos));
        let mut reply = self.controller.invoke(Method::Publish, vec![unit], true)?;
        Ok(reply.pop().unwrap_or_default())
    }

    pub fn publish_arr(&self, units: Vec<MessageUnit>, qos: &str) -> Result<Vec<MessageUnit>, ClientError> {
        let stamped: Vec<MessageUnit> = units
            .into_iter()
            .map(|u| MessageUnit::new(u.key, u.content, format!("{}{}", u.qos, self.stamp_utc(qos))))
            .collect();
        self.controller.invoke(Method::PublishArr, stamped, true)
    }

    pub fn publish_oneway(&self, key: &str, content: Vec<u8>, qos: &str) -> Result<(), ClientError> {
        let unit = MessageUnit::new(key, content, self.stamp_utc(qos));
        self.controller.invoke(Method::PublishOneway, vec![unit], true).map(|_| ())
    }

    /// Registers `handler` against the subscriptionId returned by the
    /// broker, or — while failsafe is active — the deterministic client-side
    /// id the Controller would stamp onto this subscribe (§4.7 "Subscribe
    /// stability").
    ///
    /// The stable id is registered *before* the invocation is even sent:
    /// under failsafe, `invoke` may end up queuing this subscribe rather
    /// than dispatching it (POLLING, or an ALIVE dispatch that hits a comm
    /// error), and the ack it returns for a queued call is a generic
    /// `QUEUED` marker with no subscriptionId to read back. Registering
    /// upfront means a callback that arrives after a POLLING→ALIVE drain
    /// still finds its handler even though the original subscribe response
    /// was never seen.
    pub fn subscribe(&self, key: &str, qos: &str, handler: Arc<dyn UpdateHandler>) -> Result<String, ClientError> {
        let stable_id = self.controller.stable_subscription_id(key);
        if let Some(id) = &stable_id {
            self.router.put(id.clone(), handler.clone());
        }

        let unit = MessageUnit::new(key, Vec::new(), qos);
        let reply = match self.controller.invoke(Method::Subscribe, vec![unit], true) {
            Ok(reply) => reply,
            Err(err) => {
                if let Some(id) = &stable_id {
                    self.router.remove(id);
                }
                return Err(err);
            }
        };

        if let Some(id) = stable_id {
            return Ok(id);
        }

        let subscription_id = reply
            .first()
            .and_then(|u| extract_attribute(&u.qos, "subscribe", "id"))
            .or_else(|| reply.first().and_then(|u| u.qos_property("subscriptionId").map(str::to_owned)))
            .ok_or(ClientError::NullPointer { what: "subscriptionId" })?;
        self.router.put(subscription_id.clone(), handler);
        Ok(subscription_id)
    }

    pub fn set_default_handler(&self, handler: Option<Arc<dyn UpdateHandler>>) {
        self.router.set_default(handler);
    }

    pub fn unsubscribe(&self, subscription_id: &str, qos: &str) -> Result<(), ClientError> {
        let key = format!("<key oid='{}'/>", subscription_id);
        let unit = MessageUnit::new(key, Vec::new(), qos);
        self.controller.invoke(Method::UnSubscribe, vec![unit], false)?;
        self.router.remove(subscription_id);
        Ok(())
    }

    pub fn erase(&self, key: &str, qos: &str) -> Result<Vec<MessageUnit>, ClientError> {
        let unit = MessageUnit::new(key, Vec::new(), qos);
        self.controller.invoke(Method::Erase, vec![unit], false)
    }

    pub fn get(&self, key: &str, qos: &str) -> Result<Vec<MessageUnit>, ClientError> {
        let unit = MessageUnit::new(key, Vec::new(), qos);
        self.controller.invoke(Method::Get, vec![unit], false)
    }

    pub fn ping(&self) -> Result<(), ClientError> {
        let unit = MessageUnit::new("", Vec::new(), "<qos/>");
        self.controller.invoke(Method::Ping, vec![unit], false).map(|_| ())
    }

    /// Administrative publish using the `__cmd:` key convention (§6.2,
    /// §4.9): `__cmd:/client/<session>/?dispatcherActive=<bool>`.
    pub fn set_callback_dispatcher_active(&self, session: &str, active: bool) -> Result<(), ClientError> {
        let key = format!("__cmd:/client/{}/?dispatcherActive={}", session, active);
        self.publish(&key, Vec::new(), "<qos/>").map(|_| ())
    }

    /// Rewrites `topic` into the matching `__cmd:.../?...QueueEntries` form
    /// and calls `get` (§4.9).
    pub fn receive(&self, topic: &ReceiveTopic, max_entries: u32, consumable: bool) -> Result<Vec<MessageUnit>, ClientError> {
        let key = match topic {
            ReceiveTopic::History(oid) => format!("__cmd:topic/{}/?historyQueueEntries", oid),
            ReceiveTopic::Callback { user, session } => {
                format!("__cmd:client/{}/session/{}/?callbackQueueEntries", user, session)
            }
            ReceiveTopic::Subject(user) => format!("__cmd:client/{}/?subjectQueueEntries", user),
        };
        let qos = format!("<qos><numEntries>{}</numEntries><consumable>{}</consumable></qos>", max_entries, consumable);
        self.get(&key, &qos)
    }

    /// Creates a temporary topic, publishes `content` with a `JMSReplyTo`
    /// client property pointing to it, awaits exactly one reply, then
    /// erases the temporary topic — guaranteed even if the receive throws
    /// (§4.9, §8 scenario 6).
    pub fn request(&self, key: &str, content: Vec<u8>, timeout: Duration, max_entries: u32) -> Result<Vec<MessageUnit>, ClientError> {
        let temp_oid = format!("__request-{}", self.temp_topic_counter.fetch_add(1, Ordering::SeqCst));
        let temp_key = format!("<key oid='{}'/>", temp_oid);

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_for_handler = received.clone();
        let pair = Arc::new((std::sync::Mutex::new(false), std::sync::Condvar::new()));
        let pair_for_handler = pair.clone();

        let handler: Arc<dyn UpdateHandler> = Arc::new(move |unit: &MessageUnit| {
            received_for_handler.lock().unwrap().push(unit.clone());
            let (lock, cvar) = &*pair_for_handler;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
            Ok(())
        });

        let subscription_id = self.subscribe(&temp_key, "<qos/>", handler);

        let result = (|| -> Result<Vec<MessageUnit>, ClientError> {
            let subscription_id = subscription_id?;
            let qos = format!("<qos><clientProperty name='__jms:JMSReplyTo'>{}</clientProperty></qos>", temp_oid);
            self.publish(key, content, &qos)?;

            let (lock, cvar) = &*pair;
            let mut got = lock.lock().unwrap();
            while !*got {
                let (new_got, timeout_result) = cvar.wait_timeout(got, timeout).unwrap();
                got = new_got;
                if timeout_result.timed_out() && !*got {
                    self.unsubscribe(&subscription_id, "<qos/>").ok();
                    return Err(ClientError::ResponseTimeout(timeout));
                }
            }
            drop(got);
            self.unsubscribe(&subscription_id, "<qos/>").ok();

            let mut units = received.lock().unwrap().clone();
            units.truncate(max_entries as usize);
            Ok(units)
        })();

        let erase_result = self.erase(&temp_key, "<qos/>");
        if let Err(err) = erase_result {
            warn!("failed to erase temporary request topic {}: {}", temp_oid, err);
        }

        result
    }
}

pub enum ReceiveTopic {
    History(String),
    Callback { user: String, session: String },
    Subject(String),
}

/// Best-effort `socket://host` advertised as `sessionCallbackAddress` (§3).
/// Falls back to a fixed marker when the OS hostname can't be read, since
/// this is purely informational and never gated on by either side.
fn local_callback_address() -> String {
    match hostname::get_hostname() {
        Some(host) => format!("socket://{}", host),
        None => "socket://localhost".to_owned(),
    }
}

fn extract_attribute(doc: &str, element: &str, attribute: &str) -> Option<String> {
    let element_start = doc.find(element)?;
    let rest = &doc[element_start..];
    let needle = format!("{}='", attribute);
    let attr_start = rest.find(&needle)? + needle.len();
    let value_rest = &rest[attr_start..];
    let attr_end = value_rest.find('\'')?;
    Some(value_rest[..attr_end].to_owned())
}
