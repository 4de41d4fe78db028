use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use xb_wire::MessageUnit;

use crate::error::ClientError;

/// A callback registered against a subscription, invoked from the reader
/// thread for every `update`/`updateOneway` frame matching its
/// subscriptionId (C5, §4.4, §4.5).
///
/// Raw message units are handed over alongside a qos document the handler
/// can parse itself; [`MessageUnit::qos_property`] covers the handful of
/// fields this core interprets, so handlers get the same `MessageUnit`
/// shape.
pub trait UpdateHandler: Send + Sync {
    fn on_update(&self, unit: &MessageUnit) -> Result<(), ClientError>;
}

impl<F> UpdateHandler for F
where
    F: Fn(&MessageUnit) -> Result<(), ClientError> + Send + Sync,
{
    fn on_update(&self, unit: &MessageUnit) -> Result<(), ClientError> {
        self(unit)
    }
}

/// Maps subscriptionId to its registered handler, with an optional default
/// handler for updates whose subscriptionId isn't found (§4.4: "falls back
/// to a default handler if one was registered, else responds with an
/// EXCEPTION `user.update.error`").
///
/// Demultiplexes inbound callback frames by subscriptionId the same way a
/// topic-filter dispatch table would key on topic: short critical sections
/// around the map, handlers cloned out before invocation.
#[derive(Clone, Default)]
pub struct Router {
    handlers: Arc<Mutex<HashMap<String, Arc<dyn UpdateHandler>>>>,
    default_handler: Arc<Mutex<Option<Arc<dyn UpdateHandler>>>>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            default_handler: Arc::new(Mutex::new(None)),
        }
    }

    pub fn put(&self, subscription_id: impl Into<String>, handler: Arc<dyn UpdateHandler>) {
        self.handlers.lock().unwrap().insert(subscription_id.into(), handler);
    }

    pub fn remove(&self, subscription_id: &str) -> Option<Arc<dyn UpdateHandler>> {
        self.handlers.lock().unwrap().remove(subscription_id)
    }

    pub fn set_default(&self, handler: Option<Arc<dyn UpdateHandler>>) {
        *self.default_handler.lock().unwrap() = handler;
    }

    /// Cloning the `Arc<dyn UpdateHandler>` out of the map before invoking
    /// it means `remove` can run concurrently from another thread without
    /// blocking on (or being blocked by) a slow handler body.
    pub fn lookup(&self, subscription_id: &str) -> Option<Arc<dyn UpdateHandler>> {
        if let Some(handler) = self.handlers.lock().unwrap().get(subscription_id).cloned() {
            return Some(handler);
        }
        self.default_handler.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.handlers.lock().unwrap().clear();
        *self.default_handler.lock().unwrap() = None;
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_to_registered_handler() {
        let router = Router::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        router.put("sub1", Arc::new(move |_unit: &MessageUnit| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let handler = router.lookup("sub1").expect("handler present");
        handler.on_update(&MessageUnit::new("<key/>", vec![], "<qos/>")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn falls_back_to_default_handler() {
        let router = Router::new();
        router.set_default(Some(Arc::new(|_unit: &MessageUnit| Ok(()))));
        assert!(router.lookup("unknown-sub").is_some());
    }

    #[test]
    fn unknown_subscription_with_no_default_is_none() {
        let router = Router::new();
        assert!(router.lookup("unknown-sub").is_none());
    }

    #[test]
    fn remove_takes_handler_out_of_dispatch() {
        let router = Router::new();
        router.put("sub1", Arc::new(|_unit: &MessageUnit| Ok(())));
        assert!(router.remove("sub1").is_some());
        assert!(router.lookup("sub1").is_none());
    }
}
