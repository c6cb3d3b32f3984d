use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::ack::PendingAck;

/// Receives invocations of one client method.
///
/// `arguments` is the raw MessagePack argument array. The returned
/// [`PendingAck`] resolves when the handler is done; the next invocation is
/// not dispatched before that.
pub trait Handler: Send + Sync {
    fn invoke(&self, arguments: Bytes) -> PendingAck;
}

impl<F> Handler for F
where
    F: Fn(Bytes) -> PendingAck + Send + Sync,
{
    fn invoke(&self, arguments: Bytes) -> PendingAck {
        self(arguments)
    }
}

/// Identifies one registration under a method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handle for removing a single registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) method: String,
    pub(crate) id: SubscriptionId,
}

impl Subscription {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Method name → ordered handler registrations.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    by_method: HashMap<String, Vec<(SubscriptionId, Arc<dyn Handler>)>>,
}

impl Subscriptions {
    pub(crate) fn add(&mut self, method: &str, handler: Arc<dyn Handler>) -> Subscription {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_method
            .entry(method.to_string())
            .or_default()
            .push((id, handler));
        Subscription {
            method: method.to_string(),
            id,
        }
    }

    /// Remove one registration. Returns false if it was already gone.
    pub(crate) fn remove(&mut self, subscription: &Subscription) -> bool {
        let Some(handlers) = self.by_method.get_mut(&subscription.method) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.by_method.remove(&subscription.method);
        }
        removed
    }

    /// Remove every registration for `method`, returning how many there were.
    pub(crate) fn remove_all(&mut self, method: &str) -> usize {
        self.by_method.remove(method).map_or(0, |handlers| handlers.len())
    }

    /// Snapshot of the registrations for `method`, in registration order.
    pub(crate) fn handlers(&self, method: &str) -> Vec<(SubscriptionId, Arc<dyn Handler>)> {
        self.by_method
            .get(method)
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|(id, handler)| (*id, Arc::clone(handler)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The handler registered under `id`, if it is still registered.
    pub(crate) fn current(&self, method: &str, id: SubscriptionId) -> Option<Arc<dyn Handler>> {
        self.by_method
            .get(method)?
            .iter()
            .find(|(registered, _)| *registered == id)
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub(crate) fn clear(&mut self) {
        self.by_method.clear();
    }
}
