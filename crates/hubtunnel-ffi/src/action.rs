//! One-shot actions and token sinks handed across the C boundary.
//!
//! Native code only ever sees a `u64` token. The closure behind it lives in
//! a process-wide table until it is fired, released by the operation that
//! created it, or purged when its connection is disposed. Whichever comes
//! first removes it; everything after that is a no-op.

use std::collections::HashMap;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use parking_lot::Mutex;
use tracing::trace;

use crate::args::optional_str_arg;
use crate::types::{HubTunnelAction, HubTunnelHandle, HubTunnelTokenSink};

type Action = Box<dyn FnOnce() + Send>;
type Sink = Box<dyn FnOnce(Option<String>) + Send>;

struct Entry<F> {
    owner: HubTunnelHandle,
    /// Subscription method for unsubscribe actions.
    group: Option<String>,
    run: F,
}

/// Token → entry, tagged with the owning connection.
struct Table<F> {
    entries: Mutex<HashMap<u64, Entry<F>>>,
}

impl<F> Table<F> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, owner: HubTunnelHandle, group: Option<String>, run: F) -> u64 {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(token, Entry { owner, group, run });
        token
    }

    fn take(&self, token: u64) -> Option<F> {
        if token == 0 {
            return None;
        }
        self.entries.lock().remove(&token).map(|entry| entry.run)
    }

    /// Remove every matching entry, returning them so the caller can run
    /// their destructors outside the lock.
    fn drain_matching(&self, matches: impl Fn(&Entry<F>) -> bool) -> Vec<F> {
        let mut entries = self.entries.lock();
        let tokens: Vec<u64> = entries
            .iter()
            .filter(|(_, entry)| matches(entry))
            .map(|(&token, _)| token)
            .collect();
        tokens
            .into_iter()
            .filter_map(|token| entries.remove(&token).map(|entry| entry.run))
            .collect()
    }
}

/// Shared by actions and sinks so a token never names both.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static ACTIONS: LazyLock<Table<Action>> = LazyLock::new(Table::new);
static SINKS: LazyLock<Table<Sink>> = LazyLock::new(Table::new);

/// An action that does nothing.
pub(crate) const INERT: HubTunnelAction = HubTunnelAction {
    invoke: Some(hubtunnel_action_invoke),
    token: 0,
};

pub(crate) fn register(owner: HubTunnelHandle, run: impl FnOnce() + Send + 'static) -> HubTunnelAction {
    HubTunnelAction {
        invoke: Some(hubtunnel_action_invoke),
        token: ACTIONS.insert(owner, None, Box::new(run)),
    }
}

/// Register an action that belongs to the subscriptions of `group`.
pub(crate) fn register_grouped(
    owner: HubTunnelHandle,
    group: &str,
    run: impl FnOnce() + Send + 'static,
) -> HubTunnelAction {
    HubTunnelAction {
        invoke: Some(hubtunnel_action_invoke),
        token: ACTIONS.insert(owner, Some(group.to_string()), Box::new(run)),
    }
}

/// Forget every action of `owner` registered under `group`.
pub(crate) fn release_group(owner: HubTunnelHandle, group: &str) -> usize {
    ACTIONS
        .drain_matching(|entry| entry.owner == owner && entry.group.as_deref() == Some(group))
        .len()
}

/// Run the action behind `token` if it is still registered.
pub(crate) fn fire(token: u64) -> bool {
    match ACTIONS.take(token) {
        Some(run) => {
            run();
            true
        }
        None => {
            trace!(token, "ignored stale action token");
            false
        }
    }
}

/// Forget an action without running it.
pub(crate) fn release(token: u64) {
    drop(ACTIONS.take(token));
}

pub(crate) fn register_sink(
    owner: HubTunnelHandle,
    run: impl FnOnce(Option<String>) + Send + 'static,
) -> HubTunnelTokenSink {
    HubTunnelTokenSink {
        invoke: Some(hubtunnel_token_sink_invoke),
        token: SINKS.insert(owner, None, Box::new(run)),
    }
}

/// Drop every action and sink owned by `owner`. Returns how many went.
pub(crate) fn purge_owner(owner: HubTunnelHandle) -> usize {
    let actions = ACTIONS.drain_matching(|entry| entry.owner == owner);
    let sinks = SINKS.drain_matching(|entry| entry.owner == owner);
    actions.len() + sinks.len()
}

/// Fire a one-shot action. Unknown, stale and zero tokens are ignored.
#[no_mangle]
pub extern "C" fn hubtunnel_action_invoke(token: u64) {
    crate::ffi_boundary((), || {
        fire(token);
    });
}

/// Deliver an access token (or null) to a pending connect.
///
/// # Safety
/// `access_token` must be null or a valid NUL-terminated C string, readable
/// for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_token_sink_invoke(token: u64, access_token: *const c_char) {
    crate::ffi_boundary((), || {
        let Some(run) = SINKS.take(token) else {
            trace!(token, "ignored stale token sink");
            return;
        };
        // SAFETY: caller guarantees `access_token` is null or a valid C string.
        let access_token = unsafe { optional_str_arg(access_token) };
        run(access_token.map(str::to_string));
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    const OWNER: HubTunnelHandle = u64::MAX - 1;

    fn counting(hits: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let hits = Arc::clone(hits);
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn firing_twice_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let action = register(1_000_001, counting(&hits));
        assert_ne!(action.token, 0);

        let invoke = action.invoke.unwrap();
        invoke(action.token);
        invoke(action.token);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn released_and_unknown_tokens_are_noops() {
        let hits = Arc::new(AtomicUsize::new(0));
        let action = register(1_000_002, counting(&hits));
        release(action.token);
        assert!(!fire(action.token));
        assert!(!fire(0));
        assert!(!fire(u64::MAX));
        hubtunnel_action_invoke(INERT.token);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn purge_drops_only_the_owner() {
        let hits = Arc::new(AtomicUsize::new(0));
        let owned = register(OWNER, counting(&hits));
        let sink = register_sink(OWNER, |_| {});
        let other = register(1_000_003, counting(&hits));

        assert_eq!(purge_owner(OWNER), 2);
        assert!(!fire(owned.token));
        assert!(fire(other.token));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // SAFETY: null is an accepted access token.
        unsafe { hubtunnel_token_sink_invoke(sink.token, std::ptr::null()) };
    }

    #[test]
    fn release_group_drops_only_that_group() {
        let hits = Arc::new(AtomicUsize::new(0));
        let tick = register_grouped(1_000_005, "Tick", counting(&hits));
        let other_method = register_grouped(1_000_005, "Tock", counting(&hits));
        let other_owner = register_grouped(1_000_006, "Tick", counting(&hits));
        let plain = register(1_000_005, counting(&hits));

        assert_eq!(release_group(1_000_005, "Tick"), 1);
        assert!(!fire(tick.token));
        assert!(fire(other_method.token));
        assert!(fire(other_owner.token));
        assert!(fire(plain.token));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn sink_delivers_token_once() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let sink = register_sink(1_000_004, move |token| record.lock().push(token));

        let value = std::ffi::CString::new("secret").unwrap();
        // SAFETY: `value` is a valid C string for both calls.
        unsafe {
            hubtunnel_token_sink_invoke(sink.token, value.as_ptr());
            hubtunnel_token_sink_invoke(sink.token, value.as_ptr());
        }
        assert_eq!(*seen.lock(), vec![Some("secret".to_string())]);
    }
}
