use std::ffi::c_void;
use std::os::raw::c_char;

use bytes::Bytes;
use tracing::debug;

use crate::action;
use crate::error::to_c_string;
use crate::types::{HubTunnelCallback, HubTunnelResultCallback, NativeContext};

/// Reported when an operation is dropped without completing.
pub(crate) const ABANDONED: &str = "operation abandoned";

#[derive(Clone, Copy)]
enum Target {
    Done(unsafe extern "C" fn(*mut c_void, *const c_char)),
    Result(unsafe extern "C" fn(*mut c_void, *const c_char, *const u8, usize)),
}

/// The native completion callback of one async operation.
///
/// Completing consumes the slot, so the callback fires at most once. A slot
/// dropped before completing reports [`ABANDONED`], so it also fires at
/// least once. Completion releases the operation's cancel action.
pub(crate) struct CompletionSlot {
    target: Option<Target>,
    context: NativeContext,
    cancel_token: u64,
}

impl CompletionSlot {
    pub(crate) fn done(callback: HubTunnelCallback, context: *mut c_void) -> Self {
        Self::new(callback.map(Target::Done), context)
    }

    pub(crate) fn result(callback: HubTunnelResultCallback, context: *mut c_void) -> Self {
        Self::new(callback.map(Target::Result), context)
    }

    fn new(target: Option<Target>, context: *mut c_void) -> Self {
        Self {
            target,
            context: NativeContext(context),
            cancel_token: 0,
        }
    }

    /// Tie the cancel action to this slot's lifetime.
    pub(crate) fn set_cancel_token(&mut self, token: u64) {
        self.cancel_token = token;
    }

    pub(crate) fn succeed(self) {
        self.complete(Ok(None));
    }

    pub(crate) fn fail(self, message: &str) {
        self.complete(Err(message.to_string()));
    }

    pub(crate) fn complete(mut self, outcome: Result<Option<Bytes>, String>) {
        self.fire(outcome);
    }

    fn fire(&mut self, outcome: Result<Option<Bytes>, String>) {
        action::release(std::mem::take(&mut self.cancel_token));
        let Some(target) = self.target.take() else {
            return;
        };

        let error = outcome.as_ref().err().map(|message| to_c_string(message));
        let error_ptr = error.as_ref().map_or(std::ptr::null(), |message| message.as_ptr());
        let context = self.context.get();
        match target {
            // SAFETY: the caller registered `callback` for exactly this
            // completion; `error_ptr` outlives the call.
            Target::Done(callback) => unsafe { callback(context, error_ptr) },
            Target::Result(callback) => {
                let value = outcome.ok().flatten();
                let (data, len) = match &value {
                    Some(bytes) => (bytes.as_ptr(), bytes.len()),
                    None => (std::ptr::null(), 0),
                };
                // SAFETY: as above; `value` stays alive until the call returns.
                unsafe { callback(context, error_ptr, data, len) }
            }
        }
    }
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        if self.target.is_some() {
            debug!("completion slot dropped before completing");
        }
        self.fire(Err(ABANDONED.to_string()));
    }
}
