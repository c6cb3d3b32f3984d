//! Adapters from native callbacks to the connection layer's traits.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use hubtunnel_conn::{ack_pair, ConnectionEvents, Handler, PendingAck};
use hubtunnel_frame::args::argument_count;
use hubtunnel_transport::{AccessTokenProvider, TransportError};
use tokio::sync::oneshot;

use crate::action;
use crate::error::to_c_string;
use crate::types::{
    HubTunnelAction, HubTunnelEventHandlers, HubTunnelHandle, HubTunnelTokenSink, NativeContext,
};

/// Handle of the connection an adapter belongs to, known only once the
/// connection has been built.
pub(crate) type Owner = Arc<OnceLock<HubTunnelHandle>>;

fn owner_of(owner: &Owner) -> HubTunnelHandle {
    owner.get().copied().unwrap_or_default()
}

/// Hand out an ack action and wait for native code to fire it.
fn await_native_ack(owner: HubTunnelHandle, call: impl FnOnce(HubTunnelAction)) -> PendingAck {
    let (ack, pending) = ack_pair();
    call(action::register(owner, move || ack.ack()));
    pending
}

pub(crate) struct NativeEvents {
    handlers: HubTunnelEventHandlers,
    context: NativeContext,
    owner: Owner,
}

impl NativeEvents {
    pub(crate) fn new(handlers: HubTunnelEventHandlers, context: *mut c_void, owner: Owner) -> Self {
        Self {
            handlers,
            context: NativeContext(context),
            owner,
        }
    }

    fn error_event(
        &self,
        callback: Option<unsafe extern "C" fn(*mut c_void, *const c_char, HubTunnelAction)>,
        error: Option<&str>,
    ) -> PendingAck {
        let Some(callback) = callback else {
            return PendingAck::ready();
        };
        let error = error.map(to_c_string);
        let error_ptr = error.as_ref().map_or(std::ptr::null(), |message| message.as_ptr());
        await_native_ack(owner_of(&self.owner), |ack| {
            // SAFETY: the host registered `callback` with this context;
            // `error_ptr` stays valid for the call.
            unsafe { callback(self.context.get(), error_ptr, ack) }
        })
    }
}

impl ConnectionEvents for NativeEvents {
    fn closed(&self, error: Option<&str>) -> PendingAck {
        self.error_event(self.handlers.closed, error)
    }

    fn reconnecting(&self, error: Option<&str>) -> PendingAck {
        self.error_event(self.handlers.reconnecting, error)
    }

    fn reconnected(&self) -> PendingAck {
        let Some(callback) = self.handlers.reconnected else {
            return PendingAck::ready();
        };
        await_native_ack(owner_of(&self.owner), |ack| {
            // SAFETY: the host registered `callback` with this context.
            unsafe { callback(self.context.get(), ack) }
        })
    }
}

/// Forwards invocations of one method to a native handler.
pub(crate) struct NativeHandler {
    owner: HubTunnelHandle,
    method: String,
    /// Expected argument count; `None` skips the check.
    arity: Option<u32>,
    callback: unsafe extern "C" fn(*mut c_void, *const u8, usize, HubTunnelAction),
    context: NativeContext,
}

impl NativeHandler {
    pub(crate) fn new(
        owner: HubTunnelHandle,
        method: &str,
        arity: i32,
        callback: unsafe extern "C" fn(*mut c_void, *const u8, usize, HubTunnelAction),
        context: *mut c_void,
    ) -> Self {
        Self {
            owner,
            method: method.to_string(),
            arity: u32::try_from(arity).ok(),
            callback,
            context: NativeContext(context),
        }
    }

    fn check_arity(&self, arguments: &[u8]) -> Result<(), String> {
        let Some(expected) = self.arity else {
            return Ok(());
        };
        let count = argument_count(arguments).map_err(|err| err.to_string())?;
        if count != expected {
            return Err(format!(
                "'{}' expects {expected} argument(s) but the hub sent {count}",
                self.method
            ));
        }
        Ok(())
    }
}

impl Handler for NativeHandler {
    fn invoke(&self, arguments: Bytes) -> PendingAck {
        if let Err(reason) = self.check_arity(&arguments) {
            return PendingAck::failed(reason);
        }
        await_native_ack(self.owner, |ack| {
            // SAFETY: the host registered `callback` with this context; the
            // argument bytes stay alive until the call returns.
            unsafe { (self.callback)(self.context.get(), arguments.as_ptr(), arguments.len(), ack) }
        })
    }
}

/// Asks native code for a token through a one-shot sink.
pub(crate) struct NativeTokenProvider {
    callback: unsafe extern "C" fn(*mut c_void, HubTunnelTokenSink),
    context: NativeContext,
    owner: Owner,
}

impl NativeTokenProvider {
    pub(crate) fn new(
        callback: unsafe extern "C" fn(*mut c_void, HubTunnelTokenSink),
        context: *mut c_void,
        owner: Owner,
    ) -> Self {
        Self {
            callback,
            context: NativeContext(context),
            owner,
        }
    }
}

#[async_trait]
impl AccessTokenProvider for NativeTokenProvider {
    async fn access_token(&self) -> hubtunnel_transport::Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        let sink = action::register_sink(owner_of(&self.owner), move |token| {
            let _ = tx.send(token);
        });
        // SAFETY: the host registered `callback` with this context.
        unsafe { (self.callback)(self.context.get(), sink) };
        rx.await
            .map_err(|_| TransportError::AccessToken("token sink was dropped".to_string()))
    }
}
