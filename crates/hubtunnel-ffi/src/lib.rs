//! hubtunnel-ffi: C-ABI exports for hub connections.
//!
//! Connections are addressed by `u64` handles. Async operations return a
//! one-shot [`HubTunnelAction`] that cancels them and report through a
//! native callback that fires exactly once. See `include/hubtunnel.h`.

mod action;
mod args;
mod connection;
mod error;
mod native;
mod registry;
mod runtime;
mod slot;
mod types;

use std::panic::AssertUnwindSafe;

use tracing::debug;

pub use action::{hubtunnel_action_invoke, hubtunnel_token_sink_invoke};
#[cfg(unix)]
pub use connection::hubtunnel_build_with_socket_fd;
pub use connection::{
    hubtunnel_build_with_pipe, hubtunnel_build_with_url, hubtunnel_dispose, hubtunnel_invoke,
    hubtunnel_on, hubtunnel_remove, hubtunnel_send, hubtunnel_set_reconnect_delays,
    hubtunnel_start, hubtunnel_state, hubtunnel_stop,
};
pub use runtime::WORKER_THREADS_ENV;
pub use types::{
    HubTunnelAccessTokenProvider, HubTunnelAction, HubTunnelCallback, HubTunnelErrorEvent,
    HubTunnelEvent, HubTunnelEventHandlers, HubTunnelHandle, HubTunnelMessageHandler,
    HubTunnelResult, HubTunnelResultCallback, HubTunnelTokenSink, HUBTUNNEL_INVALID_HANDLE,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Start the shared runtime. Optional; the first operation that needs the
/// runtime starts it otherwise.
#[no_mangle]
pub extern "C" fn hubtunnel_init() -> HubTunnelResult {
    ffi_boundary(HubTunnelResult::Internal, || {
        error::clear_error_state();
        match runtime::runtime() {
            Ok(_) => HubTunnelResult::Ok,
            Err(err) => {
                error::set_error_message(format!("failed to start runtime: {err}"));
                HubTunnelResult::Internal
            }
        }
    })
}

/// Dispose every live connection and clear the last error.
///
/// Teardown runs in the background; closed events still fire and are still
/// awaited.
#[no_mangle]
pub extern "C" fn hubtunnel_cleanup() {
    ffi_boundary((), || {
        error::clear_error_state();
        let connections = registry::drain();
        if connections.is_empty() {
            return;
        }
        debug!(count = connections.len(), "disposing remaining connections");

        let Ok(runtime) = runtime::runtime() else {
            for connection in connections {
                action::purge_owner(connection.id().get());
            }
            return;
        };
        for connection in connections {
            runtime.spawn(async move {
                let _ = connection.dispose().await;
                action::purge_owner(connection.id().get());
            });
        }
    });
}

/// Description of the last synchronous failure on this thread.
///
/// The pointer stays valid until the next `hubtunnel_*` call on the same
/// thread. Empty when the last call succeeded.
#[no_mangle]
pub extern "C" fn hubtunnel_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
