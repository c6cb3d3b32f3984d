use std::ffi::c_void;
use std::future::Future;
use std::os::raw::c_char;
use std::sync::Arc;

use bytes::Bytes;
use hubtunnel_conn::{CancellationToken, ConnectionConfig, HubConnection, ReconnectPolicy};
use hubtunnel_frame::args::NO_ARGUMENTS;
use hubtunnel_transport::{Connector, NamedPipeConnector, UrlConnector, LOCAL_SERVER};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::action;
use crate::args::{bytes_arg, delays_arg, required_str_arg};
use crate::error;
use crate::native::{NativeEvents, NativeHandler, NativeTokenProvider, Owner};
use crate::registry;
use crate::runtime::runtime;
use crate::slot::CompletionSlot;
use crate::types::{
    HubTunnelAccessTokenProvider, HubTunnelAction, HubTunnelCallback, HubTunnelEventHandlers,
    HubTunnelHandle, HubTunnelMessageHandler, HubTunnelResult, HubTunnelResultCallback,
    HUBTUNNEL_INVALID_HANDLE,
};

/// Read an optional handler table.
///
/// # Safety
/// `handlers` must be null or point to a readable `HubTunnelEventHandlers`.
unsafe fn handlers_arg(handlers: *const HubTunnelEventHandlers) -> HubTunnelEventHandlers {
    if handlers.is_null() {
        return HubTunnelEventHandlers::default();
    }
    // SAFETY: Pointer validity is guaranteed by the caller.
    unsafe { *handlers }
}

fn shared_runtime() -> Option<&'static Runtime> {
    match runtime() {
        Ok(runtime) => Some(runtime),
        Err(err) => {
            error::set_error_message(format!("failed to start runtime: {err}"));
            None
        }
    }
}

fn lookup(handle: HubTunnelHandle) -> Option<HubConnection> {
    let connection = registry::get(handle);
    if connection.is_none() {
        let _ = error::set_invalid_handle(handle);
    }
    connection
}

fn build(
    connector: Arc<dyn Connector>,
    owner: Owner,
    handlers: HubTunnelEventHandlers,
    context: *mut c_void,
) -> HubTunnelHandle {
    let events = NativeEvents::new(handlers, context, Arc::clone(&owner));
    let connection = HubConnection::new(connector, ConnectionConfig::default(), Arc::new(events));
    let _ = owner.set(connection.id().get());
    let handle = registry::insert(connection);
    debug!(handle, "built connection handle");
    handle
}

/// Run `operation` on the shared runtime and hand back its cancel action.
///
/// Failures to even begin complete `slot` right away and return an inert
/// action; the message is also left in the last error.
fn spawn_operation<F, Fut>(
    handle: HubTunnelHandle,
    mut slot: CompletionSlot,
    operation: F,
) -> HubTunnelAction
where
    F: FnOnce(HubConnection, CancellationToken) -> Fut,
    Fut: Future<Output = hubtunnel_conn::Result<Option<Bytes>>> + Send + 'static,
{
    let Some(connection) = lookup(handle) else {
        slot.fail(&error::last_error_message());
        return action::INERT;
    };
    let Some(runtime) = shared_runtime() else {
        slot.fail(&error::last_error_message());
        return action::INERT;
    };

    let cancel = CancellationToken::new();
    let cancel_action = action::register(handle, {
        let cancel = cancel.clone();
        move || cancel.cancel()
    });
    slot.set_cancel_token(cancel_action.token);

    let operation = operation(connection, cancel);
    runtime.spawn(async move {
        slot.complete(operation.await.map_err(|err| err.to_string()));
    });
    cancel_action
}

/// Build a connection over a named pipe.
///
/// `server_name` may be null for the local machine. Returns `0` and sets the
/// last error on failure.
///
/// # Safety
/// `pipe_name` must be a valid NUL-terminated C string; `server_name` must be
/// null or one. `handlers` must be null or readable. `context` is passed back
/// to every event callback, from any thread, until dispose completes.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_build_with_pipe(
    pipe_name: *const c_char,
    server_name: *const c_char,
    handlers: *const HubTunnelEventHandlers,
    context: *mut c_void,
) -> HubTunnelHandle {
    crate::ffi_boundary(HUBTUNNEL_INVALID_HANDLE, || {
        error::clear_error_state();

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(pipe_name) = (unsafe { required_str_arg(pipe_name, "pipe_name") }) else {
            return HUBTUNNEL_INVALID_HANDLE;
        };
        let server_name = if server_name.is_null() {
            LOCAL_SERVER
        } else {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { required_str_arg(server_name, "server_name") } {
                Some(v) => v,
                None => return HUBTUNNEL_INVALID_HANDLE,
            }
        };
        // SAFETY: Pointer validity is guaranteed by the caller.
        let handlers = unsafe { handlers_arg(handlers) };

        match NamedPipeConnector::new(pipe_name, server_name) {
            Ok(connector) => build(Arc::new(connector), Owner::default(), handlers, context),
            Err(err) => {
                let _ = error::map_transport_error(&err);
                HUBTUNNEL_INVALID_HANDLE
            }
        }
    })
}

/// Build a connection to a `tcp://`, `unix://`, `pipe://`, `ws://` or
/// `wss://` URL.
///
/// `token_provider` may be null. When set it is asked for a fresh token
/// before every websocket connect.
///
/// # Safety
/// `url` must be a valid NUL-terminated C string. `handlers` must be null or
/// readable. `context` is passed back to every callback, from any thread,
/// until dispose completes.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_build_with_url(
    url: *const c_char,
    token_provider: HubTunnelAccessTokenProvider,
    handlers: *const HubTunnelEventHandlers,
    context: *mut c_void,
) -> HubTunnelHandle {
    crate::ffi_boundary(HUBTUNNEL_INVALID_HANDLE, || {
        error::clear_error_state();

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(url) = (unsafe { required_str_arg(url, "url") }) else {
            return HUBTUNNEL_INVALID_HANDLE;
        };
        // SAFETY: Pointer validity is guaranteed by the caller.
        let handlers = unsafe { handlers_arg(handlers) };

        let mut connector = match UrlConnector::parse(url) {
            Ok(connector) => connector,
            Err(err) => {
                let _ = error::map_transport_error(&err);
                return HUBTUNNEL_INVALID_HANDLE;
            }
        };
        let owner = Owner::default();
        if let Some(callback) = token_provider {
            let provider = NativeTokenProvider::new(callback, context, Arc::clone(&owner));
            connector = connector.with_access_token_provider(Arc::new(provider));
        }
        build(Arc::new(connector), owner, handlers, context)
    })
}

/// Build a connection over an already-connected stream socket.
///
/// The descriptor is owned by the connection from here on, including when
/// this call fails. The connection can be started once; a lost socket cannot
/// be reconnected.
///
/// # Safety
/// `fd` must be an open, connected stream socket not used elsewhere.
/// `handlers` must be null or readable.
#[cfg(unix)]
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_build_with_socket_fd(
    fd: std::os::raw::c_int,
    handlers: *const HubTunnelEventHandlers,
    context: *mut c_void,
) -> HubTunnelHandle {
    use std::os::fd::FromRawFd;

    use hubtunnel_transport::{StreamConnector, TunnelStream};

    crate::ffi_boundary(HUBTUNNEL_INVALID_HANDLE, || {
        error::clear_error_state();

        if fd < 0 {
            let _ = error::set_invalid_argument("fd must be a valid descriptor");
            return HUBTUNNEL_INVALID_HANDLE;
        }
        let Some(runtime) = shared_runtime() else {
            return HUBTUNNEL_INVALID_HANDLE;
        };
        // SAFETY: Pointer validity is guaranteed by the caller.
        let handlers = unsafe { handlers_arg(handlers) };

        // SAFETY: The caller hands over ownership of an open socket.
        let socket = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
        if let Err(err) = socket.set_nonblocking(true) {
            error::set_error_message(format!("failed to configure fd {fd}: {err}"));
            return HUBTUNNEL_INVALID_HANDLE;
        }
        let _enter = runtime.enter();
        let stream = match tokio::net::UnixStream::from_std(socket) {
            Ok(stream) => stream,
            Err(err) => {
                error::set_error_message(format!("failed to register fd {fd}: {err}"));
                return HUBTUNNEL_INVALID_HANDLE;
            }
        };

        let connector = StreamConnector::new(TunnelStream::from_unix(stream, format!("fd:{fd}")));
        build(Arc::new(connector), Owner::default(), handlers, context)
    })
}

/// Dispose a connection and release every action it handed out.
///
/// `done` fires once teardown finishes. Disposing `0`, an unknown handle or
/// an already disposed one completes successfully without doing anything.
///
/// # Safety
/// `done`, when set, is called exactly once with `context`, possibly from
/// another thread.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_dispose(
    handle: HubTunnelHandle,
    done: HubTunnelCallback,
    context: *mut c_void,
) {
    crate::ffi_boundary((), || {
        error::clear_error_state();
        let slot = CompletionSlot::done(done, context);

        let Some(runtime) = shared_runtime() else {
            slot.fail(&error::last_error_message());
            return;
        };
        let Some(connection) = registry::remove(handle) else {
            debug!(handle, "dispose of unknown handle ignored");
            slot.succeed();
            return;
        };

        runtime.spawn(async move {
            let result = connection.dispose().await;
            let purged = action::purge_owner(handle);
            debug!(handle, purged, "connection handle disposed");
            slot.complete(result.map(|()| None).map_err(|err| err.to_string()));
        });
    });
}

/// Start the connection. Firing the returned action cancels the start.
///
/// # Safety
/// `done`, when set, is called exactly once with `context`, possibly from
/// another thread and possibly before this function returns.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_start(
    handle: HubTunnelHandle,
    done: HubTunnelCallback,
    context: *mut c_void,
) -> HubTunnelAction {
    crate::ffi_boundary(action::INERT, || {
        error::clear_error_state();
        spawn_operation(handle, CompletionSlot::done(done, context), |connection, cancel| {
            async move { connection.start(&cancel).await.map(|()| None) }
        })
    })
}

/// Stop the connection. Stopping a connection that is not running succeeds.
///
/// # Safety
/// Same contract as [`hubtunnel_start`].
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_stop(
    handle: HubTunnelHandle,
    done: HubTunnelCallback,
    context: *mut c_void,
) -> HubTunnelAction {
    crate::ffi_boundary(action::INERT, || {
        error::clear_error_state();
        spawn_operation(handle, CompletionSlot::done(done, context), |connection, cancel| {
            async move { connection.stop(&cancel).await.map(|()| None) }
        })
    })
}

/// Subscribe `handler` to invocations of `name` from the hub.
///
/// With `arity >= 0`, invocations carrying a different number of arguments
/// are rejected without calling `handler`. Firing the returned action
/// removes this subscription. Returns an inert action and sets the last
/// error on failure.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string. `handler` is called with
/// `context` from any thread until the subscription or the connection goes
/// away.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_on(
    handle: HubTunnelHandle,
    name: *const c_char,
    arity: i32,
    handler: HubTunnelMessageHandler,
    context: *mut c_void,
) -> HubTunnelAction {
    crate::ffi_boundary(action::INERT, || {
        error::clear_error_state();

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(name) = (unsafe { required_str_arg(name, "name") }) else {
            return action::INERT;
        };
        let Some(handler) = handler else {
            let _ = error::set_invalid_argument("handler cannot be null");
            return action::INERT;
        };
        let Some(connection) = lookup(handle) else {
            return action::INERT;
        };

        let native = NativeHandler::new(handle, name, arity, handler, context);
        match connection.on(name, Arc::new(native)) {
            Ok(subscription) => action::register_grouped(handle, name, move || {
                if let Some(connection) = registry::get(handle) {
                    let _ = connection.remove_subscription(&subscription);
                }
            }),
            Err(err) => {
                let _ = error::map_connection_error(&err);
                action::INERT
            }
        }
    })
}

/// Remove every handler registered for `name`.
///
/// Unsubscribe actions returned by `hubtunnel_on` for `name` are released
/// and firing them afterwards does nothing.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_remove(
    handle: HubTunnelHandle,
    name: *const c_char,
) -> HubTunnelResult {
    crate::ffi_boundary(HubTunnelResult::Internal, || {
        error::clear_error_state();

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(name) = (unsafe { required_str_arg(name, "name") }) else {
            return HubTunnelResult::InvalidArgument;
        };
        let Some(connection) = lookup(handle) else {
            return HubTunnelResult::InvalidHandle;
        };
        match connection.remove(name) {
            Ok(removed) => {
                let released = action::release_group(handle, name);
                debug!(handle, name, removed, released, "handlers removed");
                HubTunnelResult::Ok
            }
            Err(err) => error::map_connection_error(&err),
        }
    })
}

/// Invoke hub method `name` and deliver its result to `callback`.
///
/// `args` holds the MessagePack argument array; `len == 0` sends no
/// arguments. The bytes are copied before this returns. The result pointer
/// handed to `callback` is null for methods without a return value and is
/// only valid during the callback.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string; `args` must be readable
/// for `len` bytes. `callback`, when set, is called exactly once with
/// `context`, possibly from another thread.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_invoke(
    handle: HubTunnelHandle,
    name: *const c_char,
    args: *const u8,
    len: usize,
    callback: HubTunnelResultCallback,
    context: *mut c_void,
) -> HubTunnelAction {
    crate::ffi_boundary(action::INERT, || {
        error::clear_error_state();
        let slot = CompletionSlot::result(callback, context);

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(name) = (unsafe { required_str_arg(name, "name") }) else {
            slot.fail(&error::last_error_message());
            return action::INERT;
        };
        // SAFETY: Pointer and length are validated in helper.
        let Some(arguments) = (unsafe { bytes_arg(args, len, "args") }) else {
            slot.fail(&error::last_error_message());
            return action::INERT;
        };

        let target = name.to_string();
        let arguments = argument_blob(arguments);
        spawn_operation(handle, slot, move |connection, cancel| async move {
            connection.invoke(&target, arguments, &cancel).await
        })
    })
}

/// Invoke hub method `name` without waiting for a result.
///
/// `done` fires once the message has been written.
///
/// # Safety
/// Same contract as [`hubtunnel_invoke`].
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_send(
    handle: HubTunnelHandle,
    name: *const c_char,
    args: *const u8,
    len: usize,
    done: HubTunnelCallback,
    context: *mut c_void,
) -> HubTunnelAction {
    crate::ffi_boundary(action::INERT, || {
        error::clear_error_state();
        let slot = CompletionSlot::done(done, context);

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(name) = (unsafe { required_str_arg(name, "name") }) else {
            slot.fail(&error::last_error_message());
            return action::INERT;
        };
        // SAFETY: Pointer and length are validated in helper.
        let Some(arguments) = (unsafe { bytes_arg(args, len, "args") }) else {
            slot.fail(&error::last_error_message());
            return action::INERT;
        };

        let target = name.to_string();
        let arguments = argument_blob(arguments);
        spawn_operation(handle, slot, move |connection, cancel| async move {
            connection.send(&target, arguments, &cancel).await.map(|()| None)
        })
    })
}

fn argument_blob(arguments: &[u8]) -> Bytes {
    if arguments.is_empty() {
        Bytes::from_static(NO_ARGUMENTS)
    } else {
        Bytes::copy_from_slice(arguments)
    }
}

/// Set the reconnect delays in milliseconds, one per attempt. `count == 0`
/// disables reconnecting. Only allowed before the first start.
///
/// # Safety
/// `delays_ms` must be readable for `count` elements.
#[no_mangle]
pub unsafe extern "C" fn hubtunnel_set_reconnect_delays(
    handle: HubTunnelHandle,
    delays_ms: *const u64,
    count: usize,
) -> HubTunnelResult {
    crate::ffi_boundary(HubTunnelResult::Internal, || {
        error::clear_error_state();

        // SAFETY: Pointer and length are validated in helper.
        let Some(delays) = (unsafe { delays_arg(delays_ms, count) }) else {
            return HubTunnelResult::InvalidArgument;
        };
        let Some(connection) = lookup(handle) else {
            return HubTunnelResult::InvalidHandle;
        };
        match connection.set_reconnect_policy(ReconnectPolicy::from_millis(delays)) {
            Ok(()) => HubTunnelResult::Ok,
            Err(err) => error::map_connection_error(&err),
        }
    })
}

/// Current lifecycle state, or `-1` for an unknown handle.
///
/// 0 created, 1 starting, 2 started, 3 reconnecting, 4 stopping, 5 stopped,
/// 6 disposing, 7 disposed.
#[no_mangle]
pub extern "C" fn hubtunnel_state(handle: HubTunnelHandle) -> i32 {
    crate::ffi_boundary(-1, || {
        error::clear_error_state();
        match lookup(handle) {
            Some(connection) => connection.state() as i32,
            None => -1,
        }
    })
}
