use std::ffi::c_void;
use std::os::raw::c_char;

/// Opaque connection handle. `0` means "no connection".
pub type HubTunnelHandle = u64;

pub const HUBTUNNEL_INVALID_HANDLE: HubTunnelHandle = 0;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubTunnelResult {
    Ok = 0,
    InvalidArgument = 1,
    InvalidHandle = 2,
    InvalidState = 3,
    Disposed = 4,
    TransportError = 5,
    Canceled = 6,
    Internal = 99,
}

/// One-shot action handed to native code.
///
/// Call `invoke(token)` at most once; later calls are ignored, as are calls
/// for a token whose operation already finished. A zero token is inert.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubTunnelAction {
    pub invoke: Option<extern "C" fn(token: u64)>,
    pub token: u64,
}

/// One-shot sink for an access token.
///
/// Call `invoke(token, access_token)` exactly once. A null `access_token`
/// connects without authentication.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubTunnelTokenSink {
    pub invoke: Option<unsafe extern "C" fn(token: u64, access_token: *const c_char)>,
    pub token: u64,
}

/// Completion of start, stop, send and dispose. `error` is null on success.
pub type HubTunnelCallback = Option<unsafe extern "C" fn(context: *mut c_void, error: *const c_char)>;

/// Completion of invoke. `result` holds the raw MessagePack return value;
/// it is null with `len == 0` for methods without one.
pub type HubTunnelResultCallback = Option<
    unsafe extern "C" fn(context: *mut c_void, error: *const c_char, result: *const u8, len: usize),
>;

/// Receives the MessagePack argument array of one hub invocation.
pub type HubTunnelMessageHandler = Option<
    unsafe extern "C" fn(context: *mut c_void, args: *const u8, len: usize, ack: HubTunnelAction),
>;

pub type HubTunnelErrorEvent =
    Option<unsafe extern "C" fn(context: *mut c_void, error: *const c_char, ack: HubTunnelAction)>;

pub type HubTunnelEvent = Option<unsafe extern "C" fn(context: *mut c_void, ack: HubTunnelAction)>;

pub type HubTunnelAccessTokenProvider =
    Option<unsafe extern "C" fn(context: *mut c_void, sink: HubTunnelTokenSink)>;

/// Lifecycle event callbacks. Any of them may be null.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HubTunnelEventHandlers {
    pub closed: HubTunnelErrorEvent,
    pub reconnecting: HubTunnelErrorEvent,
    pub reconnected: HubTunnelEvent,
}

/// Caller-owned context pointer, passed back untouched to every callback.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NativeContext(pub(crate) *mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side; the caller
// promises it may be used from any thread.
unsafe impl Send for NativeContext {}
// SAFETY: see above.
unsafe impl Sync for NativeContext {}

impl NativeContext {
    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}
