use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use hubtunnel_conn::ConnectionError;
use hubtunnel_transport::TransportError;

use crate::types::HubTunnelResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

/// Convert a message to a C string, replacing interior NULs.
pub(crate) fn to_c_string(message: &str) -> CString {
    CString::new(message.replace('\0', "?")).unwrap_or_default()
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = to_c_string(&message.into());
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = message;
    });
}

pub(crate) fn last_error_message() -> String {
    LAST_ERROR.with(|state| state.borrow().to_string_lossy().into_owned())
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> HubTunnelResult {
    set_error_message(message);
    HubTunnelResult::InvalidArgument
}

pub(crate) fn set_invalid_handle(handle: u64) -> HubTunnelResult {
    set_error_message(format!("unknown connection handle {handle}"));
    HubTunnelResult::InvalidHandle
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_connection_error(err: &ConnectionError) -> HubTunnelResult {
    set_error_message(err.to_string());
    match err {
        ConnectionError::InvalidState { .. } => HubTunnelResult::InvalidState,
        ConnectionError::Disposed => HubTunnelResult::Disposed,
        ConnectionError::Transport(_) => HubTunnelResult::TransportError,
        ConnectionError::Canceled => HubTunnelResult::Canceled,
        _ => HubTunnelResult::Internal,
    }
}

pub(crate) fn map_transport_error(err: &TransportError) -> HubTunnelResult {
    set_error_message(err.to_string());
    match err {
        TransportError::Url { .. } | TransportError::PathTooLong { .. } => {
            HubTunnelResult::InvalidArgument
        }
        _ => HubTunnelResult::TransportError,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_nul_is_replaced() {
        assert_eq!(to_c_string("a\0b").to_str().unwrap(), "a?b");
    }

    #[test]
    fn mapping_sets_message() {
        clear_error_state();
        assert_eq!(
            map_connection_error(&ConnectionError::Disposed),
            HubTunnelResult::Disposed
        );
        assert_eq!(last_error_message(), "connection has been disposed");
        clear_error_state();
        assert_eq!(last_error_message(), "");
    }
}
