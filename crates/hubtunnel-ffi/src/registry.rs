//! Handle → connection table.
//!
//! The table holds the only reference native code can reach a connection
//! through. Removing the entry is what makes a handle dead, so it happens
//! exactly once, in dispose or cleanup.

use std::collections::HashMap;
use std::sync::LazyLock;

use hubtunnel_conn::HubConnection;
use parking_lot::Mutex;

use crate::types::HubTunnelHandle;

static CONNECTIONS: LazyLock<Mutex<HashMap<HubTunnelHandle, HubConnection>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register `connection`; its id becomes the handle.
pub(crate) fn insert(connection: HubConnection) -> HubTunnelHandle {
    let handle = connection.id().get();
    CONNECTIONS.lock().insert(handle, connection);
    handle
}

pub(crate) fn get(handle: HubTunnelHandle) -> Option<HubConnection> {
    CONNECTIONS.lock().get(&handle).cloned()
}

pub(crate) fn remove(handle: HubTunnelHandle) -> Option<HubConnection> {
    CONNECTIONS.lock().remove(&handle)
}

pub(crate) fn drain() -> Vec<HubConnection> {
    CONNECTIONS.lock().drain().map(|(_, connection)| connection).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hubtunnel_conn::{ConnectionConfig, NoEvents};
    use hubtunnel_transport::{StreamConnector, TunnelStream};

    use super::*;

    #[tokio::test]
    async fn handles_are_removed_once() {
        let (client, _server) = TunnelStream::pair(1024);
        let connection = HubConnection::new(
            Arc::new(StreamConnector::new(client)),
            ConnectionConfig::default(),
            Arc::new(NoEvents),
        );
        let handle = insert(connection.clone());
        assert_eq!(handle, connection.id().get());
        assert!(get(handle).is_some());

        assert!(remove(handle).is_some());
        assert!(remove(handle).is_none());
        assert!(get(handle).is_none());
    }
}
