use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use relay_core::ids::{ConnectionId, Identity};

/// A client connection currently being relayed.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub identity: Identity,
    pub room: String,
    pub connected_at: DateTime<Utc>,
}

/// Registry of live relay connections, used for health reporting.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. It stays registered until the guard drops.
    pub fn register(self: &Arc<Self>, id: ConnectionId, identity: Identity, room: &str) -> ConnectionGuard {
        let info = ConnectionInfo {
            id: id.clone(),
            identity,
            room: room.to_string(),
            connected_at: Utc::now(),
        };
        self.connections.insert(id.clone(), info);
        ConnectionGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    fn unregister(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let (_, info) = self.connections.remove(id)?;
        tracing::info!(
            connection_id = %id,
            identity = %info.identity,
            room = %info.room,
            duration_secs = (Utc::now() - info.connected_at).num_seconds(),
            "connection unregistered"
        );
        Some(info)
    }
}

/// Removes its connection from the registry on drop.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.registry.unregister(&self.id);
    }
}
