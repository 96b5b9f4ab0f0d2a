//! Realtime connection bookkeeping.
//!
//! The realtime channel registers each client with a `ConnectionTracker`.
//! Health checks read the count through `ConnectionRegistry`; the tracker
//! also keeps the realtime connections gauge in step.

use common::error::HubError;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

use crate::observability::registry::GaugeHandle;

/// Read access to the number of connected realtime clients.
pub trait ConnectionRegistry: Send + Sync {
    /// # Errors
    ///
    /// Returns `HubError::Realtime` if the connection table cannot be read.
    fn connected_clients(&self) -> Result<usize, HubError>;
}

#[derive(Debug, Default)]
pub struct ConnectionTracker {
    clients: Mutex<HashSet<Uuid>>,
    gauge: Option<GaugeHandle>,
}

impl ConnectionTracker {
    pub fn new(gauge: Option<GaugeHandle>) -> Self {
        Self {
            clients: Mutex::new(HashSet::new()),
            gauge,
        }
    }

    /// Register a new client and return its connection id.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Realtime` if the connection table is poisoned.
    pub fn connect(&self) -> Result<Uuid, HubError> {
        let id = Uuid::new_v4();
        let count = {
            let mut clients = self.clients.lock().map_err(|_| poisoned())?;
            clients.insert(id);
            clients.len()
        };
        self.publish(count);
        Ok(id)
    }

    /// Remove a client. Returns whether it was registered.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Realtime` if the connection table is poisoned.
    pub fn disconnect(&self, id: &Uuid) -> Result<bool, HubError> {
        let (removed, count) = {
            let mut clients = self.clients.lock().map_err(|_| poisoned())?;
            (clients.remove(id), clients.len())
        };
        self.publish(count);
        Ok(removed)
    }

    fn publish(&self, count: usize) {
        if let Some(gauge) = &self.gauge {
            #[allow(clippy::cast_precision_loss)]
            gauge.set(&[], count as f64);
        }
    }
}

fn poisoned() -> HubError {
    HubError::Realtime("connection table unavailable".to_string())
}

impl ConnectionRegistry for ConnectionTracker {
    fn connected_clients(&self) -> Result<usize, HubError> {
        self.clients
            .lock()
            .map(|clients| clients.len())
            .map_err(|_| poisoned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::observability::registry::MetricRegistry;
    use std::sync::Arc;

    #[test]
    fn test_connect_and_disconnect_track_count() {
        let registry = MetricRegistry::new();
        let gauge = registry
            .register_gauge("hub_realtime_connections", "Clients", &[])
            .unwrap();
        let tracker = ConnectionTracker::new(Some(gauge));

        let a = tracker.connect().unwrap();
        let _b = tracker.connect().unwrap();
        assert_eq!(tracker.connected_clients().unwrap(), 2);

        assert!(tracker.disconnect(&a).unwrap());
        assert!(!tracker.disconnect(&a).unwrap());
        assert_eq!(tracker.connected_clients().unwrap(), 1);

        let snapshot = registry.export_json().unwrap();
        assert_eq!(snapshot.value("hub_realtime_connections", &[]), Some(1.0));
    }

    #[test]
    fn test_poisoned_table_reports_error() {
        let tracker = Arc::new(ConnectionTracker::new(None));
        let poisoner = Arc::clone(&tracker);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.clients.lock().unwrap();
            panic!("poison the connection table");
        })
        .join();

        assert!(matches!(
            tracker.connected_clients(),
            Err(HubError::Realtime(_))
        ));
    }
}
