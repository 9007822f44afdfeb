//! Realtime channels: the STOMP chat transport and the service-update
//! event stream, plus the connection state machine they share.

pub mod connection;
pub mod events;
pub mod sse;
pub mod stomp;
pub mod transport;

use std::sync::{Mutex, MutexGuard};

pub use connection::{ConnectionState, RetryPolicy};
pub use events::{ChatEvent, RoomTopic};
pub use sse::{EventStreamClient, UpdateFeed, UpdateListener};
pub use transport::{ChatTransport, StompTransport, Subscription, TransportError};

/// Lock shared realtime state. A poisoned lock still holds consistent
/// plain data, so recover it instead of cascading the panic.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
