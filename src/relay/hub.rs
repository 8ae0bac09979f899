use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::presence::ConnectionRef;

use super::events::ServerEvent;

/// Events queued per connection before new ones are dropped for it.
pub const OUTBOX_CAPACITY: usize = 256;

pub type Outbox = mpsc::Receiver<ServerEvent>;

/// Outbound queues for every open connection.
#[derive(Debug, Default)]
pub(crate) struct Hub {
    connections: HashMap<ConnectionRef, mpsc::Sender<ServerEvent>>,
}

impl Hub {
    pub(crate) fn attach(&mut self, conn: ConnectionRef) -> Outbox {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.connections.insert(conn, tx);
        rx
    }

    pub(crate) fn detach(&mut self, conn: ConnectionRef) -> bool {
        self.connections.remove(&conn).is_some()
    }

    /// Best-effort: an unknown, closed or backed-up connection just doesn't get it.
    pub(crate) fn emit(&self, conn: ConnectionRef, event: ServerEvent) -> bool {
        match self.connections.get(&conn) {
            Some(tx) => deliver(conn, tx, event),
            None => false,
        }
    }

    pub(crate) fn broadcast(&self, event: &ServerEvent) {
        for (conn, tx) in &self.connections {
            deliver(*conn, tx, event.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }
}

fn deliver(conn: ConnectionRef, tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(%conn, "outbox full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
