//! Event dispatch between connections and the two stores.

mod events;
mod hub;
mod ws;

use std::{num::NonZeroUsize, sync::Arc};

use axum::{Router, routing::get};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    AppState,
    conversations::{ConversationStore, Delivery, Message},
    error::{RelayError, RelayResult},
    presence::{ConnectionRef, PresenceDirectory, UserIdentity, UserSummary},
};

pub use events::{ClientEvent, ServerEvent};
pub use hub::Outbox;

use hub::Hub;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws::relay_ws))
}

/// Shared handle to the relay. Cloning is cheap; every clone sees the same stores.
///
/// Locks are always taken in the order presence, conversations, hub.
#[derive(Clone, Default)]
pub struct Relay {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    presence: Mutex<PresenceDirectory>,
    conversations: Mutex<ConversationStore>,
    hub: Mutex<Hub>,
}

impl Relay {
    pub fn new(history_limit: Option<NonZeroUsize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                presence: Mutex::new(PresenceDirectory::new()),
                conversations: Mutex::new(ConversationStore::new(history_limit)),
                hub: Mutex::new(Hub::default()),
            }),
        }
    }

    pub async fn connect(&self) -> (ConnectionRef, Outbox) {
        let conn = ConnectionRef::new();
        let outbox = self.inner.hub.lock().await.attach(conn);
        info!(%conn, "new connection");
        (conn, outbox)
    }

    pub async fn disconnect(&self, conn: ConnectionRef) {
        let user_id = self.inner.presence.lock().await.mark_disconnected(conn);
        self.inner.hub.lock().await.detach(conn);
        match user_id {
            Some(user_id) => info!(%conn, %user_id, "user disconnected"),
            None => debug!(%conn, "unregistered connection closed"),
        }
    }

    /// Decodes one text frame and handles it.
    pub async fn handle_frame(&self, conn: ConnectionRef, frame: &str) {
        let value = match serde_json::from_str::<serde_json::Value>(frame) {
            Ok(value) => value,
            Err(err) => return self.reject(conn, "", err.into()).await,
        };
        let name = value
            .get("event")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned();

        match serde_json::from_value::<ClientEvent>(value) {
            Ok(event) => self.handle(conn, event).await,
            Err(err) => self.reject(conn, &name, err.into()).await,
        }
    }

    /// Handles one event, answering the caller with an `error` event if it is rejected.
    pub async fn handle(&self, conn: ConnectionRef, event: ClientEvent) {
        let name = event.name();
        if let Err(err) = self.dispatch(conn, event).await {
            self.reject(conn, name, err).await;
        }
    }

    pub async fn dispatch(&self, conn: ConnectionRef, event: ClientEvent) -> RelayResult<()> {
        use ClientEvent::*;
        match event {
            Register { user_id, username } => {
                self.register(conn, &user_id, &username).await?;
            }
            GetUsers => {
                let users = self.list_users().await;
                self.emit(conn, ServerEvent::UserList(users)).await;
            }
            SendMessage { from, to, text } => {
                self.send_message(conn, &from, &to, &text).await?;
            }
            GetMessages { user_id, other_user_id } => {
                let history = self.history(&user_id, &other_user_id).await?;
                self.emit(conn, ServerEvent::MessageHistory(history)).await;
            }
        }
        Ok(())
    }

    /// Binds `user_id` to `conn`, confirms to the caller, tells a superseded connection
    /// it lost the identity, and broadcasts the updated directory.
    pub async fn register(
        &self,
        conn: ConnectionRef,
        user_id: &str,
        username: &str,
    ) -> RelayResult<UserIdentity> {
        let mut presence = self.inner.presence.lock().await;
        let registration = presence.register(user_id, username, conn)?;
        let identities = presence.identities();

        let hub = self.inner.hub.lock().await;
        hub.emit(
            conn,
            ServerEvent::Registered {
                user_id: registration.identity.user_id.clone(),
                username: registration.identity.username.clone(),
            },
        );
        if let Some(old_conn) = registration.superseded {
            info!(%user_id, %old_conn, new_conn = %conn, "registration superseded");
            hub.emit(old_conn, ServerEvent::Superseded { user_id: user_id.to_owned() });
        }
        if let Some(displaced) = &registration.displaced {
            debug!(%conn, %displaced, "connection switched identity");
        }
        hub.broadcast(&ServerEvent::UserUpdate(identities));

        info!(%conn, %user_id, %username, "user registered");
        Ok(registration.identity)
    }

    pub async fn list_users(&self) -> Vec<UserSummary> {
        self.inner.presence.lock().await.list_users()
    }

    /// Stores the message, pushes it to the recipient if they're online, and confirms to the sender.
    pub async fn send_message(
        &self,
        conn: ConnectionRef,
        from: &str,
        to: &str,
        text: &str,
    ) -> RelayResult<Delivery> {
        let presence = self.inner.presence.lock().await;
        let message = self
            .inner
            .conversations
            .lock()
            .await
            .append(Message::new(from, to, text))?;
        let recipient = presence.connection(to);

        let hub = self.inner.hub.lock().await;
        if let Some(recipient) = recipient {
            hub.emit(recipient, ServerEvent::NewMessage(message.clone()));
        }
        hub.emit(conn, ServerEvent::MessageSent(message.clone()));

        debug!(%from, %to, delivered = recipient.is_some(), "message stored");
        Ok(Delivery { message, recipient })
    }

    pub async fn history(&self, user_id: &str, other_user_id: &str) -> RelayResult<Vec<Message>> {
        self.inner
            .conversations
            .lock()
            .await
            .history(user_id, other_user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.hub.lock().await.len()
    }

    async fn emit(&self, conn: ConnectionRef, event: ServerEvent) {
        self.inner.hub.lock().await.emit(conn, event);
    }

    async fn reject(&self, conn: ConnectionRef, event: &str, err: RelayError) {
        warn!(%conn, event, %err, "rejected event");
        self.emit(
            conn,
            ServerEvent::Error {
                event: event.to_owned(),
                kind: err.kind().to_owned(),
                message: err.to_string(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Presence;

    fn drain(outbox: &mut Outbox) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = outbox.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn register_confirms_and_broadcasts() {
        let relay = Relay::default();
        let (alice, mut alice_rx) = relay.connect().await;
        let (_watcher, mut watcher_rx) = relay.connect().await;

        relay.register(alice, "u1", "Alice").await.unwrap();

        let events = drain(&mut alice_rx);
        assert!(matches!(
            &events[..],
            [ServerEvent::Registered { user_id, .. }, ServerEvent::UserUpdate(users)]
                if user_id == "u1" && users.len() == 1
        ));
        assert!(matches!(&drain(&mut watcher_rx)[..], [ServerEvent::UserUpdate(_)]));
    }

    #[tokio::test]
    async fn second_registration_supersedes_first_connection() {
        let relay = Relay::default();
        let (conn_a, mut rx_a) = relay.connect().await;
        let (conn_b, _rx_b) = relay.connect().await;

        relay.register(conn_a, "u1", "Alice").await.unwrap();
        drain(&mut rx_a);
        let identity = relay.register(conn_b, "u1", "Alice2").await.unwrap();

        assert_eq!(identity.presence, Presence::Online(conn_b));
        assert!(matches!(
            &drain(&mut rx_a)[..],
            [ServerEvent::Superseded { user_id }, ServerEvent::UserUpdate(_)] if user_id == "u1"
        ));

        let users = relay.list_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "Alice2");
    }

    #[tokio::test]
    async fn delivery_to_online_recipient() {
        let relay = Relay::default();
        let (alice, mut alice_rx) = relay.connect().await;
        let (bob, mut bob_rx) = relay.connect().await;
        relay.register(alice, "u1", "Alice").await.unwrap();
        relay.register(bob, "u2", "Bob").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let delivery = relay.send_message(alice, "u1", "u2", "hi").await.unwrap();

        assert_eq!(delivery.recipient, Some(bob));
        assert!(matches!(&drain(&mut bob_rx)[..], [ServerEvent::NewMessage(m)] if m.text == "hi"));
        assert!(matches!(&drain(&mut alice_rx)[..], [ServerEvent::MessageSent(m)] if m.text == "hi"));
    }

    #[tokio::test]
    async fn unregistered_recipient_only_gets_history() {
        let relay = Relay::default();
        let (alice, mut alice_rx) = relay.connect().await;
        relay.register(alice, "u1", "Alice").await.unwrap();
        drain(&mut alice_rx);

        let delivery = relay.send_message(alice, "u1", "ghost", "anyone?").await.unwrap();

        assert!(delivery.recipient.is_none());
        assert!(matches!(&drain(&mut alice_rx)[..], [ServerEvent::MessageSent(_)]));
        assert_eq!(relay.history("ghost", "u1").await.unwrap(), vec![delivery.message]);
    }

    #[tokio::test]
    async fn disconnected_recipient_is_not_routed_to() {
        let relay = Relay::default();
        let (alice, _alice_rx) = relay.connect().await;
        let (bob, _bob_rx) = relay.connect().await;
        relay.register(alice, "u1", "Alice").await.unwrap();
        relay.register(bob, "u2", "Bob").await.unwrap();

        relay.disconnect(bob).await;
        let delivery = relay.send_message(alice, "u1", "u2", "still there?").await.unwrap();

        assert!(delivery.recipient.is_none());
        assert_eq!(relay.connection_count().await, 1);
        assert_eq!(relay.history("u2", "u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_events_answer_with_error_and_change_nothing() {
        let relay = Relay::default();
        let (conn, mut rx) = relay.connect().await;

        relay
            .handle(
                conn,
                ClientEvent::SendMessage {
                    from: "u1".into(),
                    to: String::new(),
                    text: "hi".into(),
                },
            )
            .await;

        assert!(matches!(
            &drain(&mut rx)[..],
            [ServerEvent::Error { event, kind, .. }] if event == "sendMessage" && kind == "invalidIdentifier"
        ));
        assert!(relay.history("u1", "x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_frames_are_reported() {
        let relay = Relay::default();
        let (conn, mut rx) = relay.connect().await;

        relay.handle_frame(conn, "not json").await;
        relay.handle_frame(conn, r#"{"event":"typing","data":{}}"#).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ServerEvent::Error { event, kind, .. } if event == "typing" && kind == "malformed"));
    }
}
