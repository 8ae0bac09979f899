//! Per-pair chat history.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    num::NonZeroUsize,
};

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    error::{RelayResult, require_id},
    presence::{ConnectionRef, UserId},
};

const KEY_SEPARATOR: char = '_';

/// Order-independent key shared by both participants of a conversation.
///
/// Holds the sorted pair rather than the joined string, so ids that contain the separator
/// cannot collide (`a_b`+`c` vs `a`+`b_c`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKey {
    lo: UserId,
    hi: UserId,
}

impl ChatKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self {
            lo: lo.to_owned(),
            hi: hi.to_owned(),
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.lo, self.hi)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub from: UserId,
    pub to: UserId,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    // nothing marks messages as read yet
    pub read: bool,
}

impl Message {
    pub fn new(from: &str, to: &str, text: &str) -> Self {
        Self {
            from: from.to_owned(),
            to: to.to_owned(),
            text: text.to_owned(),
            timestamp: OffsetDateTime::now_utc(),
            read: false,
        }
    }

    pub fn chat_key(&self) -> ChatKey {
        ChatKey::new(&self.from, &self.to)
    }
}

/// A stored message plus the live connection it should be pushed to, if the recipient is online.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub recipient: Option<ConnectionRef>,
}

/// Append-only history for every pair that has exchanged messages.
///
/// Without a `history_limit` nothing is ever evicted, so memory grows with traffic for the
/// lifetime of the process. With one, each conversation keeps only its newest messages.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ChatKey, VecDeque<Message>>,
    history_limit: Option<NonZeroUsize>,
}

impl ConversationStore {
    pub fn new(history_limit: Option<NonZeroUsize>) -> Self {
        Self {
            conversations: HashMap::new(),
            history_limit,
        }
    }

    pub fn append(&mut self, message: Message) -> RelayResult<Message> {
        require_id("from", &message.from)?;
        require_id("to", &message.to)?;

        let history = self.conversations.entry(message.chat_key()).or_default();
        history.push_back(message.clone());
        if let Some(limit) = self.history_limit {
            while history.len() > limit.get() {
                history.pop_front();
            }
        }

        Ok(message)
    }

    pub fn history(&self, user_id: &str, other_user_id: &str) -> RelayResult<Vec<Message>> {
        require_id("userId", user_id)?;
        require_id("otherUserId", other_user_id)?;

        Ok(self
            .conversations
            .get(&ChatKey::new(user_id, other_user_id))
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    fn texts(history: &[Message]) -> Vec<&str> {
        history.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn chat_key_is_commutative() {
        for (a, b) in [("u1", "u2"), ("bob", "alice"), ("same", "same"), ("a_b", "a")] {
            assert_eq!(ChatKey::new(a, b), ChatKey::new(b, a));
        }
        assert_eq!(ChatKey::new("u2", "u1").to_string(), "u1_u2");
    }

    #[test]
    fn separator_in_ids_does_not_merge_conversations() {
        let mut store = ConversationStore::default();
        store.append(Message::new("a_b", "c", "first pair")).unwrap();
        store.append(Message::new("a", "b_c", "second pair")).unwrap();

        assert_eq!(store.conversation_count(), 2);
        assert_eq!(texts(&store.history("c", "a_b").unwrap()), ["first pair"]);
    }

    #[test]
    fn history_keeps_send_order_in_both_directions() {
        let mut store = ConversationStore::default();
        store.append(Message::new("u1", "u2", "one")).unwrap();
        store.append(Message::new("u2", "u1", "two")).unwrap();
        store.append(Message::new("u1", "u2", "three")).unwrap();

        let forward = store.history("u1", "u2").unwrap();
        assert_eq!(texts(&forward), ["one", "two", "three"]);
        assert_eq!(forward, store.history("u2", "u1").unwrap());
        assert_eq!(store.conversation_count(), 1);
    }

    #[test]
    fn unknown_pair_has_empty_history() {
        let store = ConversationStore::default();
        assert!(store.history("x", "y").unwrap().is_empty());
    }

    #[test]
    fn new_messages_are_unread_and_empty_text_is_allowed() {
        let mut store = ConversationStore::default();
        let stored = store.append(Message::new("u1", "u2", "")).unwrap();
        assert!(!stored.read);
        assert_eq!(stored.text, "");
    }

    #[test]
    fn history_limit_evicts_oldest() {
        let mut store = ConversationStore::new(NonZeroUsize::new(2));
        for text in ["a", "b", "c"] {
            store.append(Message::new("u1", "u2", text)).unwrap();
        }
        assert_eq!(texts(&store.history("u1", "u2").unwrap()), ["b", "c"]);
    }

    #[test]
    fn rejects_empty_identifiers() {
        let mut store = ConversationStore::default();
        assert!(matches!(
            store.append(Message::new("u1", "", "hi")),
            Err(RelayError::InvalidIdentifier { field: "to" })
        ));
        assert!(matches!(
            store.history("", "u2"),
            Err(RelayError::InvalidIdentifier { field: "userId" })
        ));
        assert_eq!(store.conversation_count(), 0);
    }

    #[test]
    fn message_wire_shape() {
        let json = serde_json::to_value(Message::new("u1", "u2", "hi")).unwrap();
        assert_eq!(json["from"], "u1");
        assert_eq!(json["to"], "u2");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["read"], false);
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(OffsetDateTime::parse(timestamp, &time::format_description::well_known::Rfc3339).is_ok());
    }
}
