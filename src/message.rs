//! The application-level message tuple and its canonical ID.
//!
//! Grounded on the parent protocol's `net/message.rs` enum-of-bounded-fields
//! pattern, collapsed here to the single tuple the spec defines: a message's
//! shape does not vary by command the way the parent's wire protocol does.

use crate::signing::PublicKey;
use crate::types::{MessageId, PeerId, Topic};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: PeerId,
    pub seqno: u64,
    pub data: Vec<u8>,
    pub topic: Topic,
    /// Present when `sign_messages` is enabled for the publishing node.
    pub signature: Option<Vec<u8>>,
    /// Embedded public key, for peers we have not already bound a key to.
    pub key: Option<PublicKey>,
}

/// A per-topic function mapping a message to its ID. The default is
/// `from || seqno`; topics may register a different one (e.g. hash-of-data,
/// for idempotent publication from multiple seqno sequences).
pub type MessageIdFn = dyn Fn(&Message) -> MessageId + Send + Sync;

pub fn default_message_id(message: &Message) -> MessageId {
    let mut bytes = Vec::with_capacity(message.from.0.len() + 8);
    bytes.extend_from_slice(&message.from.0);
    bytes.extend_from_slice(&message.seqno.to_be_bytes());
    MessageId(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &[u8], seqno: u64) -> Message {
        Message {
            from: PeerId(from.to_vec()),
            seqno,
            data: vec![],
            topic: Topic::new("t"),
            signature: None,
            key: None,
        }
    }

    #[test]
    fn same_from_and_seqno_yields_same_id() {
        let a = default_message_id(&msg(b"peer-a", 1));
        let b = default_message_id(&msg(b"peer-a", 1));
        assert_eq!(a, b);
    }

    #[test]
    fn different_seqno_yields_different_id() {
        let a = default_message_id(&msg(b"peer-a", 1));
        let b = default_message_id(&msg(b"peer-a", 2));
        assert_ne!(a, b);
    }

    #[test]
    fn different_sender_yields_different_id() {
        let a = default_message_id(&msg(b"peer-a", 1));
        let b = default_message_id(&msg(b"peer-b", 1));
        assert_ne!(a, b);
    }
}
