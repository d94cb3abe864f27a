//! Handshake signals and their relay envelopes
//!
//! A local handshake object emits opaque JSON signals. Session descriptions
//! carry `"type": "offer"` or `"type": "answer"`; connectivity candidates
//! have no `type` and carry a `candidate` field instead.

use serde_json::{json, Value};

use rendezvous_core::{ClientMessage, EndpointId};

/// One handshake signal exchanged with a remote endpoint
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    Offer(Value),
    Answer(Value),
    /// The candidate object itself (the inner `candidate` value)
    Candidate(Value),
}

impl Signal {
    /// Infer the signal kind from its shape
    pub fn classify(value: Value) -> Option<Self> {
        match value.get("type").and_then(Value::as_str) {
            Some("offer") => return Some(Signal::Offer(value)),
            Some("answer") => return Some(Signal::Answer(value)),
            Some(_) => return None,
            None => {}
        }

        value.get("candidate").cloned().map(Signal::Candidate)
    }

    /// The relay message carrying this signal to `to`
    pub fn into_message(self, to: EndpointId) -> ClientMessage {
        match self {
            Signal::Offer(signal) => ClientMessage::Offer { to, signal },
            Signal::Answer(signal) => ClientMessage::Answer { to, signal },
            Signal::Candidate(candidate) => ClientMessage::IceCandidate { to, candidate },
        }
    }

    /// The shape the local handshake object expects for this signal
    pub fn to_value(&self) -> Value {
        match self {
            Signal::Offer(v) | Signal::Answer(v) => v.clone(),
            Signal::Candidate(candidate) => json!({ "candidate": candidate }),
        }
    }

    pub fn is_offer(&self) -> bool {
        matches!(self, Signal::Offer(_))
    }
}
