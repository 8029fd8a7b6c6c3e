//! Handler tag framing for gossip and request payloads.
//!
//! ```text
//! [handler payload: N bytes][handler id: 1 byte]
//! ```
//!
//! Responses and failures carry no tag; their handler is recovered from the
//! request-id virtualizer instead.

use super::HandlerId;

/// Append the sending handler's tag byte to an outbound payload.
pub fn append_handler_tag(mut payload: Vec<u8>, handler: HandlerId) -> Vec<u8> {
    payload.push(handler.tag());
    payload
}

/// Strip the trailing tag byte from an inbound payload, returning the
/// destination handler and the untagged bytes. Returns `None` for an empty
/// payload.
pub fn strip_handler_tag(mut msg: Vec<u8>) -> Option<(HandlerId, Vec<u8>)> {
    let tag = msg.pop()?;
    Some((HandlerId::new(tag), msg))
}
