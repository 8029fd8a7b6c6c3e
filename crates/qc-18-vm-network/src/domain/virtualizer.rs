//! Request-id virtualization.
//!
//! The host transport offers a single request-id numberspace per peer, but
//! every handler picks its own request ids (usually starting at 0). Each
//! outbound request is therefore re-issued under a virtual id that is unique
//! for its [`RequesterKey`], and the virtual id is mapped back to the
//! issuing handler and its original id when the response or failure arrives.
//!
//! ```text
//! handler A: req 7 ──┐                        ┌── resolve(X, 0) → (A, 7)
//!                    ├─ allocate → X: 0, 1 ───┤
//! handler B: req 7 ──┘                        └── resolve(X, 1) → (B, 7)
//! ```
//!
//! The per-key counter wraps around. Allocation skips ids that are still
//! outstanding and is refused once a key has `max_pending` outstanding ids,
//! so an id is never handed out twice while in flight.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::{HandlerId, RequestId, RequesterKey};
use crate::events::NetworkError;

/// Table capacity an idle key may keep without being shrunk.
const RETAINED_CAPACITY: usize = 16;

/// Origin of an outstanding virtual request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    /// Handler that issued the request.
    pub handler: HandlerId,
    /// Request id the handler chose.
    pub request_id: RequestId,
}

/// Virtual-id bookkeeping for a single requester key.
#[derive(Debug, Default)]
pub struct PeerRequestState {
    next_request_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
}

impl PeerRequestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `pending` under a fresh virtual id.
    pub fn allocate(
        &mut self,
        pending: PendingRequest,
        max_pending: usize,
    ) -> Result<RequestId, NetworkError> {
        // The cap is validated below 2^32, so a free id always exists.
        if self.pending.len() >= max_pending {
            return Err(NetworkError::RequestIdsExhausted {
                pending: self.pending.len(),
                max: max_pending,
            });
        }
        loop {
            let id = self.next_request_id;
            self.next_request_id = self.next_request_id.wrapping_add(1);
            if let Entry::Vacant(slot) = self.pending.entry(id) {
                slot.insert(pending);
                return Ok(id);
            }
        }
    }

    /// Consume the mapping for `virtual_id`.
    ///
    /// Once the last outstanding id drains, the table gives back whatever
    /// capacity a burst grew it to; only the counter stays behind.
    pub fn resolve(&mut self, virtual_id: RequestId) -> Option<PendingRequest> {
        let resolved = self.pending.remove(&virtual_id)?;
        if self.pending.is_empty() && self.pending.capacity() > RETAINED_CAPACITY {
            self.pending.shrink_to_fit();
        }
        Some(resolved)
    }

    /// Number of outstanding virtual ids.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next id the counter will try.
    pub fn next_request_id(&self) -> RequestId {
        self.next_request_id
    }
}

/// Virtual-id tables for every requester key.
///
/// Per-key state is kept for the process lifetime so counters never restart
/// at 0 for a peer that still may deliver late responses. An idle key costs
/// its counter plus a table of at most `RETAINED_CAPACITY` slots.
#[derive(Debug)]
pub struct RequestIdVirtualizer {
    requesters: HashMap<RequesterKey, PeerRequestState>,
    max_pending: usize,
}

impl RequestIdVirtualizer {
    /// Create a virtualizer allowing `max_pending` outstanding ids per key.
    pub fn new(max_pending: usize) -> Self {
        Self {
            requesters: HashMap::new(),
            max_pending: max_pending.clamp(1, RequestId::MAX as usize),
        }
    }

    /// Mint a virtual id for a request issued by `handler` to `key`.
    pub fn allocate(
        &mut self,
        key: RequesterKey,
        handler: HandlerId,
        request_id: RequestId,
    ) -> Result<RequestId, NetworkError> {
        let max_pending = self.max_pending;
        self.requesters
            .entry(key)
            .or_default()
            .allocate(PendingRequest { handler, request_id }, max_pending)
    }

    /// Resolve and remove the mapping for `virtual_id`.
    ///
    /// Single-use: a second call for the same id returns `None`.
    pub fn resolve(&mut self, key: RequesterKey, virtual_id: RequestId) -> Option<PendingRequest> {
        self.requesters.get_mut(&key)?.resolve(virtual_id)
    }

    /// Outstanding virtual ids for `key`.
    pub fn pending_for(&self, key: &RequesterKey) -> usize {
        self.requesters.get(key).map_or(0, PeerRequestState::pending_len)
    }

    /// Outstanding virtual ids across all keys.
    pub fn pending_total(&self) -> usize {
        self.requesters.values().map(PeerRequestState::pending_len).sum()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}
