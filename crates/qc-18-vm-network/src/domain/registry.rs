//! Handler registry: id minting, pending set and handler table.

use std::collections::{BTreeMap, BTreeSet};

use super::HandlerId;
use crate::events::NetworkError;

/// Registry of network handlers.
///
/// Ids are handed out by [`reserve`](Self::reserve) before an implementation
/// exists and stay in the pending set until [`bind`](Self::bind) moves them
/// into the handler table. An id is never reused.
///
/// Generic over the handler type so the bookkeeping stays free of I/O.
#[derive(Debug)]
pub struct HandlerRegistry<H> {
    /// Next id to mint. Wider than `u8` so exhaustion is observable.
    next_id: u16,
    /// Maximum number of ids this registry will mint.
    capacity: usize,
    pending: BTreeSet<HandlerId>,
    handlers: BTreeMap<HandlerId, H>,
}

impl<H> HandlerRegistry<H> {
    /// Create a registry that mints at most `capacity` ids (clamped to the
    /// 256 ids the tag byte can address).
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: 0,
            capacity: capacity.min(HandlerId::SPACE),
            pending: BTreeSet::new(),
            handlers: BTreeMap::new(),
        }
    }

    /// Mint a fresh id and mark it pending.
    pub fn reserve(&mut self) -> Result<HandlerId, NetworkError> {
        let minted = usize::from(self.next_id);
        if minted >= self.capacity {
            return Err(NetworkError::HandlerLimitReached { max: self.capacity });
        }
        let raw = u8::try_from(self.next_id).map_err(|_| NetworkError::HandlerLimitReached {
            max: self.capacity,
        })?;
        let id = HandlerId::new(raw);
        self.next_id += 1;
        self.pending.insert(id);
        Ok(id)
    }

    /// Bind an implementation to a pending id.
    ///
    /// Fails without touching the table if the id is already bound or was
    /// never reserved.
    pub fn bind(&mut self, id: HandlerId, handler: H) -> Result<(), NetworkError> {
        if !self.pending.remove(&id) {
            if self.handlers.contains_key(&id) {
                return Err(NetworkError::HandlerAlreadyBound(id));
            }
            return Err(NetworkError::HandlerNotPending(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    /// Look up a bound handler.
    pub fn get(&self, id: HandlerId) -> Option<&H> {
        self.handlers.get(&id)
    }

    pub fn is_pending(&self, id: HandlerId) -> bool {
        self.pending.contains(&id)
    }

    pub fn is_bound(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Bound handlers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (HandlerId, &H)> {
        self.handlers.iter().map(|(id, h)| (*id, h))
    }

    /// Number of bound handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Number of ids reserved but not yet bound.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
