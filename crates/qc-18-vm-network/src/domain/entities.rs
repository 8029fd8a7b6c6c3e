//! Core identity types for the VM network layer.

use std::fmt;

/// Request identifier as carried by the host transport.
///
/// Used both for the ids a handler picks for its own requests and for the
/// virtual ids minted by the multiplexer.
pub type RequestId = u32;

/// Identity of a remote node (20-byte short id).
///
/// # Example
///
/// ```
/// use qc_18_vm_network::NodeId;
///
/// let node = NodeId::new([0xAB; 20]);
/// let node_from_bytes = NodeId::from_bytes(&[0xAB; 20]).unwrap();
/// assert_eq!(node, node_from_bytes);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// Creates a node ID from a 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Creates a node ID from a byte slice.
    ///
    /// Returns `None` if the slice is shorter than 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; 20] = bytes.get(..20)?.try_into().ok()?;
        Some(Self(id))
    }

    /// Raw bytes of the node ID.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID-{}", hex::encode(self.0))
    }
}

/// Identity of a chain hosted on the same node (32-byte blockchain id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainId(pub [u8; 32]);

impl ChainId {
    /// Creates a chain ID from a 32-byte array.
    pub fn new(id: [u8; 32]) -> Self {
        Self(id)
    }

    /// Raw bytes of the chain ID.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Identifier of a registered network handler.
///
/// The id doubles as the trailing tag byte on gossip and request payloads,
/// which is why the space is limited to 256 values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u8);

impl HandlerId {
    /// Number of distinct handler ids the wire format can address.
    pub const SPACE: usize = u8::MAX as usize + 1;

    /// Wraps a raw tag byte.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// The tag byte appended to outbound payloads.
    pub const fn tag(self) -> u8 {
        self.0
    }
}

impl From<u8> for HandlerId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application version announced by a peer on connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppVersion {
    pub name: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AppVersion {
    pub fn new(name: impl Into<String>, major: u32, minor: u32, patch: u32) -> Self {
        Self {
            name: name.into(),
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}.{}", self.name, self.major, self.minor, self.patch)
    }
}

/// Key of a request-id numberspace.
///
/// Peer traffic gets one numberspace per node. Cross-chain traffic is
/// intra-node and has no peer, so all of it shares the `CrossChain` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequesterKey {
    Node(NodeId),
    CrossChain,
}

impl fmt::Display for RequesterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(node_id) => node_id.fmt(f),
            Self::CrossChain => f.write_str("cross-chain"),
        }
    }
}
