//! # Domain Layer for the VM Network
//!
//! Pure bookkeeping with no I/O: the pieces the manager guards behind its
//! lock and the framing rules for the wire.
//!
//! ## Contents
//!
//! - **entities**: identities (`NodeId`, `ChainId`, `HandlerId`, `RequesterKey`)
//! - **registry**: handler id minting, pending set, handler table
//! - **virtualizer**: per-peer virtual request ids
//! - **framing**: trailing handler tag byte
//! - **value_objects**: configuration and metrics

mod entities;
mod framing;
mod registry;
mod value_objects;
mod virtualizer;

pub use entities::*;
pub use framing::*;
pub use registry::*;
pub use value_objects::*;
pub use virtualizer::*;
