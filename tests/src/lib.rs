//! # VM Network Test Suite
//!
//! Unified test crate for behaviour that needs more than one VM.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Criterion benchmarks (virtualizer, routing)
//! └── src/
//!     └── integration/  # Multi-VM flows over the loopback hub
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(dead_code)]
