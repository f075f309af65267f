//! Conformance: wire-level facts other DPP implementations depend on.
//!
//! Coverage:
//! - Status attribute registry (values and canonical names)
//! - Bootstrap URI parsing against a known interoperable URI
//! - Public action frame header layout
//! - Operating class and channel mapping

mod bootstrap_uri;
mod frame_header;
mod status_registry;
