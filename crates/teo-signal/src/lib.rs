#![deny(missing_docs)]
#![deny(unsafe_code)]
#![doc = teo_core::__doc_header!()]
//! # teo-signal
//!
//! Relay frames, the signaling vocabulary tunneled through the relay
//! under the reserved command code, and the relay transport capability
//! the direct-connect overlay is layered on.

/// Re-exported dependencies.
pub mod deps {
    pub use teo_core::deps::*;
}

pub use teo_core::{Error, ErrorExt, Result, CMD_SIGNAL};

use std::sync::Arc;

mod peer_id;
pub use peer_id::*;

mod wire;
pub use wire::*;

mod relay;
pub use relay::*;

mod mem;
pub use mem::*;
