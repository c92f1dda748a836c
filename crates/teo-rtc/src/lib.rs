#![deny(missing_docs)]
#![deny(unsafe_code)]
#![doc = teo_core::__doc_header!()]
//! # teo-rtc
//!
//! Teonet webrtc direct-connect overlay.
//! Application messages start out flowing through the relay server.
//! The first message to a peer kicks off a webrtc negotiation tunneled
//! over the relay, and once a direct data channel opens, subsequent
//! messages to that peer bypass the relay.
//!
//! The webrtc implementation is pluggable through
//! [backend::ConnectionFactory]. An in-memory implementation,
//! [backend::MemNet], ships for tests and demos.

pub use teo_core::{AbortTask, Error, ErrorExt, Uniq};
pub use teo_signal;
pub use teo_signal::{CallOptions, PeerId, RelayFrame, SignalPayload};

use std::collections::HashMap;
use std::io::Result;
use std::sync::{Arc, Mutex, Weak};

pub mod backend;
use backend::*;

mod config;
pub use config::*;

mod registry;
pub use registry::*;

mod channel;
pub use channel::*;

mod engine;
pub(crate) use engine::*;
pub use engine::CallAnswerCb;

mod call;
pub use call::*;

mod rtc;
pub use rtc::*;

#[cfg(test)]
mod test;
