#![deny(missing_docs)]
#![deny(unsafe_code)]
#![doc = include_str!("README.tpl")]
//! # teo-core
//!
//! Core types shared by the teo relay / webrtc crates.

include!(concat!(env!("OUT_DIR"), "/readme.rs"));

/// Re-exported dependencies.
pub mod deps {
    pub use serde;
    pub use serde_json;
}

mod error;
pub use error::*;

mod uniq;
pub use uniq::*;

/// A tokio task handle that aborts the task when dropped.
pub struct AbortTask<R>(pub tokio::task::JoinHandle<R>);

impl<R> Drop for AbortTask<R> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<R> std::fmt::Debug for AbortTask<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortTask")
            .field("finished", &self.0.is_finished())
            .finish()
    }
}

impl<R: Send + 'static> AbortTask<R> {
    /// Spawn a future onto the current tokio runtime,
    /// aborting it when the returned handle is dropped.
    pub fn spawn<F>(f: F) -> Self
    where
        F: std::future::Future<Output = R> + Send + 'static,
    {
        Self(tokio::task::spawn(f))
    }

    /// Returns `true` if the task has run to completion or was aborted.
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

/// The reserved relay command code designating a signaling envelope.
pub const CMD_SIGNAL: u8 = 255;
