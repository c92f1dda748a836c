use std::sync::atomic;

/// Process-unique identifier.
///
/// Each peer connection attempt is stamped with one of these, so that
/// asynchronous work started by an attempt can tell whether the attempt
/// is still the current one when it completes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Uniq(pub u64);

impl std::fmt::Display for Uniq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for Uniq {
    fn default() -> Self {
        static CNT_ID: atomic::AtomicU64 = atomic::AtomicU64::new(1);
        Self(CNT_ID.fetch_add(1, atomic::Ordering::Relaxed))
    }
}
