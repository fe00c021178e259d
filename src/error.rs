// Error types surfaced by the fetch path.
// Callers match on these to tell "offline with nothing cached" apart from other failures.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network request failed: {0}")]
  Network(String),

  #[error("No cached response available offline for {0}")]
  CacheMiss(String),

  #[error("Cache store error: {0}")]
  Storage(String),

  #[error("Offline page {0} is not precached")]
  OfflinePageMissing(String),
}

impl FetchError {
  /// True when the caller should render a "no data available offline" state.
  pub fn is_offline_miss(&self) -> bool {
    matches!(self, FetchError::CacheMiss(_) | FetchError::OfflinePageMissing(_))
  }
}
