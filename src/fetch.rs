use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContestRecord {
    pub rating: i64,
    pub contest_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRecord {
    pub accepted_count: u32,
    pub submitted_count: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{platform} unavailable: {reason}")]
    Unavailable { platform: String, reason: String },
    #[error("malformed {platform} response: {reason}")]
    Malformed { platform: String, reason: String },
    #[error("no fetcher configured for {platform}")]
    Unsupported { platform: String },
}

impl FetchError {
    pub fn unavailable(platform: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Unavailable {
            platform: platform.to_string(),
            reason: format!("{err:#}"),
        }
    }

    pub fn malformed(platform: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Malformed {
            platform: platform.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

/// Source of per-handle statistics. Calls may block for as long as the
/// remote side takes; the engine only invokes them from worker threads.
pub trait FetchClient: Send + Sync {
    fn fetch_contest_record(&self, platform: &str, handle: &str)
    -> Result<ContestRecord, FetchError>;

    fn fetch_submit_record(&self, platform: &str, handle: &str) -> Result<SubmitRecord, FetchError>;
}
