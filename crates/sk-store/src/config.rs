use std::time::Duration;

/// Retries after a "not found" read before giving up
pub const READ_RETRIES: u32 = 3;

/// Read-back checks made after each write
pub const VERIFY_ATTEMPTS: u32 = 3;

/// Base step of the linear backoff: 100ms, 200ms, 300ms...
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Retry policy for a backend whose writes are not immediately visible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePolicy {
    /// Extra reads after the first one reports "not found"
    pub read_retries: u32,
    /// Read-back verification attempts after a write, first one immediate
    pub verify_attempts: u32,
    /// Delay unit; attempt `n` waits `n * backoff_step`
    pub backoff_step: Duration,
}

impl StoragePolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Policy without any retries or delays, for backends that are known consistent
    pub fn immediate() -> Self {
        Self {
            read_retries: 0,
            verify_attempts: 1,
            backoff_step: Duration::ZERO,
        }
    }
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            read_retries: READ_RETRIES,
            verify_attempts: VERIFY_ATTEMPTS,
            backoff_step: BACKOFF_STEP,
        }
    }
}
