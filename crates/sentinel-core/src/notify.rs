//! Outbound alert channel.

use std::path::Path;

/// Delivers an evidence image to an external channel.
///
/// `Ok(false)` means the channel is disabled (for example, missing credentials);
/// it is not an error. Rate limiting is the caller's job.
pub trait Notifier: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn notify(&self, evidence: &Path) -> Result<bool, Self::Error>;
}
