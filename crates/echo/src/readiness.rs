//! Readiness flag the responder sets once its listener is bound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Flag flipped once a responder is accepting traffic.
///
/// Clones share the same flag; the probe server holds one and the responder
/// another.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Flip the flag. Only the responder calls this, or the runner when no
    /// responder is configured.
    pub fn mark_ready(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            info!("Marked as ready");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let readiness = Readiness::new();
        let probe = readiness.clone();
        assert!(!probe.is_ready());

        readiness.mark_ready();
        readiness.mark_ready();
        assert!(probe.is_ready());
    }
}
