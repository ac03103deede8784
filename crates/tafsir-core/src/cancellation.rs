use anyhow::{Result, anyhow};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Shared flag used to abandon an in-flight audio load when the listener
/// switches parts before it finishes.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(anyhow!("operation cancelled at stage={stage}"));
        }
        Ok(())
    }

    /// Cancel whatever token currently occupies `slot` and install a fresh one.
    pub fn replace(slot: &mut Option<CancellationToken>) -> CancellationToken {
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let fresh = CancellationToken::new();
        *slot = Some(fresh.clone());
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::CancellationToken;

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(worker.check_cancelled("fetch").is_ok());
        token.cancel();
        assert!(worker.is_cancelled());
        let err = worker.check_cancelled("decode").expect_err("cancelled");
        assert!(err.to_string().contains("stage=decode"));
    }

    #[test]
    fn replace_cancels_previous_token() {
        let mut slot = None;
        let first = CancellationToken::replace(&mut slot);
        let second = CancellationToken::replace(&mut slot);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
