//! Failure injection for exercising store error paths.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use tandem_core::{Error, Result};
use tracing::warn;

#[derive(Debug, Default)]
pub struct FaultInjector {
    remaining: AtomicU32,
    /// Restricts injected failures to one operation when set.
    operation: Mutex<Option<&'static str>>,
}

impl FaultInjector {
    /// Make the next `count` operations fail.
    pub fn fail_next(&self, count: u32) {
        *self.operation.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls of `operation` fail.
    pub fn fail_operation(&self, operation: &'static str, count: u32) {
        *self.operation.lock().unwrap_or_else(PoisonError::into_inner) = Some(operation);
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Consume one injected failure, if any is pending.
    pub fn check(&self, operation: &str) -> Result<()> {
        let targeted = *self.operation.lock().unwrap_or_else(PoisonError::into_inner);
        if targeted.is_some_and(|t| t != operation) {
            return Ok(());
        }

        let took = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            warn!("Injected failure in {}", operation);
            return Err(Error::Database(format!("{} unavailable", operation)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_next_counts_down() {
        let faults = FaultInjector::default();
        faults.fail_next(2);
        assert!(faults.check("a").is_err());
        assert!(faults.check("b").is_err());
        assert!(faults.check("a").is_ok());
    }

    #[test]
    fn test_fail_operation_skips_others() {
        let faults = FaultInjector::default();
        faults.fail_operation("add_buildset", 1);
        assert!(faults.check("get_buildset").is_ok());
        assert!(matches!(faults.check("add_buildset"), Err(Error::Database(_))));
        assert!(faults.check("add_buildset").is_ok());
    }
}
