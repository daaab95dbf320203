use crate::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;

/// Receives notifications about data dropped while scanning a record log.
pub trait Reporter {
    /// Some corruption was detected. `bytes` is the approximate number of
    /// bytes dropped because of it.
    fn corruption(&mut self, bytes: u64, reason: &str);
}

/// A `Reporter` that keeps the first corruption it sees so the caller can
/// fail the whole scan afterwards. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct LogReporter {
    inner: Rc<RefCell<Option<Error>>>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(())` if no corruption has been reported so far, otherwise the
    /// first reported corruption.
    pub fn result(&self) -> Result<()> {
        match self.inner.borrow_mut().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Reporter for LogReporter {
    fn corruption(&mut self, bytes: u64, reason: &str) {
        let mut slot = self.inner.borrow_mut();
        if slot.is_none() {
            *slot = Some(Error::Corruption(format!(
                "{} bytes dropped: {}",
                bytes, reason
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_first_corruption() {
        let reporter = LogReporter::new();
        assert!(reporter.result().is_ok());
        let mut shared = reporter.clone();
        shared.corruption(7, "bad header");
        shared.corruption(9, "later");
        match reporter.result() {
            Err(Error::Corruption(msg)) => assert!(msg.contains("bad header")),
            other => panic!("unexpected result: {:?}", other),
        }
        // Taking the error resets the state.
        assert!(reporter.result().is_ok());
    }
}
