//! Error Types
//!
//! Two things can go wrong in the reactive engine:
//!
//! - Writing a signal that was explicitly disposed. This always fails.
//! - A fallible derivation or effect body returns an error and no owner up
//!   the chain registered a handler for it.
//!
//! Propagation itself never fails. Stale and unstale notifications on a
//! disposed subgraph are silently dropped.

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the reactive API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The signal was disposed and can no longer be written.
    #[error("a disposed signal can not be updated")]
    Disposed,

    /// A derivation or effect body failed and nothing handled the failure.
    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

/// An error raised by a reactive body.
///
/// The user's error is reference counted so the same failure can be handed
/// to every registered handler and still be reported to the writer that
/// triggered it.
#[derive(Clone)]
pub struct EvalError {
    inner: Rc<dyn StdError + 'static>,
}

impl EvalError {
    /// Wrap anything convertible into a boxed error.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + 'static>>,
    {
        Self {
            inner: Rc::from(error.into()),
        }
    }

    /// The error the body returned.
    pub fn inner(&self) -> &(dyn StdError + 'static) {
        &*self.inner
    }

    /// Try to view the wrapped error as a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Whether two handles point at the same underlying failure.
    pub fn ptr_eq(&self, other: &EvalError) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EvalError").field(&self.inner).finish()
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reactive evaluation failed: {}", self.inner)
    }
}

impl StdError for EvalError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom {0}")]
    struct Boom(u32);

    #[test]
    fn eval_error_wraps_strings() {
        let err = EvalError::new("bad input");
        assert_eq!(err.to_string(), "reactive evaluation failed: bad input");
        assert_eq!(err.inner().to_string(), "bad input");
    }

    #[test]
    fn eval_error_downcasts_to_concrete_type() {
        let err = EvalError::new(Boom(7));
        assert_eq!(err.downcast_ref::<Boom>().map(|b| b.0), Some(7));
        assert!(err.source().is_some());
    }

    #[test]
    fn clones_share_the_same_failure() {
        let err = EvalError::new(Boom(1));
        let copy = err.clone();
        assert!(err.ptr_eq(&copy));
        assert!(!err.ptr_eq(&EvalError::new(Boom(1))));
    }

    #[test]
    fn evaluation_error_is_transparent() {
        let err: Error = EvalError::new("nope").into();
        assert_eq!(err.to_string(), "reactive evaluation failed: nope");
        assert_eq!(Error::Disposed.to_string(), "a disposed signal can not be updated");
    }
}
