//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running reaction (computed/effect),
//!    the signal registers that reaction as an observer.
//!
//! 2. When a signal is written with a value its comparator considers
//!    different, observers are marked stale, the value is installed, and
//!    observers are then released (unstale) in dependency order.
//!
//! 3. If the signal is the output of a computed that is still dirty, a read
//!    refreshes the computed first.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A node in the runtime's arena (observers, parent, disposal state)
//! - The typed value and comparator, shared between clones of the handle
//!
//! The value is held as an `Rc<T>` snapshot. Borrowing reads hand out a
//! clone of the snapshot, so no borrow of the cell outlives the read and
//! user code may write any signal while holding a value.
//!
//! The arena node is freed when the last handle is dropped.

use std::cell::{Ref, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::{debug, error, trace};

use super::context::OwnerScope;
use super::runtime::{PendingWrite, Runtime};
use crate::error::{Error, EvalError, Result};
use crate::graph::NodeId;

/// Equality used to decide whether a write is a change.
pub type Comparator<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Per-signal configuration.
///
/// ```rust
/// use cascade_core::{Signal, SignalOptions};
///
/// // Treat values within 0.01 of each other as unchanged
/// let temp = Signal::with_options(20.0_f64, SignalOptions::new().equals(|a: &f64, b: &f64| {
///     (a - b).abs() < 0.01
/// }));
/// temp.set(20.001).unwrap();
/// assert_eq!(temp.get(), 20.0);
/// ```
pub struct SignalOptions<T> {
    equals: Option<Comparator<T>>,
}

impl<T> SignalOptions<T> {
    pub fn new() -> Self {
        Self { equals: None }
    }

    /// Use a custom comparator instead of `PartialEq`.
    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.equals = Some(Rc::new(equals));
        self
    }

    /// Treat every write as a change, even when the value is equal.
    pub fn always_notify(self) -> Self {
        self.equals(|_, _| false)
    }

    pub(crate) fn into_comparator(self) -> Option<Comparator<T>> {
        self.equals
    }
}

impl<T> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SignalOptions<T> {
    fn clone(&self) -> Self {
        Self {
            equals: self.equals.clone(),
        }
    }
}

impl<T> Debug for SignalOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalOptions")
            .field("custom_equals", &self.equals.is_some())
            .finish()
    }
}

struct SignalInner<T> {
    id: NodeId,
    value: RefCell<Rc<T>>,
    equals: Comparator<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        Runtime::release_signal(self.id);
    }
}

/// A reactive signal holding a value of type `T`.
///
/// Clones share the same cell.
///
/// # Example
///
/// ```rust
/// use cascade_core::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies observers)
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a new signal compared with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_options(value, SignalOptions::new())
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a new signal with explicit options. Falls back to `PartialEq`
    /// when `options` carries no comparator.
    pub fn with_options(value: T, options: SignalOptions<T>) -> Self
    where
        T: PartialEq,
    {
        let equals = options
            .into_comparator()
            .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b));
        Self::build(value, equals, None)
    }

    /// Create a signal whose comparator is given directly. Works for types
    /// without `PartialEq`.
    pub fn with_comparator<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self::build(value, Rc::new(equals), None)
    }

    /// Output cell of a computed.
    pub(crate) fn for_computed(value: T, equals: Comparator<T>, parent: NodeId) -> Self {
        Self::build(value, equals, Some(parent))
    }

    fn build(value: T, equals: Comparator<T>, parent: Option<NodeId>) -> Self {
        let id = NodeId::new();
        Runtime::with(|rt| rt.create_signal(id, parent));
        Self {
            inner: Rc::new(SignalInner {
                id,
                value: RefCell::new(Rc::new(value)),
                equals,
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// Inside a running reaction this also registers the reaction as an
    /// observer. If the signal is the output of a dirty computed, the
    /// computed is refreshed first.
    pub fn get(&self) -> T {
        if let Some(err) = self.observe() {
            error!(signal = %self.id(), error = %err, "unhandled error while refreshing on read");
        }
        (*self.snapshot()).clone()
    }

    /// Like [`Signal::get`], but reports an unhandled error raised by the
    /// refresh instead of logging it.
    pub fn try_get(&self) -> Result<T> {
        match self.observe() {
            Some(err) => Err(Error::Evaluation(err)),
            None => Ok((*self.snapshot()).clone()),
        }
    }

    /// Get the current value without tracking. Still refreshes a dirty
    /// computed upstream.
    pub fn get_untracked(&self) -> T {
        let _scope = OwnerScope::sampling();
        self.get()
    }

    /// Borrow the current value. Tracks like [`Signal::get`].
    ///
    /// `f` sees the value as of the read and may write any signal,
    /// including this one.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(err) = self.observe() {
            error!(signal = %self.id(), error = %err, "unhandled error while refreshing on read");
        }
        let value = self.snapshot();
        f(&*value)
    }

    /// The installed value, without tracking or refreshing.
    pub(crate) fn snapshot(&self) -> Rc<T> {
        Rc::clone(&self.inner.value.borrow())
    }

    fn observe(&self) -> Option<EvalError> {
        Runtime::with(|rt| rt.observe(self.inner.id))
    }

    /// Set a new value and propagate it.
    ///
    /// Inside a [`batch`](crate::batch) the write is queued and applied
    /// when the outermost batch ends. Returns the written value, or the
    /// first unhandled error raised by a reaction that re-ran.
    pub fn set(&self, value: T) -> Result<T> {
        let id = self.inner.id;
        Runtime::with(|rt| {
            if rt.signal_is_disposed(id) {
                debug!(signal = %id, "write to disposed signal");
                return Err(Error::Disposed);
            }

            if rt.is_batching() {
                trace!(signal = %id, "write queued");
                rt.queue(Box::new(QueuedWrite {
                    signal: self.clone(),
                    value: value.clone(),
                }));
                return Ok(value);
            }

            if !self.differs(&value) {
                return Ok(value);
            }

            let ((), err) = rt.episode(|| {
                rt.stale_signal(id, true);
                self.replace(value.clone());
                rt.unstale_signal(id, true);
            });
            match err {
                Some(err) => Err(Error::Evaluation(err)),
                None => Ok(value),
            }
        })
    }

    /// Compute the next value from the current one and write it.
    pub fn update<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.snapshot();
        let next = f(&*current);
        drop(current);
        self.set(next)
    }

    /// Publish a computed's result. Never queued, and the stale phase was
    /// already driven by the computed itself.
    pub(crate) fn publish(&self, value: T) {
        let fresh = self.differs(&value);
        if fresh {
            self.replace(value);
        }
        Runtime::with(|rt| rt.unstale_signal(self.inner.id, fresh));
    }

    pub(crate) fn differs(&self, value: &T) -> bool {
        !(self.inner.equals)(value, &*self.snapshot())
    }

    pub(crate) fn replace(&self, value: T) {
        let previous = self.inner.value.replace(Rc::new(value));
        drop(previous);
    }

    /// Dispose of the signal.
    ///
    /// Writes fail afterwards and reads stop registering dependencies.
    /// Observers are not detached eagerly.
    pub fn dispose(&self) {
        Runtime::with(|rt| rt.dispose_signal(self.inner.id));
    }

    /// Check if the signal has been disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| rt.signal_is_disposed(self.inner.id))
    }

    /// Get the number of observers.
    pub fn observer_count(&self) -> usize {
        Runtime::with(|rt| rt.observer_count(self.inner.id))
    }

    /// Borrow the value directly, for `Debug` and tests.
    pub(crate) fn peek(&self) -> Ref<'_, T> {
        Ref::map(self.inner.value.borrow(), |value| &**value)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.peek())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

/// A write deferred by an open batch.
struct QueuedWrite<T: 'static> {
    signal: Signal<T>,
    value: T,
}

impl<T: Clone + 'static> PendingWrite for QueuedWrite<T> {
    fn signal(&self) -> NodeId {
        self.signal.id()
    }

    fn is_fresh(&self) -> bool {
        self.signal.differs(&self.value)
    }

    fn install(self: Box<Self>) {
        let QueuedWrite { signal, value } = *self;
        signal.replace(value);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        assert_eq!(signal.set(42).unwrap(), 42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        assert_eq!(signal.update(|v| v + 5).unwrap(), 15);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42).unwrap();
        assert_eq!(signal2.get(), 42);

        signal2.set(100).unwrap();
        assert_eq!(signal1.get(), 100);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn disposed_signal_rejects_writes() {
        let signal = Signal::new(1);
        signal.dispose();

        assert!(signal.is_disposed());
        assert!(matches!(signal.set(2), Err(Error::Disposed)));
        assert_eq!(signal.get(), 1);
    }

    #[test]
    fn custom_comparator_decides_freshness() {
        let signal = Signal::with_comparator(String::from("Hello"), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        signal.set("HELLO".to_string()).unwrap();

        // Considered equal, so the old value is retained
        assert_eq!(signal.get(), "Hello");

        signal.set("bye".to_string()).unwrap();
        assert_eq!(signal.get(), "bye");
    }

    #[test]
    fn always_notify_installs_equal_values() {
        let signal = Signal::with_options(1, SignalOptions::new().always_notify());
        assert!(signal.differs(&1));
        assert!(!Signal::new(1).differs(&1));
    }

    #[test]
    fn with_borrows_without_cloning() {
        let signal = Signal::new(vec![1, 2, 3]);
        assert_eq!(signal.with(|v| v.len()), 3);
    }

    #[test]
    fn with_and_update_may_write_the_same_signal() {
        let signal = Signal::new(1);

        let before = signal.with(|v| {
            signal.set(v + 1).unwrap();
            *v
        });
        assert_eq!(before, 1);
        assert_eq!(signal.get(), 2);

        let next = signal
            .update(|v| {
                signal.set(v * 100).unwrap();
                v + 1
            })
            .unwrap();
        assert_eq!(next, 3);
        assert_eq!(signal.get(), 3);
    }

    #[test]
    fn dropping_last_handle_frees_node() {
        let before = Runtime::with(|rt| rt.node_counts().0);
        let signal = Signal::new(0);
        let clone = signal.clone();
        assert_eq!(Runtime::with(|rt| rt.node_counts().0), before + 1);

        drop(signal);
        assert_eq!(Runtime::with(|rt| rt.node_counts().0), before + 1);

        drop(clone);
        assert_eq!(Runtime::with(|rt| rt.node_counts().0), before);
    }

    #[test]
    fn debug_shows_value() {
        let signal = Signal::new(7);
        let rendered = format!("{signal:?}");
        assert!(rendered.contains("value: 7"));
        assert!(rendered.contains("observer_count: 0"));
    }
}
