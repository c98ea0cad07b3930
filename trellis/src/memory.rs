//! Shared mutable state for sibling steps.
//!
//! A [`Memory`] owns a value under a mutex; a [`Relay`] is the projected
//! capability that steps actually hold. Steps never share a `Memory`
//! directly — they borrow relays, relays keep the memory alive, and the
//! memory owns the value.
//!
//! Convenience mutators on collection- and counter-shaped relays perform a
//! read, a local mutation, and a write-back. Each `get`/`set` is atomic,
//! but the sequence is not: callers that need atomicity across several
//! operations must go through [`Memory::update`] in a single critical
//! section.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::AddAssign;
use std::sync::{Arc, Mutex, PoisonError};

/// An owned shared cell holding a value of type `V`.
///
/// Cloning a `Memory` yields another handle to the same cell.
#[derive(Debug, Default)]
pub struct Memory<V> {
    cell: Arc<Mutex<V>>,
}

impl<V> Clone for Memory<V> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<V: Clone + Send + 'static> Memory<V> {
    /// Create a new cell holding `value`.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self {
            cell: Arc::new(Mutex::new(value)),
        }
    }

    /// Read a copy of the current value.
    #[must_use]
    pub fn get(&self) -> V {
        self.lock().clone()
    }

    /// Replace the current value.
    pub fn set(&self, value: V) {
        *self.lock() = value;
    }

    /// Mutate the value inside a single critical section.
    ///
    /// This is the only way to get atomicity across a read-modify-write.
    pub fn update<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        f(&mut self.lock())
    }

    /// Project a [`Relay`] whose getter and setter close over this cell.
    #[must_use]
    pub fn relay(&self) -> Relay<V> {
        let getter = self.clone();
        let setter = self.clone();
        Relay::new(move || getter.get(), move |value| setter.set(value))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, V> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Getter<V> = Arc<dyn Fn() -> V + Send + Sync>;
type Setter<V> = Arc<dyn Fn(V) + Send + Sync>;

/// A pair of closures projecting access to some value.
///
/// A relay is a capability, not ownership: it may point at a [`Memory`],
/// at a mapped view of another relay, or at anything else the closures
/// reach. A constant relay's setter is a no-op.
#[derive(Clone)]
pub struct Relay<V> {
    getter: Getter<V>,
    setter: Setter<V>,
}

impl<V: Clone + Send + 'static> Relay<V> {
    /// Create a relay from a getter and a setter.
    #[must_use]
    pub fn new(
        getter: impl Fn() -> V + Send + Sync + 'static,
        setter: impl Fn(V) + Send + Sync + 'static,
    ) -> Self {
        Self {
            getter: Arc::new(getter),
            setter: Arc::new(setter),
        }
    }

    /// Create a relay that always yields `value` and ignores writes.
    #[must_use]
    pub fn constant(value: V) -> Self
    where
        V: Sync,
    {
        Self::new(move || value.clone(), |_ignored| {})
    }

    /// Read the projected value.
    #[must_use]
    pub fn get(&self) -> V {
        (self.getter)()
    }

    /// Write the projected value.
    pub fn set(&self, value: V) {
        (self.setter)(value);
    }

    /// Project a mapped view.
    ///
    /// Reads go through `to`; writes go through `from` and then the
    /// underlying setter.
    #[must_use]
    pub fn map<U: Clone + Send + 'static>(
        &self,
        to: impl Fn(V) -> U + Send + Sync + 'static,
        from: impl Fn(U) -> V + Send + Sync + 'static,
    ) -> Relay<U> {
        let getter = Arc::clone(&self.getter);
        let setter = Arc::clone(&self.setter);
        Relay::new(
            move || to(getter()),
            move |value| setter(from(value)),
        )
    }

    /// Project an immutable view whose setter is a no-op.
    #[must_use]
    pub fn read_only<U: Clone + Send + 'static>(
        &self,
        to: impl Fn(V) -> U + Send + Sync + 'static,
    ) -> Relay<U> {
        let getter = Arc::clone(&self.getter);
        Relay::new(move || to(getter()), |_ignored| {})
    }
}

impl<T: Clone + Send + 'static> Relay<Vec<T>> {
    /// Append an element.
    pub fn append(&self, item: T) {
        let mut items = self.get();
        items.push(item);
        self.set(items);
    }

    /// Remove and return the element at `index`, if it exists.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut items = self.get();
        if index >= items.len() {
            return None;
        }
        let removed = items.remove(index);
        self.set(items);
        Some(removed)
    }
}

impl<K, V> Relay<HashMap<K, V>>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Insert a key-value pair, returning the previous value if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut map = self.get();
        let previous = map.insert(key, value);
        self.set(map);
        previous
    }

    /// Remove a key, returning its value if it was present.
    pub fn remove_key(&self, key: &K) -> Option<V> {
        let mut map = self.get();
        let removed = map.remove(key);
        self.set(map);
        removed
    }
}

impl<V> Relay<V>
where
    V: AddAssign + Clone + Send + 'static,
{
    /// Add `amount` to the projected value.
    pub fn increment(&self, amount: V) {
        let mut value = self.get();
        value += amount;
        self.set(value);
    }
}

impl<V> std::fmt::Debug for Relay<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay").finish_non_exhaustive()
    }
}
