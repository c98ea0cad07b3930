//! Ambient context — typed dynamic-scope slots for the current async task.
//!
//! A [`ContextKey`] names a typed slot. Reading a key that has never been
//! bound yields its [`default_value`](ContextKey::default_value); inside
//! [`with_value`] the innermost binding wins. Bindings are carried by the
//! task's scope, not by process-wide state, and are visible to everything
//! the scoped future awaits.
//!
//! Values do not automatically cross `tokio::spawn` boundaries. A composite
//! that spawns should capture the current scope with [`ContextMap::capture`]
//! and re-install it in the child with [`ContextMap::scope`].
//!
//! # Example
//!
//! ```rust,ignore
//! struct RunLabel;
//!
//! impl ContextKey for RunLabel {
//!     type Value = String;
//!     fn default_value() -> String {
//!         "unlabelled".into()
//!     }
//! }
//!
//! with_value::<RunLabel, _>("nightly".into(), async {
//!     assert_eq!(current::<RunLabel>(), "nightly");
//! })
//! .await;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

tokio::task_local! {
    static CURRENT: ContextMap;
}

/// A typed slot in the ambient dynamic scope.
///
/// The key type itself is never instantiated; it only names the slot.
/// Multiple keys coexist independently, and values must be cheap to clone
/// (wrap large state in an `Arc`).
pub trait ContextKey: Sized + 'static {
    /// The value stored under this key.
    type Value: Clone + Send + Sync + 'static;

    /// The value observed when the key has never been bound.
    fn default_value() -> Self::Value;
}

/// The set of key bindings visible to the current scope.
///
/// Scoping clones the parent map and overlays the new binding, so maps are
/// cheap for the handful of keys an agent tree carries.
#[derive(Clone, Default)]
pub struct ContextMap {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ContextMap {
    /// Capture the bindings visible to the calling task.
    ///
    /// Use this together with [`ContextMap::scope`] to carry ambient context
    /// across a `tokio::spawn` boundary.
    #[must_use]
    pub fn capture() -> Self {
        CURRENT.try_with(Self::clone).unwrap_or_default()
    }

    /// Bind `value` under key `K` in this map.
    pub fn insert<K: ContextKey>(&mut self, value: K::Value) {
        self.entries.insert(TypeId::of::<K>(), Arc::new(value));
    }

    /// Read the binding for key `K`, if present.
    #[must_use]
    pub fn get<K: ContextKey>(&self) -> Option<K::Value> {
        self.entries
            .get(&TypeId::of::<K>())
            .and_then(|value| value.downcast_ref::<K::Value>())
            .cloned()
    }

    /// Run `body` with this map installed as the ambient scope.
    pub async fn scope<F: Future>(self, body: F) -> F::Output {
        CURRENT.scope(self, body).await
    }
}

impl std::fmt::Debug for ContextMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextMap")
            .field("bindings", &self.entries.len())
            .finish()
    }
}

/// Read the current value of key `K`.
///
/// Returns the innermost binding, or `K::default_value()` when the key has
/// never been bound on this task.
#[must_use]
pub fn current<K: ContextKey>() -> K::Value {
    CURRENT
        .try_with(ContextMap::get::<K>)
        .ok()
        .flatten()
        .unwrap_or_else(K::default_value)
}

/// Run `body` with `value` bound under key `K`.
///
/// The binding is visible to `body` and everything it awaits, and is
/// removed when `body` returns. Scopes nest; the innermost binding wins.
pub async fn with_value<K: ContextKey, F: Future>(value: K::Value, body: F) -> F::Output {
    let mut map = ContextMap::capture();
    map.insert::<K>(value);
    CURRENT.scope(map, body).await
}

/// Ambient cancellation for cooperative checkpoints.
///
/// Loops and session turns consult this token at their iteration and
/// acquisition boundaries. The default is a token that is never cancelled.
#[derive(Debug, Clone, Copy)]
pub struct CancellationKey;

impl ContextKey for CancellationKey {
    type Value = CancellationToken;

    fn default_value() -> CancellationToken {
        CancellationToken::new()
    }
}

/// Run `body` under the given cancellation token.
pub async fn with_cancellation<F: Future>(token: CancellationToken, body: F) -> F::Output {
    with_value::<CancellationKey, F>(token, body).await
}
