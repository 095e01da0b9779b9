#![doc = r"Positional-memoization runtime for Trellis.

A [`Composition`] owns a [`SlotTable`] and re-runs composable content against
it. Values remembered in the table keep their identity across passes, state
cells record which scopes read them, and the recomposer re-runs only the
invalidated parts of the tree."]

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

pub mod collections;
mod composer;
pub mod composer_context;
mod composition;
mod effects;
pub mod hash;
mod node;
pub mod observer;
mod owned;
pub mod platform;
mod runtime;
pub mod slot_table;
mod state;
pub mod subscriptions;

pub use composer::{Composer, SlotMisuse};
pub(crate) use composer::ComposerCore;
pub use composer_context::with_composer as with_current_composer;
pub use composition::{Composition, CompositionState};
pub use effects::{
    CancelToken, DisposableEffectResult, DisposableEffectScope, LaunchedEffectScope,
    __disposable_effect_impl, __launched_effect_async_impl, __launched_effect_impl, SideEffect,
};
pub use hash::{caller_key, combine_keys, hash_key, location_key};
pub use node::{
    Applier, ApplierGuard, ApplierHost, ConcreteApplierHost, MemoryApplier, Node, SlotsHost,
};
pub use observer::{observe_reads, untracked, Dependent, StateObject};
pub use owned::Owned;
pub use platform::{DefaultScheduler, RuntimeScheduler};
pub use runtime::{current_runtime_handle, Runtime, RuntimeHandle, TaskHandle, UiDispatcher};
pub use slot_table::{SlotKind, SlotTable};
pub use state::{derived_state_of, mutable_state_of, use_state, DerivedState, MutableState, State};
pub use subscriptions::{
    produce_state, StateEmitter, Subscription, SubscriptionKey, SubscriptionRegistry,
};

/// Verbose composer tracing, enabled by setting `TRELLIS_DEBUG`.
pub(crate) fn debug_enabled() -> bool {
    static ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var("TRELLIS_DEBUG").is_ok())
}

pub type Key = u64;
pub type NodeId = usize;
pub type ScopeId = usize;

type RecomposeCallback = Box<dyn FnMut(&Composer) + 'static>;

pub(crate) struct RecomposeScopeInner {
    id: ScopeId,
    this: Weak<RecomposeScopeInner>,
    runtime: RuntimeHandle,
    invalid: Cell<bool>,
    enqueued: Cell<bool>,
    active: Cell<bool>,
    parent: RefCell<Weak<RecomposeScopeInner>>,
    parent_node: Cell<Option<NodeId>>,
    recompose: RefCell<Option<RecomposeCallback>>,
}

impl RecomposeScopeInner {
    fn invalidate(&self) {
        self.invalid.set(true);
        if !self.active.get() {
            return;
        }
        if !self.enqueued.replace(true) {
            self.runtime
                .register_invalid_scope(self.id, self.this.clone());
        }
    }
}

impl Dependent for RecomposeScopeInner {
    fn dependent_id(&self) -> usize {
        self.id
    }

    fn on_dependency_changed(&self) {
        self.invalidate();
    }
}

/// Identity of one group's body for invalidation and recomposition.
#[derive(Clone)]
pub struct RecomposeScope {
    inner: Rc<RecomposeScopeInner>,
}

impl PartialEq for RecomposeScope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RecomposeScope {}

impl fmt::Debug for RecomposeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecomposeScope")
            .field("id", &self.inner.id)
            .field("invalid", &self.inner.invalid.get())
            .field("active", &self.inner.active.get())
            .finish()
    }
}

impl RecomposeScope {
    pub(crate) fn new(runtime: RuntimeHandle) -> Self {
        let inner = Rc::new_cyclic(|this| RecomposeScopeInner {
            id: observer::next_observer_id(),
            this: this.clone(),
            runtime,
            invalid: Cell::new(false),
            enqueued: Cell::new(false),
            active: Cell::new(true),
            parent: RefCell::new(Weak::new()),
            parent_node: Cell::new(None),
            recompose: RefCell::new(None),
        });
        Self { inner }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn is_invalid(&self) -> bool {
        self.inner.invalid.get()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Marks the scope for recomposition and queues it on the runtime.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub(crate) fn mark_recomposed(&self) {
        self.inner.invalid.set(false);
        if self.inner.enqueued.replace(false) {
            self.inner.runtime.mark_scope_recomposed(self.inner.id);
        }
    }

    pub(crate) fn deactivate(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        *self.inner.recompose.borrow_mut() = None;
        if self.inner.enqueued.replace(false) {
            self.inner.runtime.mark_scope_recomposed(self.inner.id);
        }
    }

    pub(crate) fn as_dependent(&self) -> Rc<dyn Dependent> {
        self.inner.clone()
    }

    pub(crate) fn set_parent(&self, parent: Option<&RecomposeScope>) {
        *self.inner.parent.borrow_mut() = parent
            .map(|scope| Rc::downgrade(&scope.inner))
            .unwrap_or_default();
    }

    pub(crate) fn parent(&self) -> Option<RecomposeScope> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| RecomposeScope { inner })
    }

    pub(crate) fn set_parent_node(&self, node: Option<NodeId>) {
        self.inner.parent_node.set(node);
    }

    pub(crate) fn parent_node(&self) -> Option<NodeId> {
        self.inner.parent_node.get()
    }

    pub(crate) fn set_recompose(&self, callback: RecomposeCallback) {
        *self.inner.recompose.borrow_mut() = Some(callback);
    }

    pub fn has_recompose(&self) -> bool {
        self.inner.recompose.borrow().is_some()
    }

    /// The nearest scope, starting with this one, that can re-run its body.
    pub(crate) fn recompose_target(&self) -> Option<RecomposeScope> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.has_recompose() {
                return Some(scope);
            }
            current = scope.parent();
        }
        None
    }

    pub(crate) fn run_recompose(&self, composer: &Composer) {
        let callback = self.inner.recompose.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback(composer);
            let mut slot = self.inner.recompose.borrow_mut();
            if slot.is_none() && self.inner.active.get() {
                *slot = Some(callback);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    Missing { id: NodeId },
    TypeMismatch { id: NodeId, expected: &'static str },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Missing { id } => write!(f, "node {id} missing"),
            NodeError::TypeMismatch { id, expected } => {
                write!(f, "node {id} type mismatch; expected {expected}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// Slot visit order changed between passes. The table was repaired in
    /// place; the listed positions were reallocated.
    StructuralMisuse(Vec<SlotMisuse>),
    /// The composition was disposed and cannot compose again.
    Disposed,
    /// Composable content panicked; the composition was torn down.
    ContentPanicked { message: String },
    Node(NodeError),
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeError::StructuralMisuse(misuses) => {
                write!(f, "{} slot(s) visited out of order", misuses.len())?;
                if let Some(first) = misuses.first() {
                    write!(f, "; first: {first}")?;
                }
                Ok(())
            }
            ComposeError::Disposed => f.write_str("composition already disposed"),
            ComposeError::ContentPanicked { message } => {
                write!(f, "composable content panicked: {message}")
            }
            ComposeError::Node(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ComposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ComposeError::Node(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NodeError> for ComposeError {
    fn from(err: NodeError) -> Self {
        ComposeError::Node(err)
    }
}

pub fn with_key<K: Hash>(key: &K, content: impl FnOnce()) {
    with_current_composer(|composer| composer.with_key(key, |_| content()));
}

#[track_caller]
pub fn remember<T: 'static>(init: impl FnOnce() -> T) -> Owned<T> {
    let site = caller_key();
    with_current_composer(|composer| composer.remember_at(site, init))
}

/// Remembers `calc()` until `keys` stops comparing equal to the stored keys.
#[track_caller]
pub fn remember_with_keys<K, T>(keys: K, calc: impl FnOnce() -> T) -> Owned<T>
where
    K: PartialEq + 'static,
    T: 'static,
{
    let site = caller_key();
    with_current_composer(|composer| composer.remember_with_keys_at(site, keys, calc))
}

/// Runs `dispose` exactly once when the enclosing group leaves the composition
/// or the composition is torn down.
#[track_caller]
pub fn register_disposable(dispose: impl FnOnce() + 'static) {
    let site = caller_key();
    with_current_composer(|composer| composer.register_disposable_at(site, dispose));
}

pub fn with_node_mut<N: Node + 'static, R>(
    id: NodeId,
    f: impl FnOnce(&mut N) -> R,
) -> Result<R, NodeError> {
    with_current_composer(|composer| composer.with_node_mut(id, f))
}

pub fn push_parent(id: NodeId) {
    with_current_composer(|composer| composer.push_parent(id));
}

pub fn pop_parent() {
    with_current_composer(|composer| composer.pop_parent());
}

/// Last seen value of one `#[composable]` parameter.
pub struct ParamState<T> {
    value: Option<T>,
}

impl<T> Default for ParamState<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T: PartialEq + Clone> ParamState<T> {
    /// Stores `next`, returning whether it differs from the previous pass.
    pub fn update(&mut self, next: &T) -> bool {
        match &self.value {
            Some(previous) if previous == next => false,
            _ => {
                self.value = Some(next.clone());
                true
            }
        }
    }
}

/// Cached return value of a skippable `#[composable]`.
pub struct ReturnSlot<T> {
    value: Option<T>,
}

impl<T> Default for ReturnSlot<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T: Clone> ReturnSlot<T> {
    pub fn store(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn get(&self) -> Option<T> {
        self.value.clone()
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
