use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::observer::{self, Dependent, StateObject, Watchers};
use crate::runtime::{current_runtime_handle, RuntimeHandle};
use crate::{caller_key, with_current_composer};

pub(crate) struct MutableStateInner<T: 'static> {
    id: usize,
    value: RefCell<T>,
    watchers: Watchers,
    runtime: Option<RuntimeHandle>,
}

impl<T: 'static> StateObject for MutableStateInner<T> {
    fn state_id(&self) -> usize {
        self.id
    }

    fn add_dependent(&self, dependent: Weak<dyn Dependent>) {
        self.watchers.add(dependent);
    }

    fn invalidate_dependents(&self) {
        self.watchers.notify();
    }
}

/// Observable cell. Reads inside a scope subscribe it; writes invalidate
/// every subscribed scope.
pub struct MutableState<T: 'static> {
    inner: Rc<MutableStateInner<T>>,
}

impl<T: 'static> Clone for MutableState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for MutableState<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: 'static> Eq for MutableState<T> {}

impl<T: 'static> MutableState<T> {
    /// A cell bound to the current runtime, if any.
    pub fn new(value: T) -> Self {
        Self::with_runtime(value, current_runtime_handle())
    }

    pub fn with_runtime(value: T, runtime: Option<RuntimeHandle>) -> Self {
        Self {
            inner: Rc::new(MutableStateInner {
                id: observer::next_observer_id(),
                value: RefCell::new(value),
                watchers: Watchers::default(),
                runtime,
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        observer::record_read(&*self.inner);
        f(&self.inner.value.borrow())
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Mutates in place. Always counts as a write.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut value = self.inner.value.borrow_mut();
            f(&mut value)
        };
        self.notify_write();
        result
    }

    pub fn as_state(&self) -> State<T> {
        State {
            source: StateSource::Mutable(self.clone()),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    fn notify_write(&self) {
        let object: Rc<dyn StateObject> = self.inner.clone();
        match self.inner.runtime.as_ref().filter(|runtime| runtime.is_alive()) {
            Some(runtime) => {
                runtime.assert_ui_thread();
                runtime.record_write(object);
                if !runtime.is_composing() {
                    runtime.report_changed();
                }
            }
            None => object.invalidate_dependents(),
        }
    }
}

impl<T: PartialEq + 'static> MutableState<T> {
    /// Stores `value` and invalidates readers. Equal values are ignored;
    /// returns whether a write happened.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.notify_write();
        true
    }
}

impl<T: Clone + 'static> MutableState<T> {
    pub fn value(&self) -> T {
        self.with(T::clone)
    }

    pub fn get(&self) -> T {
        self.value()
    }

    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableState")
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

pub(crate) struct DerivedStateInner<T: 'static> {
    id: usize,
    compute: Box<dyn Fn() -> T>,
    cached: RefCell<Option<T>>,
    dirty: Cell<bool>,
    computations: Cell<usize>,
    watchers: Watchers,
}

impl<T: 'static> Dependent for DerivedStateInner<T> {
    fn dependent_id(&self) -> usize {
        self.id
    }

    fn on_dependency_changed(&self) {
        if !self.dirty.replace(true) {
            self.watchers.notify();
        }
    }
}

impl<T: 'static> StateObject for DerivedStateInner<T> {
    fn state_id(&self) -> usize {
        self.id
    }

    fn add_dependent(&self, dependent: Weak<dyn Dependent>) {
        self.watchers.add(dependent);
    }

    fn invalidate_dependents(&self) {
        self.watchers.notify();
    }
}

/// Cached computation over other states. Recomputes lazily after one of
/// the states it read changes.
pub struct DerivedState<T: 'static> {
    inner: Rc<DerivedStateInner<T>>,
}

impl<T: 'static> Clone for DerivedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> DerivedState<T> {
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self {
            inner: Rc::new(DerivedStateInner {
                id: observer::next_observer_id(),
                compute: Box::new(compute),
                cached: RefCell::new(None),
                dirty: Cell::new(true),
                computations: Cell::new(0),
                watchers: Watchers::default(),
            }),
        }
    }

    /// How many times the computation has run.
    pub fn computations(&self) -> usize {
        self.inner.computations.get()
    }

    fn refresh(&self) {
        if !self.inner.dirty.get() && self.inner.cached.borrow().is_some() {
            return;
        }
        let dependent: Rc<dyn Dependent> = self.inner.clone();
        let value = observer::observe_reads(dependent, || (self.inner.compute)());
        *self.inner.cached.borrow_mut() = Some(value);
        self.inner.dirty.set(false);
        self.inner
            .computations
            .set(self.inner.computations.get() + 1);
    }
}

impl<T: Clone + 'static> DerivedState<T> {
    pub fn value(&self) -> T {
        observer::record_read(&*self.inner);
        self.refresh();
        match &*self.inner.cached.borrow() {
            Some(value) => value.clone(),
            None => (self.inner.compute)(),
        }
    }

    pub fn get(&self) -> T {
        self.value()
    }
}

enum StateSource<T: 'static> {
    Mutable(MutableState<T>),
    Derived(DerivedState<T>),
}

/// Read-only view over a mutable or derived state.
pub struct State<T: 'static> {
    source: StateSource<T>,
}

impl<T: 'static> Clone for State<T> {
    fn clone(&self) -> Self {
        let source = match &self.source {
            StateSource::Mutable(state) => StateSource::Mutable(state.clone()),
            StateSource::Derived(state) => StateSource::Derived(state.clone()),
        };
        Self { source }
    }
}

impl<T: Clone + 'static> State<T> {
    pub fn value(&self) -> T {
        match &self.source {
            StateSource::Mutable(state) => state.value(),
            StateSource::Derived(state) => state.value(),
        }
    }

    pub fn get(&self) -> T {
        self.value()
    }
}

impl<T: 'static> From<MutableState<T>> for State<T> {
    fn from(state: MutableState<T>) -> Self {
        Self {
            source: StateSource::Mutable(state),
        }
    }
}

impl<T: 'static> From<DerivedState<T>> for State<T> {
    fn from(state: DerivedState<T>) -> Self {
        Self {
            source: StateSource::Derived(state),
        }
    }
}

pub fn mutable_state_of<T: 'static>(initial: T) -> MutableState<T> {
    MutableState::new(initial)
}

/// A state cell remembered at this position.
#[track_caller]
pub fn use_state<T: 'static>(init: impl FnOnce() -> T) -> MutableState<T> {
    let site = caller_key();
    with_current_composer(|composer| {
        composer
            .remember_at(site, || MutableState::new(init()))
            .get()
    })
}

/// A derived state remembered at this position, rebuilt when `keys` change.
#[track_caller]
pub fn derived_state_of<K, T>(keys: K, compute: impl Fn() -> T + 'static) -> State<T>
where
    K: PartialEq + 'static,
    T: Clone + 'static,
{
    let site = caller_key();
    let derived = with_current_composer(|composer| {
        composer
            .remember_with_keys_at(site, keys, || DerivedState::new(compute))
            .get()
    });
    derived.into()
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
