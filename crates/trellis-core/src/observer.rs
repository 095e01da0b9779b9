//! Read observation.
//!
//! While a recompose scope body or a derived-state computation runs, it sits on
//! top of a thread-local observer stack. State reads register the top of the
//! stack as a dependent; writes later notify every registered dependent.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use smallvec::SmallVec;

/// Something that must be told when a state it read has changed.
pub trait Dependent {
    /// Stable identity used to deduplicate registrations.
    fn dependent_id(&self) -> usize;

    fn on_dependency_changed(&self);
}

/// Observable value that can record readers and notify them of writes.
pub trait StateObject {
    fn state_id(&self) -> usize;

    fn add_dependent(&self, dependent: Weak<dyn Dependent>);

    fn invalidate_dependents(&self);
}

thread_local! {
    static OBSERVERS: RefCell<Vec<Option<Rc<dyn Dependent>>>> = const { RefCell::new(Vec::new()) };
}

static NEXT_OBSERVER_ID: AtomicUsize = AtomicUsize::new(1);

/// Allocates an id shared by every kind of dependent so watcher lists can
/// deduplicate across scopes and derived states.
pub(crate) fn next_observer_id() -> usize {
    NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn push(dependent: Option<Rc<dyn Dependent>>) {
    OBSERVERS.with(|stack| stack.borrow_mut().push(dependent));
}

pub(crate) fn pop() {
    OBSERVERS.with(|stack| {
        stack.borrow_mut().pop();
    });
}

pub(crate) fn depth() -> usize {
    OBSERVERS.with(|stack| stack.borrow().len())
}

/// Drops observers pushed after `depth`; used after a pass unwinds.
pub(crate) fn truncate(depth: usize) {
    OBSERVERS.with(|stack| stack.borrow_mut().truncate(depth));
}

struct ObserverGuard;

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        pop();
    }
}

/// Runs `block` with `dependent` registered as the reader of any state it touches.
pub fn observe_reads<R>(dependent: Rc<dyn Dependent>, block: impl FnOnce() -> R) -> R {
    push(Some(dependent));
    let _guard = ObserverGuard;
    block()
}

/// Runs `block` without recording reads, even inside a composing scope.
pub fn untracked<R>(block: impl FnOnce() -> R) -> R {
    push(None);
    let _guard = ObserverGuard;
    block()
}

pub(crate) fn current_dependent() -> Option<Rc<dyn Dependent>> {
    OBSERVERS.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Registers the current observer (if any) as a reader of `state`.
pub fn record_read(state: &dyn StateObject) {
    if let Some(dependent) = current_dependent() {
        state.add_dependent(Rc::downgrade(&dependent));
    }
}

/// Watcher list shared by state cells and derived states.
#[derive(Default)]
pub(crate) struct Watchers {
    entries: RefCell<SmallVec<[Weak<dyn Dependent>; 4]>>,
}

impl Watchers {
    pub(crate) fn add(&self, dependent: Weak<dyn Dependent>) {
        let Some(strong) = dependent.upgrade() else {
            return;
        };
        let id = strong.dependent_id();
        let mut entries = self.entries.borrow_mut();
        entries.retain(|w| w.strong_count() > 0);
        let known = entries
            .iter()
            .filter_map(Weak::upgrade)
            .any(|existing| existing.dependent_id() == id);
        if !known {
            entries.push(dependent);
        }
    }

    /// Notifies every live watcher. The list is cleared first: readers
    /// re-register on their next read.
    pub(crate) fn notify(&self) {
        let live: SmallVec<[Rc<dyn Dependent>; 4]> = {
            let mut entries = self.entries.borrow_mut();
            let live = entries.iter().filter_map(Weak::upgrade).collect();
            entries.clear();
            live
        };
        for dependent in live {
            dependent.on_dependency_changed();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
