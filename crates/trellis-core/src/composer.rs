use std::any::type_name;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::node::{ApplierHost, Node, SlotsHost};
use crate::observer::{self, StateObject};
use crate::runtime::{self, RuntimeHandle};
use crate::slot_table::{NodeProbe, Slot, SlotKind, SlotTable, StartGroup, ValueProbe};
use crate::{caller_key, composer_context, hash_key, Applier, Key, NodeError, NodeId, Owned, RecomposeScope};

/// One out-of-order slot visit, repaired in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMisuse {
    pub index: usize,
    pub expected: &'static str,
    pub found: SlotKind,
}

impl fmt::Display for SlotMisuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} held a {:?} where {} was requested",
            self.index, self.found, self.expected
        )
    }
}

/// A value slot that runs its callback when the slot is disposed.
#[derive(Default)]
pub(crate) struct DisposableSlot {
    callback: Option<Box<dyn FnOnce()>>,
    registered: bool,
}

impl DisposableSlot {
    fn arm(&mut self, callback: Box<dyn FnOnce()>) {
        if !self.registered {
            self.callback = Some(callback);
            self.registered = true;
        }
    }

    fn run(&mut self) {
        if let Some(callback) = self.callback.take() {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                log::error!("disposable callback panicked");
            }
        }
    }
}

/// Remembered value guarded by the keys it was computed from.
struct KeyedSlot<K, T> {
    entry: Option<(K, Owned<T>)>,
}

impl<K: PartialEq, T> KeyedSlot<K, T> {
    fn lookup(&self, keys: &K) -> Option<Owned<T>> {
        match &self.entry {
            Some((stored, value)) if stored == keys => Some(value.clone()),
            _ => None,
        }
    }
}

struct ParentFrame {
    id: NodeId,
    previous: Vec<NodeId>,
    new_children: Vec<NodeId>,
}

pub(crate) struct ComposerCore {
    slots: Rc<SlotsHost>,
    applier: Rc<dyn ApplierHost>,
    runtime: RuntimeHandle,
    parent_stack: RefCell<Vec<ParentFrame>>,
    scope_stack: RefCell<Vec<RecomposeScope>>,
    root: Cell<Option<NodeId>>,
    side_effects: RefCell<Vec<Box<dyn FnOnce()>>>,
    misuses: RefCell<Vec<SlotMisuse>>,
    _not_send: PhantomData<*const ()>,
}

/// Cursor over a composition's slot table for one pass.
#[derive(Clone)]
pub struct Composer {
    core: Rc<ComposerCore>,
}

impl Composer {
    pub(crate) fn new(
        slots: Rc<SlotsHost>,
        applier: Rc<dyn ApplierHost>,
        runtime: RuntimeHandle,
        root: Option<NodeId>,
    ) -> Self {
        Self {
            core: Rc::new(ComposerCore {
                slots,
                applier,
                runtime,
                parent_stack: RefCell::new(Vec::new()),
                scope_stack: RefCell::new(Vec::new()),
                root: Cell::new(root),
                side_effects: RefCell::new(Vec::new()),
                misuses: RefCell::new(Vec::new()),
                _not_send: PhantomData,
            }),
        }
    }

    pub(crate) fn from_core(core: Rc<ComposerCore>) -> Self {
        Self { core }
    }

    pub(crate) fn clone_core(&self) -> Rc<ComposerCore> {
        Rc::clone(&self.core)
    }

    /// Makes this composer and its runtime current for the duration of `f`.
    pub(crate) fn install<R>(&self, f: impl FnOnce(&Composer) -> R) -> R {
        let _composer = composer_context::enter(self);
        let _runtime = runtime::push_active_runtime(&self.core.runtime);
        let _composing = self.core.runtime.begin_composing();
        f(self)
    }

    fn slots(&self) -> std::cell::Ref<'_, SlotTable> {
        self.core.slots.borrow()
    }

    fn slots_mut(&self) -> RefMut<'_, SlotTable> {
        self.core.slots.borrow_mut()
    }

    fn borrow_applier(&self) -> RefMut<'_, dyn Applier> {
        self.core.applier.borrow_dyn()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.core.runtime.clone()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.core.root.get()
    }

    /// True while the current group is being created rather than revisited.
    pub fn inserting(&self) -> bool {
        self.slots().inserting()
    }


    pub fn start_group(&self, key: Key) -> StartGroup {
        let group = self.slots_mut().begin_group(key);
        let runtime = self.runtime_handle();
        let index = self.next_slot(|| RecomposeScope::new(runtime));
        let scope = match self.slot_value::<RecomposeScope>(index) {
            Some(scope) => scope,
            None => {
                let scope = RecomposeScope::new(self.runtime_handle());
                self.set_slot_value(index, scope.clone());
                scope
            }
        };
        scope.set_parent(self.core.scope_stack.borrow().last());
        self.slots_mut().set_group_scope(group.index, scope.id());
        observer::push(Some(scope.as_dependent()));
        self.core.scope_stack.borrow_mut().push(scope);
        group
    }

    pub fn end_group(&self) {
        let scope = self.core.scope_stack.borrow_mut().pop();
        observer::pop();
        if let Some(scope) = scope {
            scope.mark_recomposed();
        }
        let removed = self.slots_mut().end_group();
        self.dispose_slots(removed);
    }

    pub fn with_group<R>(&self, key: Key, f: impl FnOnce(&Composer) -> R) -> R {
        self.start_group(key);
        let result = f(self);
        self.end_group();
        result
    }

    /// Runs `f` in a group whose identity comes from `key` rather than call
    /// position, so reordered siblings keep their slots.
    pub fn with_key<K: Hash + ?Sized, R>(&self, key: &K, f: impl FnOnce(&Composer) -> R) -> R {
        self.with_group(hash_key(key), f)
    }

    /// A group whose body can be re-run on its own by the recomposer. The
    /// owning node (if any) is recorded so a recompose can rebuild its
    /// children in place.
    pub fn with_content_group(&self, key: Key, content: Rc<dyn Fn()>) {
        self.with_group(key, |composer| {
            if let Some(scope) = composer.current_recompose_scope() {
                let parent = composer.core.parent_stack.borrow().last().map(|frame| frame.id);
                scope.set_parent_node(parent);
                let body = Rc::clone(&content);
                scope.set_recompose(Box::new(move |_composer: &Composer| body()));
            }
            content();
        });
    }

    pub fn current_recompose_scope(&self) -> Option<RecomposeScope> {
        self.core.scope_stack.borrow().last().cloned()
    }

    /// Keeps the rest of the current group as it was and re-attaches its
    /// direct child nodes to the parent being rebuilt.
    pub fn skip_current_group(&self) {
        let nodes = self.slots().nodes_in_current_group();
        self.slots_mut().skip_current_group();
        let parent = self.core.parent_stack.borrow().last().map(|frame| frame.id);
        let direct: Vec<NodeId> = {
            let applier = self.borrow_applier();
            nodes
                .into_iter()
                .filter(|id| {
                    applier
                        .get(*id)
                        .map(|node| node.parent() == parent)
                        .unwrap_or(false)
                })
                .collect()
        };
        for id in direct {
            self.attach_to_parent(id);
        }
    }


    /// Returns the index of the next value slot, reusing it when it holds a
    /// `T` and allocating it with `init` otherwise.
    pub fn next_slot<T: 'static>(&self, init: impl FnOnce() -> T) -> usize {
        self.claim_slot(None, init)
    }

    /// Like [`next_slot`](Self::next_slot), but the slot also remembers
    /// `tag`. Revisiting it with another tag is reported as misuse even when
    /// the types agree.
    pub fn next_tagged_slot<T: 'static>(&self, tag: Key, init: impl FnOnce() -> T) -> usize {
        self.claim_slot(Some(tag), init)
    }

    fn claim_slot<T: 'static>(&self, tag: Option<Key>, init: impl FnOnce() -> T) -> usize {
        let probe = self.slots().probe_value::<T>(tag);
        match probe {
            ValueProbe::Matches => self.slots_mut().advance(),
            ValueProbe::Missing => {
                let value = init();
                self.slots_mut().insert_value(Box::new(value), tag)
            }
            ValueProbe::TypeMismatch | ValueProbe::KeyMismatch => {
                let value = init();
                let (index, old) = self.slots_mut().replace_value(Box::new(value), tag);
                self.report_misuse(index, type_name::<T>(), SlotKind::Value);
                self.dispose_slots(vec![old]);
                index
            }
            ValueProbe::KindMismatch(found) => {
                let value = init();
                let index = self.slots_mut().insert_value(Box::new(value), tag);
                self.report_misuse(index, type_name::<T>(), found);
                index
            }
        }
    }

    pub fn slot_value<T: Clone + 'static>(&self, index: usize) -> Option<T> {
        self.slots().value::<T>(index).cloned()
    }

    /// Runs `f` against a value slot. `f` must not call back into the composer.
    pub fn with_slot_value<T: 'static, R>(&self, index: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slots = self.slots_mut();
        slots.value_mut::<T>(index).map(f)
    }

    pub fn set_slot_value<T: 'static>(&self, index: usize, value: T) {
        let previous = self.slots_mut().write_value(index, Box::new(value));
        drop(previous);
    }

    #[track_caller]
    pub fn remember<T: 'static>(&self, init: impl FnOnce() -> T) -> Owned<T> {
        self.remember_at(caller_key(), init)
    }

    /// [`remember`](Self::remember) with an explicit call-site key.
    pub fn remember_at<T: 'static>(&self, site: Key, init: impl FnOnce() -> T) -> Owned<T> {
        let index = self.next_tagged_slot(site, || Owned::new(init()));
        match self.slot_value::<Owned<T>>(index) {
            Some(value) => value,
            None => Owned::new(self.unreachable_slot(index)),
        }
    }

    #[track_caller]
    pub fn remember_with_keys<K, T>(&self, keys: K, calc: impl FnOnce() -> T) -> Owned<T>
    where
        K: PartialEq + 'static,
        T: 'static,
    {
        self.remember_with_keys_at(caller_key(), keys, calc)
    }

    pub fn remember_with_keys_at<K, T>(
        &self,
        site: Key,
        keys: K,
        calc: impl FnOnce() -> T,
    ) -> Owned<T>
    where
        K: PartialEq + 'static,
        T: 'static,
    {
        let index = self.next_tagged_slot(site, || KeyedSlot::<K, T> { entry: None });
        let cached = self
            .with_slot_value(index, |slot: &mut KeyedSlot<K, T>| slot.lookup(&keys))
            .flatten();
        if let Some(value) = cached {
            return value;
        }
        let value = Owned::new(calc());
        let stored = value.clone();
        let previous = self
            .with_slot_value(index, |slot: &mut KeyedSlot<K, T>| {
                slot.entry.replace((keys, stored))
            })
            .flatten();
        drop(previous);
        value
    }

    #[track_caller]
    pub fn register_disposable(&self, dispose: impl FnOnce() + 'static) {
        self.register_disposable_at(caller_key(), dispose);
    }

    pub fn register_disposable_at(&self, site: Key, dispose: impl FnOnce() + 'static) {
        let index = self.next_tagged_slot(site, DisposableSlot::default);
        self.with_slot_value(index, |slot: &mut DisposableSlot| slot.arm(Box::new(dispose)));
    }


    pub fn record_read(&self, state: &dyn StateObject) {
        observer::record_read(state);
    }

    pub fn record_write(&self, state: Rc<dyn StateObject>) {
        self.core.runtime.record_write(state);
    }

    pub fn report_changed(&self) {
        self.core.runtime.report_changed();
    }

    /// Queues `effect` to run once the current pass has finished.
    pub fn register_side_effect(&self, effect: impl FnOnce() + 'static) {
        self.core.side_effects.borrow_mut().push(Box::new(effect));
    }

    pub(crate) fn take_side_effects(&self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut *self.core.side_effects.borrow_mut())
    }

    pub(crate) fn take_misuses(&self) -> Vec<SlotMisuse> {
        std::mem::take(&mut *self.core.misuses.borrow_mut())
    }

    fn report_misuse(&self, index: usize, expected: &'static str, found: SlotKind) {
        let misuse = SlotMisuse {
            index,
            expected,
            found,
        };
        log::warn!("{misuse}");
        self.core.misuses.borrow_mut().push(misuse);
    }

    fn unreachable_slot<T>(&self, index: usize) -> T {
        panic!("slot {index} does not hold a {}", type_name::<T>())
    }


    pub fn emit_node<N: Node + 'static>(&self, init: impl FnOnce() -> N) -> NodeId {
        let probe = self.slots().probe_node();
        let id = match probe {
            NodeProbe::Existing(id) => {
                let reusable = {
                    let mut applier = self.borrow_applier();
                    match applier.get_mut(id) {
                        Ok(node) if node.as_any().is::<N>() => {
                            node.update();
                            true
                        }
                        _ => false,
                    }
                };
                if reusable {
                    self.slots_mut().advance();
                    id
                } else {
                    let fresh = self.create_node(init());
                    let old = self.slots_mut().replace_node(fresh);
                    self.dispose_slots(vec![old]);
                    fresh
                }
            }
            NodeProbe::KindMismatch(found) => {
                let fresh = self.create_node(init());
                let index = self.slots().cursor();
                self.slots_mut().insert_node(fresh);
                self.report_misuse(index, type_name::<N>(), found);
                fresh
            }
            NodeProbe::Missing => {
                let fresh = self.create_node(init());
                self.slots_mut().insert_node(fresh);
                fresh
            }
        };
        if crate::debug_enabled() {
            log::debug!("emit_node: #{id} as {} ({probe:?})", type_name::<N>());
        }
        self.attach_to_parent(id);
        id
    }

    fn create_node<N: Node + 'static>(&self, node: N) -> NodeId {
        let mut applier = self.borrow_applier();
        let id = applier.create(Box::new(node));
        if let Ok(node) = applier.get_mut(id) {
            node.set_node_id(id);
            node.mount();
        }
        id
    }

    fn attach_to_parent(&self, id: NodeId) {
        let mut stack = self.core.parent_stack.borrow_mut();
        match stack.last_mut() {
            Some(frame) => frame.new_children.push(id),
            None => self.core.root.set(Some(id)),
        }
    }

    pub fn with_node_mut<N: Node + 'static, R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut N) -> R,
    ) -> Result<R, NodeError> {
        let mut applier = self.borrow_applier();
        let node = applier.get_mut(id)?;
        let typed = node
            .as_any_mut()
            .downcast_mut::<N>()
            .ok_or(NodeError::TypeMismatch {
                id,
                expected: type_name::<N>(),
            })?;
        Ok(f(typed))
    }

    /// Nodes emitted until the matching [`pop_parent`](Self::pop_parent)
    /// become the children of `id`.
    pub fn push_parent(&self, id: NodeId) {
        let previous = self
            .borrow_applier()
            .get(id)
            .map(|node| node.children())
            .unwrap_or_default();
        self.core.parent_stack.borrow_mut().push(ParentFrame {
            id,
            previous,
            new_children: Vec::new(),
        });
    }

    pub fn pop_parent(&self) {
        let Some(frame) = self.core.parent_stack.borrow_mut().pop() else {
            return;
        };
        if frame.previous == frame.new_children {
            return;
        }
        let mut applier = self.borrow_applier();
        for child in frame
            .previous
            .iter()
            .filter(|child| !frame.new_children.contains(child))
        {
            if let Ok(node) = applier.get_mut(*child) {
                if node.parent() == Some(frame.id) {
                    node.on_removed_from_parent();
                }
            }
        }
        if let Ok(parent) = applier.get_mut(frame.id) {
            parent.update_children(&frame.new_children);
        }
        for child in &frame.new_children {
            if let Ok(node) = applier.get_mut(*child) {
                if node.parent() != Some(frame.id) {
                    node.on_attached_to_parent(frame.id);
                }
            }
        }
    }


    /// Re-runs the body of the nearest content group at or above `scope`.
    pub(crate) fn recompose_group(&self, scope: &RecomposeScope) {
        let Some(target) = scope.recompose_target() else {
            log::debug!("scope {} has no recomposable ancestor", scope.id());
            scope.mark_recomposed();
            return;
        };
        if !target.is_active() {
            scope.mark_recomposed();
            return;
        }
        if !self.slots_mut().begin_recompose_at_scope(target.id()) {
            target.mark_recomposed();
            scope.mark_recomposed();
            return;
        }
        // Step over the scope slot that opens the group.
        let runtime = self.runtime_handle();
        self.next_slot(|| RecomposeScope::new(runtime));

        let parent_node = target.parent_node();
        if crate::debug_enabled() {
            log::debug!(
                "recompose: scope {} via target {} under node {parent_node:?}",
                scope.id(),
                target.id()
            );
        }
        if let Some(node) = parent_node {
            self.push_parent(node);
        }
        self.core.scope_stack.borrow_mut().push(target.clone());
        observer::push(Some(target.as_dependent()));
        target.run_recompose(self);
        observer::pop();
        self.core.scope_stack.borrow_mut().pop();
        if parent_node.is_some() {
            self.pop_parent();
        }
        target.mark_recomposed();
        let removed = self.slots_mut().end_recompose();
        self.dispose_slots(removed);
    }

    /// Closes the root level of a full pass.
    pub(crate) fn finish_pass(&self) {
        let removed = self.slots_mut().finish_pass();
        self.dispose_slots(removed);
    }

    pub(crate) fn dispose_slots(&self, removed: Vec<Slot>) {
        dispose_slots(removed, &*self.core.applier);
    }
}

/// Releases removed slots, innermost groups first and later slots before
/// earlier ones at the same depth.
pub(crate) fn dispose_slots(removed: Vec<Slot>, applier: &dyn ApplierHost) {
    if removed.is_empty() {
        return;
    }
    let depths = slot_depths(&removed);
    let mut order: Vec<usize> = (0..removed.len()).collect();
    order.sort_by(|a, b| depths[*b].cmp(&depths[*a]).then(b.cmp(a)));

    let mut slots: Vec<Option<Slot>> = removed.into_iter().map(Some).collect();
    for index in order {
        let Some(slot) = slots[index].take() else {
            continue;
        };
        match slot {
            Slot::Value { mut data, .. } => {
                if let Some(scope) = data.downcast_ref::<RecomposeScope>() {
                    scope.deactivate();
                }
                if let Some(disposable) = data.downcast_mut::<DisposableSlot>() {
                    disposable.run();
                }
                if catch_unwind(AssertUnwindSafe(move || drop(data))).is_err() {
                    log::error!("remembered value panicked while dropping");
                }
            }
            Slot::Node { id } => {
                let mut applier = applier.borrow_dyn();
                if let Ok(node) = applier.get_mut(id) {
                    node.unmount();
                }
                if let Err(err) = applier.remove(id) {
                    log::trace!("node already released: {err}");
                }
            }
            Slot::Group { .. } => {}
        }
    }
}

fn slot_depths(slots: &[Slot]) -> Vec<usize> {
    let mut depths = Vec::with_capacity(slots.len());
    // Exclusive end index of every open group.
    let mut open: Vec<usize> = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        while open.last().is_some_and(|end| *end <= index) {
            open.pop();
        }
        depths.push(open.len());
        if let Slot::Group { len, .. } = slot {
            open.push(index + 1 + len);
        }
    }
    depths
}

#[cfg(test)]
#[path = "tests/composer_tests.rs"]
mod tests;
