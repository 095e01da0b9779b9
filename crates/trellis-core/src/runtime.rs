use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::task::{Context, Poll, Waker};
use std::thread::ThreadId;

use crate::collections::map::{HashMap, HashSet};
use crate::observer::StateObject;
use crate::platform::RuntimeScheduler;
use crate::subscriptions::SubscriptionRegistry;
use crate::{RecomposeScopeInner, ScopeId};

enum UiMessage {
    Task(Box<dyn FnOnce() + Send + 'static>),
    Invoke { id: u64, value: Box<dyn Any + Send> },
    Emit { sink: u64, value: Box<dyn Any + Send> },
}

type UiContinuation = Box<dyn FnOnce(Box<dyn Any>) + 'static>;
type UiSink = Rc<dyn Fn(Box<dyn Any>) + 'static>;

struct UiDispatcherInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    tx: mpsc::Sender<UiMessage>,
    pending: AtomicUsize,
}

impl UiDispatcherInner {
    fn send(&self, message: UiMessage) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(message).is_err() {
            // Runtime is gone; nothing will drain this message.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        self.scheduler.schedule_frame();
    }

    fn has_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }
}

struct PendingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let previous = self.counter.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "UI dispatcher pending count underflowed");
    }
}

/// Thread-safe entry point for handing work to the runtime thread.
///
/// Everything posted here executes, in order, the next time the runtime
/// drains its UI queue. This is how background producers serialize their
/// writes into state cells.
#[derive(Clone)]
pub struct UiDispatcher {
    inner: Arc<UiDispatcherInner>,
}

impl UiDispatcher {
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.send(UiMessage::Task(Box::new(task)));
    }

    pub fn post_invoke<T: Send + 'static>(&self, id: u64, value: T) {
        self.inner.send(UiMessage::Invoke {
            id,
            value: Box::new(value),
        });
    }

    /// Delivers `value` to a sink registered with [`RuntimeHandle::register_ui_sink`].
    pub fn emit<T: Send + 'static>(&self, sink: u64, value: T) {
        self.inner.send(UiMessage::Emit {
            sink,
            value: Box::new(value),
        });
    }

    pub fn has_pending(&self) -> bool {
        self.inner.has_pending()
    }
}

struct TaskEntry {
    id: u64,
    future: Pin<Box<dyn Future<Output = ()> + 'static>>,
}

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    needs_frame: Cell<bool>,
    invalid_scopes: RefCell<HashSet<ScopeId>>,
    scope_queue: RefCell<Vec<(ScopeId, Weak<RecomposeScopeInner>)>>,
    pending_writes: RefCell<Vec<Rc<dyn StateObject>>>,
    composing: Cell<usize>,
    ui_dispatcher: Arc<UiDispatcherInner>,
    ui_rx: RefCell<mpsc::Receiver<UiMessage>>,
    local_tasks: RefCell<VecDeque<Box<dyn FnOnce() + 'static>>>,
    ui_conts: RefCell<HashMap<u64, UiContinuation>>,
    ui_sinks: RefCell<HashMap<u64, UiSink>>,
    next_ui_id: Cell<u64>,
    ui_thread_id: ThreadId,
    tasks: RefCell<Vec<TaskEntry>>,
    next_task_id: Cell<u64>,
    task_waker: RefCell<Option<Waker>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        let (tx, rx) = mpsc::channel();
        let dispatcher = Arc::new(UiDispatcherInner {
            scheduler: Arc::clone(&scheduler),
            tx,
            pending: AtomicUsize::new(0),
        });
        Self {
            scheduler,
            needs_frame: Cell::new(false),
            invalid_scopes: RefCell::new(HashSet::default()),
            scope_queue: RefCell::new(Vec::new()),
            pending_writes: RefCell::new(Vec::new()),
            composing: Cell::new(0),
            ui_dispatcher: dispatcher,
            ui_rx: RefCell::new(rx),
            local_tasks: RefCell::new(VecDeque::new()),
            ui_conts: RefCell::new(HashMap::default()),
            ui_sinks: RefCell::new(HashMap::default()),
            next_ui_id: Cell::new(1),
            ui_thread_id: std::thread::current().id(),
            tasks: RefCell::new(Vec::new()),
            next_task_id: Cell::new(1),
            task_waker: RefCell::new(None),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        }
    }

    fn init_task_waker(this: &Rc<Self>) {
        let waker = RuntimeTaskWaker {
            scheduler: Arc::clone(&this.scheduler),
        };
        *this.task_waker.borrow_mut() = Some(futures_task::waker(Arc::new(waker)));
    }

    fn schedule(&self) {
        self.needs_frame.set(true);
        self.scheduler.schedule_frame();
    }

    fn next_ui_id(&self) -> u64 {
        let id = self.next_ui_id.get();
        self.next_ui_id.set(id + 1);
        id
    }

    fn register_invalid_scope(&self, id: ScopeId, scope: Weak<RecomposeScopeInner>) {
        if self.invalid_scopes.borrow_mut().insert(id) {
            self.scope_queue.borrow_mut().push((id, scope));
            self.schedule();
        }
    }

    fn mark_scope_recomposed(&self, id: ScopeId) {
        self.invalid_scopes.borrow_mut().remove(&id);
    }

    fn take_invalidated_scopes(&self) -> Vec<(ScopeId, Weak<RecomposeScopeInner>)> {
        let pending: Vec<_> = self.scope_queue.borrow_mut().drain(..).collect();
        let invalid = self.invalid_scopes.borrow();
        pending
            .into_iter()
            .filter(|(id, _)| invalid.contains(id))
            .collect()
    }

    fn has_invalid_scopes(&self) -> bool {
        !self.invalid_scopes.borrow().is_empty()
    }

    fn record_write(&self, state: Rc<dyn StateObject>) {
        let mut writes = self.pending_writes.borrow_mut();
        let id = state.state_id();
        if !writes.iter().any(|existing| existing.state_id() == id) {
            writes.push(state);
        }
    }

    fn report_changed(&self) {
        loop {
            let writes = std::mem::take(&mut *self.pending_writes.borrow_mut());
            if writes.is_empty() {
                break;
            }
            for state in writes {
                state.invalidate_dependents();
            }
        }
    }

    fn enqueue_ui_task(&self, task: Box<dyn FnOnce() + 'static>) {
        self.local_tasks.borrow_mut().push_back(task);
        self.schedule();
    }

    fn spawn_ui_task(&self, future: Pin<Box<dyn Future<Output = ()> + 'static>>) -> u64 {
        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);
        self.tasks.borrow_mut().push(TaskEntry { id, future });
        self.schedule();
        id
    }

    fn cancel_task(&self, id: u64) -> bool {
        let mut tasks = self.tasks.borrow_mut();
        let before = tasks.len();
        tasks.retain(|entry| entry.id != id);
        before != tasks.len()
    }

    fn poll_async_tasks(&self) -> bool {
        let Some(waker) = self.task_waker.borrow().clone() else {
            return false;
        };
        let mut cx = Context::from_waker(&waker);
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        let mut pending = Vec::with_capacity(tasks.len());
        let mut made_progress = false;
        for mut entry in tasks {
            match entry.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => made_progress = true,
                Poll::Pending => pending.push(entry),
            }
        }
        if !pending.is_empty() {
            // Tasks spawned while polling were pushed into the emptied vec.
            let mut tasks = self.tasks.borrow_mut();
            pending.append(&mut tasks);
            *tasks = pending;
        }
        made_progress
    }

    fn drain_ui(&self) {
        loop {
            let mut executed = false;

            let messages: Vec<UiMessage> = self.ui_rx.borrow().try_iter().collect();
            for message in messages {
                executed = true;
                let _guard = PendingGuard {
                    counter: &self.ui_dispatcher.pending,
                };
                match message {
                    UiMessage::Task(task) => task(),
                    UiMessage::Invoke { id, value } => self.invoke_ui_cont(id, value),
                    UiMessage::Emit { sink, value } => self.emit_to_sink(sink, value),
                }
            }

            loop {
                let task = self.local_tasks.borrow_mut().pop_front();
                match task {
                    Some(task) => {
                        executed = true;
                        task();
                    }
                    None => break,
                }
            }

            if self.poll_async_tasks() {
                executed = true;
            }

            if !executed {
                break;
            }
        }
    }

    fn has_pending_ui(&self) -> bool {
        let local_pending = self
            .local_tasks
            .try_borrow()
            .map(|tasks| !tasks.is_empty())
            .unwrap_or(true);
        let async_pending = self
            .tasks
            .try_borrow()
            .map(|tasks| !tasks.is_empty())
            .unwrap_or(true);
        local_pending || async_pending || self.ui_dispatcher.has_pending()
    }

    fn register_ui_cont<T: 'static>(&self, f: impl FnOnce(T) + 'static) -> u64 {
        debug_assert_eq!(
            std::thread::current().id(),
            self.ui_thread_id,
            "UI continuation registered off the runtime thread",
        );
        let id = self.next_ui_id();
        self.ui_conts.borrow_mut().insert(
            id,
            Box::new(move |value: Box<dyn Any>| match value.downcast::<T>() {
                Ok(value) => f(*value),
                Err(_) => log::error!("UI continuation {id} received a value of the wrong type"),
            }),
        );
        id
    }

    fn invoke_ui_cont(&self, id: u64, value: Box<dyn Any + Send>) {
        let callback = self.ui_conts.borrow_mut().remove(&id);
        if let Some(callback) = callback {
            callback(value);
        }
    }

    fn register_ui_sink<T: 'static>(&self, f: impl Fn(T) + 'static) -> u64 {
        let id = self.next_ui_id();
        self.ui_sinks.borrow_mut().insert(
            id,
            Rc::new(move |value: Box<dyn Any>| match value.downcast::<T>() {
                Ok(value) => f(*value),
                Err(_) => log::error!("UI sink {id} received a value of the wrong type"),
            }),
        );
        id
    }

    fn emit_to_sink(&self, id: u64, value: Box<dyn Any + Send>) {
        let sink = self.ui_sinks.borrow().get(&id).cloned();
        if let Some(sink) = sink {
            sink(value);
        }
    }
}

/// Owns the per-composition runtime: invalidation queue, UI task queues,
/// async effect tasks and the subscription registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        let inner = Rc::new(RuntimeInner::new(scheduler));
        RuntimeInner::init_task_waker(&inner);
        let runtime = Self { inner };
        let handle = runtime.handle();
        LAST_RUNTIME.with(|slot| *slot.borrow_mut() = Some(handle));
        runtime
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Rc::downgrade(&self.inner),
            dispatcher: UiDispatcher {
                inner: Arc::clone(&self.inner.ui_dispatcher),
            },
            ui_thread_id: self.inner.ui_thread_id,
        }
    }

    pub fn needs_frame(&self) -> bool {
        self.inner.needs_frame.get() || self.inner.ui_dispatcher.has_pending()
    }

    pub fn set_needs_frame(&self, value: bool) {
        self.inner.needs_frame.set(value);
    }
}

/// Weak, cloneable reference to a [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Weak<RuntimeInner>,
    dispatcher: UiDispatcher,
    ui_thread_id: ThreadId,
}

/// Handle to a future spawned with [`RuntimeHandle::spawn_ui`].
pub struct TaskHandle {
    id: u64,
    runtime: RuntimeHandle,
}

impl TaskHandle {
    pub fn cancel(self) {
        self.runtime.cancel_task(self.id);
    }
}

impl RuntimeHandle {
    fn with_inner<R>(&self, f: impl FnOnce(&RuntimeInner) -> R) -> Option<R> {
        self.inner.upgrade().map(|inner| f(&inner))
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn schedule(&self) {
        self.with_inner(|inner| inner.schedule());
    }

    /// Queues a UI-thread closure; it may capture `Rc`/`RefCell` values.
    pub fn enqueue_ui_task(&self, task: Box<dyn FnOnce() + 'static>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.enqueue_ui_task(task);
        } else {
            task();
        }
    }

    pub fn spawn_ui<F>(&self, future: F) -> Option<TaskHandle>
    where
        F: Future<Output = ()> + 'static,
    {
        self.with_inner(|inner| inner.spawn_ui_task(Box::pin(future)))
            .map(|id| TaskHandle {
                id,
                runtime: self.clone(),
            })
    }

    pub fn cancel_task(&self, id: u64) -> bool {
        self.with_inner(|inner| inner.cancel_task(id))
            .unwrap_or(false)
    }

    /// Posts work from any thread; it runs on the runtime thread.
    pub fn post_ui(&self, task: impl FnOnce() + Send + 'static) {
        self.dispatcher.post(task);
    }

    pub fn register_ui_cont<T: 'static>(&self, f: impl FnOnce(T) + 'static) -> Option<u64> {
        self.with_inner(|inner| inner.register_ui_cont(f))
    }

    pub fn cancel_ui_cont(&self, id: u64) {
        self.with_inner(|inner| inner.ui_conts.borrow_mut().remove(&id));
    }

    /// Registers a reusable UI-thread receiver for values sent with
    /// [`UiDispatcher::emit`].
    pub fn register_ui_sink<T: 'static>(&self, f: impl Fn(T) + 'static) -> Option<u64> {
        self.with_inner(|inner| inner.register_ui_sink(f))
    }

    pub fn remove_ui_sink(&self, id: u64) {
        self.with_inner(|inner| inner.ui_sinks.borrow_mut().remove(&id));
    }

    pub fn drain_ui(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.drain_ui();
        }
    }

    pub fn has_pending_ui(&self) -> bool {
        self.with_inner(|inner| inner.has_pending_ui())
            .unwrap_or_else(|| self.dispatcher.has_pending())
    }

    pub(crate) fn register_invalid_scope(&self, id: ScopeId, scope: Weak<RecomposeScopeInner>) {
        self.with_inner(|inner| inner.register_invalid_scope(id, scope));
    }

    pub(crate) fn mark_scope_recomposed(&self, id: ScopeId) {
        self.with_inner(|inner| inner.mark_scope_recomposed(id));
    }

    pub(crate) fn take_invalidated_scopes(&self) -> Vec<(ScopeId, Weak<RecomposeScopeInner>)> {
        self.with_inner(|inner| inner.take_invalidated_scopes())
            .unwrap_or_default()
    }

    pub fn has_invalid_scopes(&self) -> bool {
        self.with_inner(|inner| inner.has_invalid_scopes())
            .unwrap_or(false)
    }

    /// Records that `state` changed. Dependents are notified by the next
    /// [`report_changed`](Self::report_changed).
    pub fn record_write(&self, state: Rc<dyn StateObject>) {
        match self.inner.upgrade() {
            Some(inner) => inner.record_write(state),
            None => state.invalidate_dependents(),
        }
    }

    /// Notifies the dependents of every recorded write, enqueueing their scopes.
    pub fn report_changed(&self) {
        self.with_inner(|inner| inner.report_changed());
    }

    pub fn is_composing(&self) -> bool {
        self.with_inner(|inner| inner.composing.get() > 0)
            .unwrap_or(false)
    }

    pub(crate) fn begin_composing(&self) -> ComposingGuard {
        self.with_inner(|inner| inner.composing.set(inner.composing.get() + 1));
        ComposingGuard {
            runtime: self.clone(),
        }
    }

    pub fn subscriptions(&self) -> Option<Arc<SubscriptionRegistry>> {
        self.with_inner(|inner| Arc::clone(&inner.subscriptions))
    }

    pub fn assert_ui_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.ui_thread_id,
            "state mutated off the runtime's UI thread"
        );
    }

    pub fn dispatcher(&self) -> UiDispatcher {
        self.dispatcher.clone()
    }
}

/// Marks the runtime as composing; writes made meanwhile are batched until
/// the pass ends.
pub(crate) struct ComposingGuard {
    runtime: RuntimeHandle,
}

impl Drop for ComposingGuard {
    fn drop(&mut self) {
        self.runtime
            .with_inner(|inner| inner.composing.set(inner.composing.get().saturating_sub(1)));
    }
}

struct RuntimeTaskWaker {
    scheduler: Arc<dyn RuntimeScheduler>,
}

impl futures_task::ArcWake for RuntimeTaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.scheduler.schedule_frame();
    }
}

thread_local! {
    static ACTIVE_RUNTIMES: RefCell<Vec<RuntimeHandle>> = const { RefCell::new(Vec::new()) };
    static LAST_RUNTIME: RefCell<Option<RuntimeHandle>> = const { RefCell::new(None) };
}

/// The runtime of the innermost composition pass, falling back to the most
/// recently created runtime on this thread.
pub fn current_runtime_handle() -> Option<RuntimeHandle> {
    if let Some(handle) = ACTIVE_RUNTIMES.with(|stack| stack.borrow().last().cloned()) {
        return Some(handle);
    }
    LAST_RUNTIME.with(|slot| slot.borrow().clone().filter(RuntimeHandle::is_alive))
}

pub(crate) fn push_active_runtime(handle: &RuntimeHandle) -> ActiveRuntimeGuard {
    ACTIVE_RUNTIMES.with(|stack| stack.borrow_mut().push(handle.clone()));
    LAST_RUNTIME.with(|slot| *slot.borrow_mut() = Some(handle.clone()));
    ActiveRuntimeGuard
}

pub(crate) struct ActiveRuntimeGuard;

impl Drop for ActiveRuntimeGuard {
    fn drop(&mut self) {
        ACTIVE_RUNTIMES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
pub(crate) struct TestRuntime {
    runtime: Runtime,
}

#[cfg(test)]
impl TestRuntime {
    pub(crate) fn new() -> Self {
        Self {
            runtime: Runtime::new(Arc::new(crate::DefaultScheduler)),
        }
    }

    pub(crate) fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub(crate) fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
