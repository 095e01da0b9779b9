//! Side effects tied to composition lifetime.
//!
//! Effect bodies run after the pass that scheduled them, never during it. An
//! effect keyed by a value re-launches when the key changes and is cancelled
//! when its group leaves the composition. Panics inside effect bodies, async
//! polls and cleanups are caught and logged so one failing effect cannot take
//! the UI thread down.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::{hash_key, with_current_composer, Key, RuntimeHandle, TaskHandle};

type Cleanup = Box<dyn FnOnce()>;

fn run_isolated(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("{what} panicked; effect abandoned");
    }
}

#[derive(Default)]
struct LaunchedEffectState {
    key: Option<Key>,
    cancel: Option<LaunchedEffectCancellation>,
}

struct LaunchedEffectCancellation {
    runtime: RuntimeHandle,
    token: CancelToken,
    continuations: Rc<RefCell<Vec<u64>>>,
    cleanups: Rc<RefCell<Vec<Cleanup>>>,
}

#[derive(Default)]
struct LaunchedEffectAsyncState {
    key: Option<Key>,
    cancel: Option<LaunchedEffectCancellation>,
    task: Option<TaskHandle>,
}

impl LaunchedEffectCancellation {
    fn new(runtime: RuntimeHandle) -> (Self, LaunchedEffectScope) {
        let token = CancelToken::new();
        let continuations = Rc::new(RefCell::new(Vec::new()));
        let cleanups = Rc::new(RefCell::new(Vec::new()));
        let scope = LaunchedEffectScope {
            token: token.clone(),
            runtime: runtime.clone(),
            continuations: Rc::clone(&continuations),
            cleanups: Rc::clone(&cleanups),
        };
        let cancel = Self {
            runtime,
            token,
            continuations,
            cleanups,
        };
        (cancel, scope)
    }

    fn cancel(&self) {
        self.token.cancel();
        let pending: Vec<u64> = self.continuations.borrow_mut().drain(..).collect();
        for id in pending {
            self.runtime.cancel_ui_cont(id);
        }
        let cleanups: Vec<Cleanup> = self.cleanups.borrow_mut().drain(..).collect();
        for cleanup in cleanups.into_iter().rev() {
            run_isolated("effect cleanup", cleanup);
        }
    }
}

impl LaunchedEffectState {
    fn should_run(&self, key: Key) -> bool {
        self.key != Some(key)
    }

    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn launch(
        &mut self,
        runtime: RuntimeHandle,
        effect: impl FnOnce(LaunchedEffectScope) + 'static,
    ) {
        self.cancel_current();
        let (cancel, scope) = LaunchedEffectCancellation::new(runtime.clone());
        self.cancel = Some(cancel);
        runtime.enqueue_ui_task(Box::new(move || {
            if scope.is_active() {
                run_isolated("LaunchedEffect", || effect(scope));
            }
        }));
    }

    fn cancel_current(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl LaunchedEffectAsyncState {
    fn should_run(&self, key: Key) -> bool {
        self.key != Some(key)
    }

    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn launch(
        &mut self,
        runtime: RuntimeHandle,
        mk_future: impl FnOnce(LaunchedEffectScope) -> Pin<Box<dyn Future<Output = ()>>> + 'static,
    ) {
        self.cancel_current();
        let (cancel, scope) = LaunchedEffectCancellation::new(runtime.clone());
        let token = scope.token.clone();
        let future = match catch_unwind(AssertUnwindSafe(|| mk_future(scope))) {
            Ok(future) => future,
            Err(_) => {
                log::error!("LaunchedEffectAsync panicked while building its future");
                cancel.cancel();
                return;
            }
        };
        let isolated = Isolated { future };
        match runtime.spawn_ui(async move {
            isolated.await;
            token.cancel();
        }) {
            Some(handle) => {
                self.cancel = Some(cancel);
                self.task = Some(handle);
            }
            None => cancel.cancel(),
        }
    }

    fn cancel_current(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.cancel();
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for LaunchedEffectState {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

impl Drop for LaunchedEffectAsyncState {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

/// Completes as soon as the wrapped future panics instead of unwinding into
/// the runtime's task loop.
struct Isolated {
    future: Pin<Box<dyn Future<Output = ()>>>,
}

impl Future for Isolated {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let future = &mut self.future;
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(poll) => poll,
            Err(_) => {
                log::error!("LaunchedEffectAsync panicked while polling; task dropped");
                Poll::Ready(())
            }
        }
    }
}

#[derive(Clone)]
pub struct LaunchedEffectScope {
    token: CancelToken,
    runtime: RuntimeHandle,
    continuations: Rc<RefCell<Vec<u64>>>,
    cleanups: Rc<RefCell<Vec<Cleanup>>>,
}

impl LaunchedEffectScope {
    fn track_continuation(&self, id: u64) {
        self.continuations.borrow_mut().push(id);
    }

    fn release_continuation(&self, id: u64) {
        let mut continuations = self.continuations.borrow_mut();
        if let Some(index) = continuations.iter().position(|entry| *entry == id) {
            continuations.remove(index);
        }
    }

    pub fn is_active(&self) -> bool {
        self.token.is_active()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn runtime(&self) -> RuntimeHandle {
        self.runtime.clone()
    }

    /// Registers `cleanup` to run when the effect is cancelled. Runs it
    /// immediately when the effect already is.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        if !self.is_active() {
            run_isolated("effect cleanup", cleanup);
            return;
        }
        self.cleanups.borrow_mut().push(Box::new(cleanup));
    }

    /// Posts UI-only work that will execute on the runtime thread.
    pub fn post_ui(&self, task: impl FnOnce() + 'static) {
        if !self.is_active() {
            return;
        }
        let token = self.token.clone();
        self.runtime.enqueue_ui_task(Box::new(move || {
            if token.is_active() {
                run_isolated("effect UI task", task);
            }
        }));
    }

    /// Posts work from any thread to run on the UI thread.
    pub fn post_ui_send(&self, task: impl FnOnce() + Send + 'static) {
        if !self.is_active() {
            return;
        }
        let token = self.token.clone();
        self.runtime.post_ui(move || {
            if token.is_active() {
                run_isolated("effect UI task", task);
            }
        });
    }

    /// Runs `work` on a worker thread and hands its result to `on_ui` on the
    /// runtime thread, unless the effect was cancelled in between.
    pub fn launch_background<T, Work, Ui>(&self, work: Work, on_ui: Ui)
    where
        T: Send + 'static,
        Work: FnOnce(CancelToken) -> T + Send + 'static,
        Ui: FnOnce(T) + 'static,
    {
        if !self.is_active() {
            return;
        }
        let dispatcher = self.runtime.dispatcher();
        let token = self.token.clone();
        let continuation_scope = self.clone();
        let id_cell = Rc::new(Cell::new(0));
        let id_for_closure = Rc::clone(&id_cell);
        let continuation = move |value: T| {
            continuation_scope.release_continuation(id_for_closure.get());
            if continuation_scope.is_active() {
                run_isolated("background continuation", || on_ui(value));
            }
        };

        let Some(cont_id) = self.runtime.register_ui_cont(continuation) else {
            return;
        };
        id_cell.set(cont_id);
        self.track_continuation(cont_id);

        std::thread::spawn(move || {
            let value = match catch_unwind(AssertUnwindSafe(|| work(token.clone()))) {
                Ok(value) => value,
                Err(_) => {
                    log::error!("background effect work panicked");
                    return;
                }
            };
            if token.is_cancelled() {
                return;
            }
            dispatcher.post_invoke(cont_id, value);
        });
    }
}

/// Cooperative cancellation flag shared between an effect and its workers.
///
/// Blocking work is not interrupted; long-running loops should poll
/// [`CancelToken::is_cancelled`] and exit early.
#[derive(Clone, Debug)]
pub struct CancelToken {
    active: Arc<AtomicBool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        !self.active.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub fn __launched_effect_impl<K, F>(group_key: Key, keys: K, effect: F)
where
    K: Hash,
    F: FnOnce(LaunchedEffectScope) + 'static,
{
    // A group per call site keeps each effect's state apart, even in
    // conditional branches.
    with_current_composer(|composer| {
        composer.with_group(group_key, |composer| {
            let key_hash = hash_key(&keys);
            let state = composer.remember(LaunchedEffectState::default);
            if state.with(|state| state.should_run(key_hash)) {
                state.update(|state| state.set_key(key_hash));
                let runtime = composer.runtime_handle();
                let state_for_effect = state.clone();
                composer.register_side_effect(move || {
                    state_for_effect.update(|state| state.launch(runtime, effect));
                });
            }
        });
    });
}

#[macro_export]
macro_rules! LaunchedEffect {
    ($keys:expr, $effect:expr) => {
        $crate::__launched_effect_impl(
            $crate::location_key(file!(), line!(), column!()),
            $keys,
            $effect,
        )
    };
}

pub fn __launched_effect_async_impl<K, F>(group_key: Key, keys: K, mk_future: F)
where
    K: Hash,
    F: FnOnce(LaunchedEffectScope) -> Pin<Box<dyn Future<Output = ()>>> + 'static,
{
    with_current_composer(|composer| {
        composer.with_group(group_key, |composer| {
            let key_hash = hash_key(&keys);
            let state = composer.remember(LaunchedEffectAsyncState::default);
            if state.with(|state| state.should_run(key_hash)) {
                state.update(|state| state.set_key(key_hash));
                let runtime = composer.runtime_handle();
                let state_for_effect = state.clone();
                composer.register_side_effect(move || {
                    state_for_effect.update(|state| state.launch(runtime, mk_future));
                });
            }
        });
    });
}

#[macro_export]
macro_rules! LaunchedEffectAsync {
    ($keys:expr, $future:expr) => {
        $crate::__launched_effect_async_impl(
            $crate::location_key(file!(), line!(), column!()),
            $keys,
            $future,
        )
    };
}

#[derive(Default)]
struct DisposableEffectState {
    key: Option<Key>,
    cleanup: Option<Cleanup>,
}

impl DisposableEffectState {
    fn should_run(&self, key: Key) -> bool {
        self.key != Some(key)
    }

    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn set_cleanup(&mut self, cleanup: Option<Cleanup>) {
        self.cleanup = cleanup;
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            run_isolated("DisposableEffect cleanup", cleanup);
        }
    }
}

impl Drop for DisposableEffectState {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisposableEffectScope;

#[derive(Default)]
pub struct DisposableEffectResult {
    cleanup: Option<Cleanup>,
}

impl DisposableEffectScope {
    pub fn on_dispose(&self, cleanup: impl FnOnce() + 'static) -> DisposableEffectResult {
        DisposableEffectResult::new(cleanup)
    }
}

impl DisposableEffectResult {
    pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    fn into_cleanup(self) -> Option<Cleanup> {
        self.cleanup
    }
}

/// Runs `effect` after every successful pass that reaches this call.
#[allow(non_snake_case)]
pub fn SideEffect(effect: impl FnOnce() + 'static) {
    with_current_composer(|composer| composer.register_side_effect(effect));
}

pub fn __disposable_effect_impl<K, F>(group_key: Key, keys: K, effect: F)
where
    K: Hash,
    F: FnOnce(DisposableEffectScope) -> DisposableEffectResult + 'static,
{
    with_current_composer(|composer| {
        composer.with_group(group_key, |composer| {
            let key_hash = hash_key(&keys);
            let state = composer.remember(DisposableEffectState::default);
            if state.with(|state| state.should_run(key_hash)) {
                state.update(|state| {
                    state.run_cleanup();
                    state.set_key(key_hash);
                });
                let state_for_effect = state.clone();
                composer.register_side_effect(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| effect(DisposableEffectScope)));
                    match result {
                        Ok(result) => {
                            state_for_effect.update(|state| state.set_cleanup(result.into_cleanup()))
                        }
                        Err(_) => log::error!("DisposableEffect panicked; no cleanup registered"),
                    }
                });
            }
        });
    });
}

#[macro_export]
macro_rules! DisposableEffect {
    ($keys:expr, $effect:expr) => {
        $crate::__disposable_effect_impl(
            $crate::location_key(file!(), line!(), column!()),
            $keys,
            $effect,
        )
    };
}

#[cfg(test)]
#[path = "tests/effects_tests.rs"]
mod tests;
