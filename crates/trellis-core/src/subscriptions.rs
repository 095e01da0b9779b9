//! Long-lived producers feeding composition state from other threads.
//!
//! Every runtime owns one [`SubscriptionRegistry`]. A producer is registered
//! under a [`SubscriptionKey`] before its thread starts; leaving the
//! composition cancels it through the registry, and the producer thread
//! releases its own entry when it returns.

use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::collections::map::HashMap;
use crate::{with_current_composer, CancelToken, MutableState, UiDispatcher};

static NEXT_SUBSCRIPTION_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(u64);

impl SubscriptionKey {
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

struct SubscriptionEntry {
    generation: u64,
    token: CancelToken,
}

/// Result of [`SubscriptionRegistry::ensure`].
#[derive(Debug, Clone)]
pub struct Subscription {
    pub generation: u64,
    pub token: CancelToken,
    /// True when this call created the entry and owns starting the producer.
    pub created: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<SubscriptionKey, SubscriptionEntry>>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live subscription for `key`, creating it when absent.
    /// Concurrent callers agree on one entry; a racer that loses cancels the
    /// token it built.
    pub fn ensure(&self, key: SubscriptionKey) -> Subscription {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&key) {
                return Subscription {
                    generation: entry.generation,
                    token: entry.token.clone(),
                    created: false,
                };
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancelToken::new();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            token.cancel();
            return Subscription {
                generation: existing.generation,
                token: existing.token.clone(),
                created: false,
            };
        }
        entries.insert(
            key,
            SubscriptionEntry {
                generation,
                token: token.clone(),
            },
        );
        log::trace!("subscription {} started (generation {generation})", key.0);
        Subscription {
            generation,
            token,
            created: true,
        }
    }

    /// Removes `key` and cancels its producer. Returns false when absent.
    pub fn cancel(&self, key: SubscriptionKey) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                log::trace!("subscription {} cancelled", key.0);
                true
            }
            None => false,
        }
    }

    /// Called by a producer that finished on its own. Only removes the entry
    /// it was started with; a newer generation under the same key is kept.
    pub fn release(&self, key: SubscriptionKey, generation: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key) {
            Some(entry) if entry.generation == generation => {
                entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: SubscriptionKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_all(&self) {
        let drained: Vec<SubscriptionEntry> = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in drained {
            entry.token.cancel();
        }
    }
}

/// Handle a producer thread uses to push values into composition state.
pub struct StateEmitter<T> {
    dispatcher: UiDispatcher,
    sink: u64,
    token: CancelToken,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> StateEmitter<T> {
    /// Queues `value` for the UI thread. Returns false once cancelled.
    pub fn emit(&self, value: T) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.dispatcher.emit(self.sink, value);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }
}

/// State fed by `producer`, which runs on its own thread from the end of the
/// first pass that reaches this call until the call leaves the composition.
///
/// Emitted values are applied on the UI thread the next time the runtime
/// drains its queue.
pub fn produce_state<T, P>(initial: T, producer: P) -> MutableState<T>
where
    T: Clone + PartialEq + Send + 'static,
    P: FnOnce(StateEmitter<T>) + Send + 'static,
{
    with_current_composer(|composer| {
        let state = composer.remember(|| MutableState::new(initial)).get();
        let key = composer.remember(SubscriptionKey::next).get();
        let launched = composer.remember(|| Cell::new(false));
        let sink_slot = composer.remember(|| Cell::new(None::<u64>));
        let runtime = composer.runtime_handle();
        let registry = runtime.subscriptions();

        let dispose_registry = registry.clone();
        let dispose_runtime = runtime.clone();
        let dispose_sink = sink_slot.clone();
        composer.register_disposable(move || {
            if let Some(registry) = dispose_registry {
                registry.cancel(key);
            }
            if let Some(sink) = dispose_sink.with(Cell::get) {
                dispose_runtime.remove_ui_sink(sink);
            }
        });

        if launched.with(Cell::get) {
            return state;
        }
        launched.with(|flag| flag.set(true));

        let sink_state = state.clone();
        composer.register_side_effect(move || {
            let Some(registry) = registry else {
                return;
            };
            let subscription = registry.ensure(key);
            if !subscription.created {
                return;
            }
            let sink_token = subscription.token.clone();
            let sink = runtime.register_ui_sink(move |value: T| {
                if sink_token.is_active() {
                    sink_state.set(value);
                }
            });
            let Some(sink) = sink else {
                registry.cancel(key);
                return;
            };
            sink_slot.with(|slot| slot.set(Some(sink)));

            let emitter = StateEmitter {
                dispatcher: runtime.dispatcher(),
                sink,
                token: subscription.token,
                _marker: PhantomData,
            };
            let generation = subscription.generation;
            let thread_registry = Arc::clone(&registry);
            let spawned = std::thread::Builder::new()
                .name(format!("trellis-producer-{}", key.raw()))
                .spawn(move || {
                    if catch_unwind(AssertUnwindSafe(|| producer(emitter))).is_err() {
                        log::error!("state producer {} panicked", key.raw());
                    }
                    thread_registry.release(key, generation);
                });
            if let Err(err) = spawned {
                log::error!("failed to start state producer: {err}");
                registry.cancel(key);
            }
        });
        state
    })
}

#[cfg(test)]
#[path = "tests/subscriptions_tests.rs"]
mod tests;
