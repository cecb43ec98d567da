use crate::events::event::CacheEvent;
use crate::events::EventChannel;
use crate::job::Job;
use crate::model::{ExecutionMode, JobId, JobStatus};
use crate::sync::{Arc, Mutex, MutexGuard, Weak};
use crate::Config;
use fxhash::FxHashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::PoisonError;
use tracing::{instrument, *};

/// A cache of expensive-to-construct resources, keyed by resource identity.
///
/// Each entry is the `Job` that constructs the resource, so concurrent requests for the same key
/// share a single construction whether it is still in flight or already done. A construction
/// that fails is evicted, and the next attempt for that key uses the next `ExecutionMode` in the
/// configured fallback order. Retrying is left to the caller.
///
pub struct ResourceCache<K, R> {
    inner: Arc<Inner<K, R>>,
}

struct Inner<K, R> {
    state: Mutex<State<K, R>>,
    fallback_modes: Vec<ExecutionMode>,
    event_channel: Arc<EventChannel>,
}

struct State<K, R> {
    entries: FxHashMap<K, Job<Arc<R>>>,
    modes: FxHashMap<K, ExecutionMode>,
}

impl<K, R> Clone for ResourceCache<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, R> std::fmt::Debug for ResourceCache<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("fallback_modes", &self.inner.fallback_modes)
            .finish()
    }
}

impl<K, R> ResourceCache<K, R>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(config: &Config) -> Self {
        let fallback_modes = match config.fallback_modes() {
            [] => ExecutionMode::preference_order(),
            modes => modes.to_vec(),
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: FxHashMap::default(),
                    modes: FxHashMap::default(),
                }),
                fallback_modes,
                event_channel: config.event_channel(),
            }),
        }
    }

    /// Return the construction job for `key`, creating it with `create` if there is none.
    ///
    /// `create` receives the execution mode to build with, and is expected to return a job that
    /// is either started or handed over to whatever will start it. It is called at most once per
    /// live entry, so every concurrent caller for the same key ends up with the same job.
    ///
    #[instrument(name = "ResourceCache::get_or_create", skip(self, create), fields(key = %key))]
    pub fn get_or_create<F>(&self, key: K, create: F) -> Job<Arc<R>>
    where
        F: FnOnce(&K, ExecutionMode) -> Job<Arc<R>>,
    {
        let job = {
            let mut state = self.state();
            if let Some(status) = state.entries.get(&key).map(|job| job.status()) {
                match status {
                    JobStatus::Cancelled(_) => (),
                    // Failed, but its eviction has not run yet. Whoever removes a failed entry
                    // advances the mode, and the late eviction will find it stale.
                    JobStatus::Failed(_) => {
                        let next_mode = self.advance(&mut state, &key);
                        warn!("Replacing failed {}; next attempt will use {}", key, next_mode);
                        self.inner.event_channel.send(CacheEvent::ResourceEvicted {
                            key: key.to_string(),
                            next_mode,
                        });
                    }
                    _ => {
                        if let Some(job) = state.entries.get(&key) {
                            self.inner.event_channel.send(CacheEvent::ResourceHit {
                                key: key.to_string(),
                            });
                            return job.clone();
                        }
                    }
                }
            }

            let mode = self.mode_in(&state, &key);
            debug!("Constructing {} with {}", key, mode);
            let job = create(&key, mode);
            state.entries.insert(key.clone(), job.clone());
            self.inner
                .event_channel
                .send(CacheEvent::ResourceConstructionStarted {
                    key: key.to_string(),
                    mode,
                });
            job
        };

        // NOTE: registered outside of the cache lock. If the job already failed, the handler
        // runs right here and has to take the lock itself.
        let cache = Arc::downgrade(&self.inner);
        let id = job.id();
        job.on_failure(move |err| {
            debug!("Construction of {} failed: {}", key, err);
            if let Some(cache) = Weak::upgrade(&cache) {
                ResourceCache { inner: cache }.evict(&key, id);
            }
        });

        job
    }

    /// Discard the current entry for `key` so that the next request builds it again, using the
    /// next execution mode. A construction still in flight is cancelled; a finished one is
    /// released once its last user lets go of it. Returns the mode the next attempt will use.
    ///
    #[instrument(name = "ResourceCache::drop_for_retry", skip(self), fields(key = %key))]
    pub fn drop_for_retry(&self, key: &K) -> ExecutionMode {
        let (removed, next_mode) = {
            let mut state = self.state();
            let removed = state.entries.remove(key);
            let next_mode = self.advance(&mut state, key);
            (removed, next_mode)
        };

        if let Some(job) = removed {
            if !job.is_terminal() {
                let _ = job.cancel("resource dropped for retry");
            }
        }

        self.inner
            .event_channel
            .send(CacheEvent::ResourceDroppedForRetry {
                key: key.to_string(),
                next_mode,
            });
        next_mode
    }

    pub fn get(&self, key: &K) -> Option<Job<Arc<R>>> {
        self.state().entries.get(key).cloned()
    }

    /// The execution mode the next construction of `key` will use.
    pub fn mode_for(&self, key: &K) -> ExecutionMode {
        let state = self.state();
        self.mode_in(&state, key)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, cancelling constructions still in flight. Fallback modes are kept.
    pub fn clear(&self) {
        let entries: Vec<Job<Arc<R>>> = {
            let mut state = self.state();
            state.entries.drain().map(|(_, job)| job).collect()
        };
        for job in entries {
            if !job.is_terminal() {
                let _ = job.cancel("resource cache cleared");
            }
        }
    }

    fn evict(&self, key: &K, id: JobId) {
        let mut state = self.state();
        let is_current = state.entries.get(key).map(|job| job.id()) == Some(id);
        if !is_current {
            debug!("Ignoring failure of a stale construction of {}", key);
            return;
        }
        state.entries.remove(key);
        let next_mode = self.advance(&mut state, key);
        warn!("Evicted {}; next attempt will use {}", key, next_mode);
        self.inner.event_channel.send(CacheEvent::ResourceEvicted {
            key: key.to_string(),
            next_mode,
        });
    }

    fn mode_in(&self, state: &State<K, R>, key: &K) -> ExecutionMode {
        state
            .modes
            .get(key)
            .copied()
            .unwrap_or(self.inner.fallback_modes[0])
    }

    fn advance(&self, state: &mut State<K, R>, key: &K) -> ExecutionMode {
        let next = self
            .mode_in(state, key)
            .next_in(&self.inner.fallback_modes);
        state.modes.insert(key.clone(), next);
        next
    }

    fn state(&self) -> MutexGuard<'_, State<K, R>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
