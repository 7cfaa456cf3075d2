// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cost-bounded resource cache
//!
//! All index and cost bookkeeping sits behind one cache-wide lock. Each
//! handle guards its attached resource with its own lock. Lock order is
//! cache, then device, then handle; handle code never takes the cache lock.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::resources::budget::CostBudget;
use crate::resources::device::{FinalizeContext, HeadlessDevice, RenderDevice, ThreadAffinity};
use crate::resources::events::{CacheEvent, EventHub};
use crate::resources::executor::LoadExecutor;
use crate::resources::finalize::FinalizeRequest;
use crate::resources::loader::{LoadRequest, LoadStrategy, Loader, LoaderRegistry};
use crate::resources::{
    CacheStats, HandleFlags, HandleId, Priority, Resource, ResourceHandle, ResourceKind,
};
use crossbeam::channel::{self, Receiver, Sender};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// How [`ResourceCache::remove`] treats the handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoveFlags {
    /// Also erase the handle from every index
    pub delete_handle: bool,
    /// Allow removing Permanent handles
    pub force: bool,
    /// Allow removing Core handles
    pub override_core: bool,
}

impl RemoveFlags {
    /// Unload the resource, keep the handle registered
    pub fn soft() -> Self {
        Self::default()
    }

    /// Unload the resource and forget the handle
    pub fn delete() -> Self {
        Self {
            delete_handle: true,
            ..Self::default()
        }
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_override_core(mut self) -> Self {
        self.override_core = true;
        self
    }
}

pub(crate) struct CacheState {
    pub(crate) handles: FxHashMap<HandleId, Arc<ResourceHandle>>,
    /// Top-level handles only; front is most recently used
    pub(crate) lru: LruCache<HandleId, ()>,
    names: FxHashMap<(ResourceKind, String), HandleId>,
    pub(crate) budget: CostBudget,
    pub(crate) stats: CacheStats,
}

impl CacheState {
    fn new(max_cost: u64) -> Self {
        Self {
            handles: FxHashMap::default(),
            lru: LruCache::unbounded(),
            names: FxHashMap::default(),
            budget: CostBudget::new(max_cost),
            stats: CacheStats::default(),
        }
    }

    pub(crate) fn touch(&mut self, id: HandleId) {
        self.lru.promote(&id);
    }

    fn index_name(&mut self, handle: &ResourceHandle) {
        if !handle.kind().has_name_index() {
            return;
        }
        let key = (handle.kind(), handle.name().to_lowercase());
        if let Some(previous) = self.names.insert(key, handle.id()) {
            if previous != handle.id() {
                tracing::warn!(
                    name = %handle.name(),
                    kind = %handle.kind(),
                    replaced = %previous,
                    "duplicate resource name, index now points at the newer handle"
                );
            }
        }
    }

    /// Drop `handle` from the name index. If another registered handle shares
    /// its name, the entry moves to that one.
    fn unindex_name(&mut self, handle: &ResourceHandle) {
        let key = (handle.kind(), handle.name().to_lowercase());
        if self.names.get(&key) != Some(&handle.id()) {
            return;
        }
        let survivor = self
            .handles
            .values()
            .filter(|other| other.id() != handle.id() && other.kind() == key.0)
            .filter(|other| other.name().to_lowercase() == key.1)
            .map(|other| other.id())
            .max();
        match survivor {
            Some(id) => {
                self.names.insert(key, id);
            }
            None => {
                self.names.remove(&key);
            }
        }
    }

    fn register(&mut self, handle: &Arc<ResourceHandle>, reload: Option<&Sender<HandleId>>) {
        let id = handle.id();
        self.handles.insert(id, handle.clone());
        if !handle.is_child() {
            self.lru.push(id, ());
        }
        self.index_name(handle);
        if let Some(sender) = reload {
            handle.bind_reload_channel(sender.clone());
        }
        for child in handle.owned_children() {
            if !self.handles.contains_key(&child.id()) {
                self.register(&child, reload);
            }
        }
    }

    pub(crate) fn unregister(&mut self, handle: &ResourceHandle) {
        let id = handle.id();
        self.handles.remove(&id);
        self.lru.pop(&id);
        self.unindex_name(handle);
        for child in handle.owned_children() {
            self.unregister(&child);
        }
    }

    fn find_by_name(&self, name: &str, kind: ResourceKind) -> Option<Arc<ResourceHandle>> {
        let key = name.to_lowercase();
        if kind.has_name_index() {
            let id = self.names.get(&(kind, key))?;
            return self.handles.get(id).cloned();
        }
        self.handles
            .values()
            .find(|handle| handle.kind() == kind && handle.name().to_lowercase() == key)
            .cloned()
    }

    fn find_top_level_by_path(&self, path: &str) -> Option<Arc<ResourceHandle>> {
        self.lru
            .iter()
            .filter_map(|(id, _)| self.handles.get(id))
            .find(|handle| handle.path() == path)
            .cloned()
    }
}

pub(crate) struct CacheInner {
    pub(crate) config: CacheConfig,
    pub(crate) state: Mutex<CacheState>,
    pub(crate) loaders: RwLock<LoaderRegistry>,
    pub(crate) executor: LoadExecutor,
    pub(crate) events: EventHub,
    pub(crate) load_count: Mutex<usize>,
    pub(crate) finalize_tx: Sender<FinalizeRequest>,
    pub(crate) finalize_rx: Receiver<FinalizeRequest>,
    reload_tx: Sender<HandleId>,
    pub(crate) reload_rx: Receiver<HandleId>,
    device: Mutex<Box<dyn RenderDevice>>,
    affinity: RwLock<ThreadAffinity>,
}

/// Owner of every loadable engine asset.
///
/// Cheap to clone; clones share the same cache. The thread that creates the
/// cache is its finalize thread until [`bind_finalize_thread`] moves it.
/// Post-construction and removal (and therefore `remove`, `clear` and any
/// insertion that evicts) must happen on that thread.
///
/// [`bind_finalize_thread`]: ResourceCache::bind_finalize_thread
#[derive(Clone)]
pub struct ResourceCache {
    pub(crate) inner: Arc<CacheInner>,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_device(config, HeadlessDevice::new())
    }

    pub fn with_device(config: CacheConfig, device: impl RenderDevice + 'static) -> Self {
        let (finalize_tx, finalize_rx) = channel::unbounded();
        let (reload_tx, reload_rx) = channel::unbounded();
        tracing::debug!(
            max_cost = config.max_cost,
            workers = config.worker_threads,
            "creating resource cache"
        );
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::new(config.max_cost)),
                loaders: RwLock::new(LoaderRegistry::new()),
                executor: LoadExecutor::new(config.worker_threads),
                events: EventHub::new(),
                load_count: Mutex::new(0),
                finalize_tx,
                finalize_rx,
                reload_tx,
                reload_rx,
                device: Mutex::new(Box::new(device)),
                affinity: RwLock::new(ThreadAffinity::current()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register the loader used for every handle of `kind`
    pub fn register_loader<L: Loader + 'static>(&self, kind: ResourceKind, loader: L) {
        self.inner.loaders.write().register(kind, Arc::new(loader));
    }

    pub fn has_loader(&self, kind: ResourceKind) -> bool {
        self.inner.loaders.read().contains(kind)
    }

    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Make the calling thread the finalize thread
    pub fn bind_finalize_thread(&self) {
        *self.inner.affinity.write() = ThreadAffinity::current();
    }

    pub fn finalize_thread(&self) -> ThreadAffinity {
        *self.inner.affinity.read()
    }

    pub fn max_cost(&self) -> u64 {
        self.inner.state.lock().budget.max_cost()
    }

    /// Change the budget. Takes effect on the next charge; nothing is
    /// evicted immediately.
    pub fn set_max_cost(&self, max_cost: u64) {
        self.inner.state.lock().budget.set_max_cost(max_cost);
    }

    pub fn current_cost(&self) -> u64 {
        self.inner.state.lock().budget.current()
    }

    pub fn utilization(&self) -> f32 {
        self.inner.state.lock().budget.utilization()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().stats.clone()
    }

    /// Registered handles, children included
    pub fn len(&self) -> usize {
        self.inner.state.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn top_level_count(&self) -> usize {
        self.inner.state.lock().lru.len()
    }

    /// Top-level handle ids, most recently used first
    pub fn lru_order(&self) -> Vec<HandleId> {
        self.inner
            .state
            .lock()
            .lru
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Top-level handles, most recently used first
    pub fn top_level_handles(&self) -> Vec<Arc<ResourceHandle>> {
        let state = self.inner.state.lock();
        state
            .lru
            .iter()
            .filter_map(|(id, _)| state.handles.get(id).cloned())
            .collect()
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.inner.state.lock().handles.contains_key(&id)
    }

    pub fn live_device_objects(&self) -> usize {
        self.inner.device.lock().live_objects()
    }

    /// Register a handle.
    ///
    /// Inserting a handle that is already registered only touches it. If the
    /// handle carries a resource, its cost is charged and removable resources
    /// are evicted as needed; when even that cannot make room the handle is
    /// not registered and the cache is left as it was.
    pub fn insert_handle(&self, handle: Arc<ResourceHandle>) -> Result<Arc<ResourceHandle>> {
        let id = handle.id();
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.handles.get(&id).cloned() {
            state.touch(id);
            return Ok(existing);
        }

        state.register(&handle, self.reload_sender());

        if !handle.is_child() {
            if let Some(cost) = handle.cost() {
                let charged = self.with_finalize_context(|ctx| self.charge_and_evict(&mut state, ctx, id, cost));
                if let Err(err) = charged {
                    state.unregister(&handle);
                    return Err(err);
                }
            }
        }

        tracing::debug!(handle = %id, name = %handle.name(), kind = %handle.kind(), "inserted resource handle");
        Ok(handle)
    }

    /// Look up a handle by identity; a hit counts as a use
    pub fn get_handle(&self, id: HandleId) -> Option<Arc<ResourceHandle>> {
        let mut state = self.inner.state.lock();
        let found = state.handles.get(&id).cloned();
        Self::record_lookup(&mut state, found)
    }

    /// Look up a handle by name (case-insensitive) and kind
    pub fn get_handle_with_name(&self, name: &str, kind: ResourceKind) -> Option<Arc<ResourceHandle>> {
        let mut state = self.inner.state.lock();
        let found = state.find_by_name(name, kind);
        Self::record_lookup(&mut state, found)
    }

    /// Look up a top-level handle by its primary path
    pub fn get_top_level_handle_with_path(&self, path: &str) -> Option<Arc<ResourceHandle>> {
        let mut state = self.inner.state.lock();
        let found = state.find_top_level_by_path(path);
        Self::record_lookup(&mut state, found)
    }

    fn record_lookup(
        state: &mut CacheState,
        found: Option<Arc<ResourceHandle>>,
    ) -> Option<Arc<ResourceHandle>> {
        match &found {
            Some(handle) => {
                state.touch(handle.id());
                state.stats.cache_hits += 1;
            }
            None => state.stats.cache_misses += 1,
        }
        found
    }

    /// Lookup that neither touches nor counts towards statistics
    pub(crate) fn registered(&self, id: HandleId) -> Option<Arc<ResourceHandle>> {
        self.inner.state.lock().handles.get(&id).cloned()
    }

    /// Mark a handle as most recently used
    pub fn touch(&self, id: HandleId) {
        tracing::trace!(handle = %id, "touch");
        self.inner.state.lock().touch(id);
    }

    /// Unload a handle's resource, and with [`RemoveFlags::delete_handle`]
    /// forget the handle too.
    ///
    /// Returns `Ok(false)` when the handle's priority protects it: Core
    /// handles need `override_core`, Permanent handles need `force`. Child
    /// handles can only go with their parent.
    pub fn remove(&self, id: HandleId, flags: RemoveFlags) -> Result<bool> {
        let mut state = self.inner.state.lock();
        let handle = state
            .handles
            .get(&id)
            .cloned()
            .ok_or(CacheError::HandleNotFound(id))?;
        state.touch(id);

        if handle.is_child() {
            return Err(CacheError::ChildRemoval(id));
        }
        match handle.priority() {
            Priority::Core if !flags.override_core => {
                tracing::warn!(name = %handle.name(), "refusing to remove core resource");
                return Ok(false);
            }
            Priority::Permanent if !flags.force => {
                tracing::warn!(name = %handle.name(), "refusing to remove permanent resource without force");
                return Ok(false);
            }
            _ => {}
        }

        self.with_finalize_context(|ctx| self.unload_locked(&mut state, ctx, &handle));
        if flags.delete_handle {
            state.unregister(&handle);
        }
        tracing::debug!(handle = %id, deleted = flags.delete_handle, "removed resource");
        Ok(true)
    }

    /// Unload and forget every handle except Core ones.
    ///
    /// Panics if a load is in flight.
    pub fn clear(&self) {
        let in_flight = self.load_count();
        assert!(
            in_flight == 0,
            "clear called with {in_flight} resource load(s) in flight"
        );

        let mut state = self.inner.state.lock();
        let targets: Vec<Arc<ResourceHandle>> = state
            .lru
            .iter()
            .filter_map(|(id, _)| state.handles.get(id))
            .filter(|handle| !handle.is_core())
            .cloned()
            .collect();

        self.with_finalize_context(|ctx| {
            for handle in &targets {
                self.unload_locked(&mut state, ctx, handle);
            }
        });
        for handle in &targets {
            state.unregister(handle);
        }
        tracing::info!(removed = targets.len(), remaining = state.handles.len(), "cleared resource cache");
    }

    /// Rename a handle, keeping the name index consistent
    pub fn rename_handle(&self, id: HandleId, name: &str) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let handle = state
                .handles
                .get(&id)
                .cloned()
                .ok_or(CacheError::HandleNotFound(id))?;
            state.unindex_name(&handle);
            handle.set_name(name);
            state.index_name(&handle);
        }
        self.inner.events.publish(CacheEvent::Changed { id });
        Ok(())
    }

    /// Register an in-memory resource (built-in meshes, shaders) and
    /// construct it right away. Must run on the finalize thread.
    pub fn insert_generated(
        &self,
        name: &str,
        resource: Resource,
        flags: HandleFlags,
    ) -> Result<Arc<ResourceHandle>> {
        let handle = ResourceHandle::generated(name, resource.kind(), flags);
        handle.set_resource(resource)?;
        self.with_finalize_context(|ctx| handle.post_construct(ctx));

        match self.insert_handle(handle.clone()) {
            Ok(handle) => {
                self.inner.events.publish(CacheEvent::Added {
                    id: handle.id(),
                    kind: handle.kind(),
                });
                Ok(handle)
            }
            Err(err) => {
                self.with_finalize_context(|ctx| handle.remove_resource(ctx));
                Err(err)
            }
        }
    }

    /// Get the top-level handle for `path`, creating and loading it if needed.
    ///
    /// An existing handle takes on `flags` and is reloaded if its resource was
    /// unloaded. A handle of another kind at the same path is an error.
    pub fn guarantee_handle_with_path(
        &self,
        path: &str,
        kind: ResourceKind,
        flags: HandleFlags,
    ) -> Result<Arc<ResourceHandle>> {
        self.guarantee(path, kind, flags, || ResourceHandle::from_path(path, kind, flags))
    }

    /// Multi-file variant; only shader programs (one file per stage) support it
    pub fn guarantee_handle_with_paths(
        &self,
        paths: &[&str],
        kind: ResourceKind,
        flags: HandleFlags,
    ) -> Result<Arc<ResourceHandle>> {
        if kind != ResourceKind::ShaderProgram {
            return Err(CacheError::UnsupportedMultiPath(kind));
        }
        let (first, rest) = paths
            .split_first()
            .ok_or_else(|| CacheError::InvalidState("no shader paths given".to_string()))?;
        self.guarantee(first, kind, flags, || {
            let handle = ResourceHandle::from_path(first, kind, flags);
            for path in rest {
                handle.push_additional_path(*path);
            }
            handle
        })
    }

    /// Find or register the top-level handle for `path` under one cache lock,
    /// then dispatch its load after releasing it.
    fn guarantee(
        &self,
        path: &str,
        kind: ResourceKind,
        flags: HandleFlags,
        create: impl FnOnce() -> Arc<ResourceHandle>,
    ) -> Result<Arc<ResourceHandle>> {
        let (handle, created) = {
            let mut state = self.inner.state.lock();
            let found = state.find_top_level_by_path(path);
            match Self::record_lookup(&mut state, found) {
                Some(existing) => {
                    if existing.kind() != kind {
                        return Err(CacheError::TypeMismatch {
                            expected: kind,
                            found: existing.kind(),
                        });
                    }
                    existing.set_flags(HandleFlags {
                        child: existing.is_child(),
                        ..flags
                    });
                    (existing, false)
                }
                None => {
                    let handle = create();
                    state.register(&handle, self.reload_sender());
                    tracing::debug!(handle = %handle.id(), path, kind = %kind, "registered handle for path");
                    (handle, true)
                }
            }
        };

        if created || handle.needs_reload() {
            match self.load_resource(&handle) {
                // Another caller dispatched it first
                Err(CacheError::InvalidState(_)) => {}
                other => other?,
            }
        }
        Ok(handle)
    }

    /// Dispatch a load for a registered handle.
    ///
    /// Inline kinds load on the calling thread; everything else goes to the
    /// worker pool. Either way the result only becomes usable after
    /// [`run_finalizers`](ResourceCache::run_finalizers).
    pub fn load_resource(&self, handle: &Arc<ResourceHandle>) -> Result<()> {
        let id = handle.id();
        if !self.contains(id) {
            return Err(CacheError::HandleNotFound(id));
        }
        let loader = self
            .inner
            .loaders
            .read()
            .get(handle.kind())
            .ok_or(CacheError::NoLoader(handle.kind()))?;
        handle.begin_load()?;

        let request = LoadRequest::from_handle(handle);
        self.increment_load_count();
        self.inner.state.lock().stats.loads_dispatched += 1;

        let strategy = self.inner.config.strategy_for(handle.kind());
        tracing::debug!(handle = %id, name = %request.name, ?strategy, "dispatching resource load");

        match strategy {
            LoadStrategy::Inline => {
                self.run_load_job(loader.as_ref(), request);
                Ok(())
            }
            LoadStrategy::Background => {
                let cache = Arc::downgrade(&self.inner);
                let spawned = self.inner.executor.spawn(move || {
                    // The cache may be gone by the time the job runs
                    if let Some(inner) = cache.upgrade() {
                        ResourceCache { inner }.run_load_job(loader.as_ref(), request);
                    }
                });
                if let Err(err) = spawned {
                    handle.abort_load();
                    self.decrement_load_count();
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// Run `f` with the device and the finalize-thread affinity
    pub(crate) fn with_finalize_context<R>(&self, f: impl FnOnce(&mut FinalizeContext<'_>) -> R) -> R {
        let affinity = self.finalize_thread();
        let mut device = self.inner.device.lock();
        let mut ctx = FinalizeContext::new(&mut **device, &affinity);
        f(&mut ctx)
    }

    pub(crate) fn reload_sender(&self) -> Option<&Sender<HandleId>> {
        self.inner
            .config
            .reload_on_access
            .then_some(&self.inner.reload_tx)
    }

    pub(crate) fn register_child(&self, child: &Arc<ResourceHandle>) {
        let mut state = self.inner.state.lock();
        state.register(child, self.reload_sender());
    }

    /// Charge `cost` to `id`, evicting least recently used removable
    /// resources until it fits.
    ///
    /// Candidates are checked first: if evicting all of them would still
    /// leave the total over budget, nothing is evicted.
    pub(crate) fn charge_and_evict(
        &self,
        state: &mut CacheState,
        ctx: &mut FinalizeContext<'_>,
        id: HandleId,
        cost: u64,
    ) -> Result<()> {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("charge_and_evict", handle = %id, cost).entered();

        let max_cost = state.budget.max_cost();
        let projected = state.budget.projected(id, cost);

        if projected > max_cost {
            let mut needed = projected - max_cost;
            let mut victims = Vec::new();
            for (candidate, _) in state.lru.iter().rev() {
                if needed == 0 {
                    break;
                }
                if *candidate == id {
                    continue;
                }
                let Some(handle) = state.handles.get(candidate) else {
                    continue;
                };
                if !handle.is_removable() {
                    continue;
                }
                let charge = state.budget.charge_of(*candidate);
                if charge == 0 {
                    continue;
                }
                victims.push(handle.clone());
                needed = needed.saturating_sub(charge);
            }

            if needed > 0 {
                tracing::error!(
                    handle = %id,
                    cost,
                    current_cost = state.budget.current(),
                    max_cost,
                    "eviction exhausted; resource does not fit"
                );
                return Err(CacheError::EvictionExhausted {
                    requested: cost,
                    current_cost: state.budget.current(),
                    max_cost,
                });
            }

            for victim in victims {
                self.unload_locked(state, ctx, &victim);
                state.stats.evictions += 1;
                tracing::debug!(handle = %victim.id(), name = %victim.name(), "evicted resource");
            }
        }

        state.budget.charge(id, cost);
        Ok(())
    }

    /// Discharge and unload one handle (and its owned children)
    pub(crate) fn unload_locked(
        &self,
        state: &mut CacheState,
        ctx: &mut FinalizeContext<'_>,
        handle: &ResourceHandle,
    ) -> bool {
        state.budget.discharge(handle.id());
        let removed = handle.remove_resource(ctx);
        if removed {
            self.inner.events.publish(CacheEvent::Removed {
                id: handle.id(),
                kind: handle.kind(),
            });
        }
        removed
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ResourceCache")
            .field("handles", &state.handles.len())
            .field("current_cost", &state.budget.current())
            .field("max_cost", &state.budget.max_cost())
            .finish()
    }
}
