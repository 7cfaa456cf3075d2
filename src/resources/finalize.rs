//! Load completion and the single-threaded finalize step.
//!
//! Loader jobs attach their result to the handle and queue a request; the
//! finalize thread drains the queue in FIFO order, running post-construction,
//! charging cost and evicting. Results for handles that were unregistered in
//! the meantime are dropped.

use crate::resources::events::CacheEvent;
use crate::resources::loader::{ChildAsset, LoadRequest, LoadedAsset, Loader};
use crate::resources::{HandleFlags, HandleId, ResourceCache, ResourceHandle, DEFAULT_COST};
use crossbeam::channel::RecvTimeoutError;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single wait inside `finalize_until_idle`; discarded loads
/// lower the count without queueing anything.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Queued work for the finalize thread
#[derive(Debug)]
pub(crate) enum FinalizeRequest {
    /// The resource is attached and waits for post-construction
    Construct(Arc<ResourceHandle>),
    /// The loader failed
    Failed { id: HandleId, reason: String },
}

/// Outcome of one finalize drain
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinalizeReport {
    /// Handles whose resource became usable, in finalize order
    pub finalized: Vec<HandleId>,
    /// Results dropped because their handle was unregistered or emptied
    pub discarded: usize,
    /// Failed loads and finalizes with the reason
    pub failed: Vec<(HandleId, String)>,
}

impl FinalizeReport {
    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.discarded == 0 && self.failed.is_empty()
    }

    fn merge(&mut self, other: FinalizeReport) {
        self.finalized.extend(other.finalized);
        self.discarded += other.discarded;
        self.failed.extend(other.failed);
    }
}

impl ResourceCache {
    /// Number of loads dispatched and not yet finalized
    pub fn load_count(&self) -> usize {
        *self.inner.load_count.lock()
    }

    pub fn is_loading(&self) -> bool {
        self.load_count() > 0
    }

    pub(crate) fn increment_load_count(&self) {
        let mut count = self.inner.load_count.lock();
        *count += 1;
        if *count == 1 {
            tracing::info!("resource loading started");
            self.inner.events.publish(CacheEvent::LoadingStarted);
        }
    }

    /// Panics on underflow
    pub(crate) fn decrement_load_count(&self) {
        let mut count = self.inner.load_count.lock();
        assert!(*count > 0, "resource load count underflow");
        *count -= 1;
        if *count == 0 {
            tracing::info!("resource loading finished");
            self.inner.events.publish(CacheEvent::LoadingFinished);
        }
    }

    /// Body of a load job: decode, attach, queue for finalize
    pub(crate) fn run_load_job(&self, loader: &dyn Loader, request: LoadRequest) {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("load_resource", handle = %request.id, name = %request.name).entered();

        match loader.load(&request) {
            Ok(asset) => self.attach_loaded(&request, asset),
            Err(err) => {
                tracing::warn!(handle = %request.id, name = %request.name, error = %err, "resource load failed");
                let _ = self.inner.finalize_tx.send(FinalizeRequest::Failed {
                    id: request.id,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn attach_loaded(&self, request: &LoadRequest, asset: LoadedAsset) {
        let Some(handle) = self.registered(request.id) else {
            tracing::debug!(handle = %request.id, "discarding load result for unregistered handle");
            self.inner.state.lock().stats.loads_discarded += 1;
            self.decrement_load_count();
            return;
        };

        let found = asset.resource.kind();
        if found != handle.kind() {
            panic!(
                "loader for {} '{}' produced a {} resource",
                handle.kind(),
                request.name,
                found
            );
        }
        if let Err(err) = handle.set_resource(asset.resource) {
            panic!("failed to attach loaded resource: {err}");
        }
        for child in asset.children {
            self.attach_child(&handle, child);
        }

        let _ = self.inner.finalize_tx.send(FinalizeRequest::Construct(handle));
    }

    fn attach_child(&self, parent: &Arc<ResourceHandle>, child: ChildAsset) {
        let kind = child.resource.kind();
        let handle = match parent.child_by_name(&child.name, kind) {
            Some(existing) => existing,
            None => {
                let handle = ResourceHandle::new(
                    child.name,
                    parent.path(),
                    kind,
                    HandleFlags::default().with_child(true),
                );
                if let Err(err) = parent.add_child(handle.clone()) {
                    tracing::warn!(error = %err, "child resource already attached");
                }
                self.register_child(&handle);
                handle
            }
        };
        if let Err(err) = handle.set_resource(child.resource) {
            panic!("failed to attach child resource: {err}");
        }
    }

    /// Drain every queued finalize request. Must run on the finalize thread.
    pub fn run_finalizers(&self) -> FinalizeReport {
        self.finalize_thread().assert_current("run_finalizers");
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("run_finalizers").entered();

        let mut report = FinalizeReport::default();
        while let Ok(request) = self.inner.finalize_rx.try_recv() {
            self.process_finalize(request, &mut report);
        }
        report
    }

    /// Keep finalizing until no load is in flight or `timeout` elapses
    pub fn finalize_until_idle(&self, timeout: Duration) -> FinalizeReport {
        let deadline = Instant::now() + timeout;
        let mut report = self.run_finalizers();

        while self.is_loading() {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(in_flight = self.load_count(), "timed out waiting for resource loads");
                break;
            }
            match self.inner.finalize_rx.recv_timeout((deadline - now).min(IDLE_POLL)) {
                Ok(request) => {
                    self.process_finalize(request, &mut report);
                    report.merge(self.run_finalizers());
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        report
    }

    fn process_finalize(&self, request: FinalizeRequest, report: &mut FinalizeReport) {
        match request {
            FinalizeRequest::Construct(handle) => self.finalize_one(handle, report),
            FinalizeRequest::Failed { id, reason } => {
                if let Some(handle) = self.registered(id) {
                    handle.abort_load();
                }
                self.inner.state.lock().stats.loads_failed += 1;
                self.inner.events.publish(CacheEvent::LoadFailed {
                    id,
                    reason: reason.clone(),
                });
                report.failed.push((id, reason));
            }
        }
        self.decrement_load_count();
    }

    fn finalize_one(&self, handle: Arc<ResourceHandle>, report: &mut FinalizeReport) {
        let id = handle.id();
        let mut state = self.inner.state.lock();
        if !state.handles.contains_key(&id) {
            // Deleted after the result was attached: drop the result and any
            // children registered with it
            tracing::debug!(handle = %id, "discarding finalize for unregistered handle");
            state.unregister(&handle);
            self.with_finalize_context(|ctx| handle.remove_resource(ctx));
            handle.abort_load();
            state.stats.loads_discarded += 1;
            report.discarded += 1;
            return;
        }
        if !handle.has_resource() {
            tracing::debug!(handle = %id, "resource removed before finalize");
            handle.abort_load();
            state.stats.loads_discarded += 1;
            report.discarded += 1;
            return;
        }

        let outcome = self.with_finalize_context(|ctx| {
            handle.post_construct(ctx);
            if handle.is_child() {
                return Ok(());
            }
            state.touch(id);
            let cost = handle.cost().unwrap_or(DEFAULT_COST);
            let charged = self.charge_and_evict(&mut state, ctx, id, cost);
            if charged.is_err() {
                handle.remove_resource(ctx);
            }
            charged
        });

        match outcome {
            Ok(()) => {
                state.stats.loads_finalized += 1;
                drop(state);
                tracing::debug!(handle = %id, name = %handle.name(), cost = ?handle.cost(), "resource finalized");
                self.inner.events.publish(CacheEvent::Added {
                    id,
                    kind: handle.kind(),
                });
                report.finalized.push(id);
            }
            Err(err) => {
                state.stats.loads_failed += 1;
                drop(state);
                self.inner.events.publish(CacheEvent::LoadFailed {
                    id,
                    reason: err.to_string(),
                });
                report.failed.push((id, err.to_string()));
            }
        }
    }

    /// Dispatch loads for handles whose `resource()` found nothing attached.
    /// Duplicate requests collapse; returns the number of loads dispatched.
    pub fn process_reload_requests(&self) -> usize {
        let mut seen = FxHashSet::default();
        let mut dispatched = 0;
        while let Ok(id) = self.inner.reload_rx.try_recv() {
            if !seen.insert(id) {
                continue;
            }
            let Some(handle) = self.registered(id) else {
                continue;
            };
            if !handle.needs_reload() {
                continue;
            }
            self.inner.events.publish(CacheEvent::NeedsReload { id });
            match self.load_resource(&handle) {
                Ok(()) => dispatched += 1,
                Err(err) => {
                    tracing::warn!(handle = %id, error = %err, "could not reload resource");
                }
            }
        }
        dispatched
    }
}
