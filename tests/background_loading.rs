use crossbeam::channel;
use parking_lot::Mutex;
use resource_cache::prelude::*;
use resource_cache::{FinalizeContext, ThreadAffinity};
use std::sync::{Arc, Barrier};
use std::thread::{self, ThreadId};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn mesh_loader(_: &LoadRequest) -> Result<LoadedAsset> {
    Ok(LoadedAsset::new(Resource::new(ResourcePayload::Mesh(
        MeshData::quad(),
    ))))
}

fn background_cache(max_cost: u64) -> ResourceCache {
    ResourceCache::new(
        CacheConfig::new(max_cost)
            .with_worker_threads(4)
            .with_inline_kinds(Vec::new()),
    )
}

#[test]
fn test_many_background_loads_finalize() {
    let cache = background_cache(256);
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    let events = cache.subscribe();

    let handles: Vec<_> = (0..64)
        .map(|i| {
            cache
                .guarantee_handle_with_path(
                    &format!("meshes/rock_{i}.obj"),
                    ResourceKind::Mesh,
                    HandleFlags::default(),
                )
                .unwrap()
        })
        .collect();

    let report = cache.finalize_until_idle(TIMEOUT);
    assert_eq!(report.finalized.len(), 64);
    assert_eq!(cache.load_count(), 0);
    assert!(handles.iter().all(|handle| handle.resource().is_some()));
    assert_eq!(cache.current_cost(), 64);
    assert_eq!(cache.live_device_objects(), 128);

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(received.first(), Some(&CacheEvent::LoadingStarted));
    assert_eq!(received.last(), Some(&CacheEvent::LoadingFinished));
    let added = received
        .iter()
        .filter(|event| matches!(event, CacheEvent::Added { .. }))
        .count();
    assert_eq!(added, 64);
}

#[test]
fn test_loads_run_off_the_finalize_thread() {
    let cache = background_cache(16);
    let loader_threads: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = loader_threads.clone();
    cache.register_loader(ResourceKind::Mesh, move |request: &LoadRequest| -> Result<LoadedAsset> {
        recorded.lock().push(thread::current().id());
        mesh_loader(request)
    });

    let handle = cache
        .guarantee_handle_with_path("meshes/tree.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();
    cache.finalize_until_idle(TIMEOUT);

    assert!(handle.resource().is_some());
    let threads = loader_threads.lock();
    assert_eq!(threads.len(), 1);
    assert_ne!(threads[0], thread::current().id());
}

#[test]
fn test_resource_not_ready_before_finalize() {
    let cache = background_cache(16);
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    cache.register_loader(ResourceKind::Mesh, move |request: &LoadRequest| -> Result<LoadedAsset> {
        let _ = release_rx.recv_timeout(TIMEOUT);
        mesh_loader(request)
    });

    let handle = cache
        .guarantee_handle_with_path("meshes/slow.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();
    assert!(handle.is_loading());
    assert!(handle.resource().is_none());
    assert!(cache.is_loading());

    release_tx.send(()).unwrap();
    cache.finalize_until_idle(TIMEOUT);
    assert!(!handle.is_loading());
    assert!(handle.resource().is_some());
}

#[test]
fn test_result_for_deleted_handle_is_discarded() {
    let cache = background_cache(16);
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    cache.register_loader(ResourceKind::Mesh, move |request: &LoadRequest| -> Result<LoadedAsset> {
        let _ = release_rx.recv_timeout(TIMEOUT);
        mesh_loader(request)
    });

    let handle = cache
        .guarantee_handle_with_path("meshes/gone.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();
    assert_eq!(cache.remove(handle.id(), RemoveFlags::delete()), Ok(true));

    release_tx.send(()).unwrap();
    let report = cache.finalize_until_idle(TIMEOUT);
    assert!(report.finalized.is_empty());
    assert_eq!(cache.load_count(), 0);
    assert_eq!(cache.stats().loads_discarded, 1);
    assert_eq!(cache.current_cost(), 0);
    assert_eq!(cache.live_device_objects(), 0);
}

#[test]
fn test_finalize_on_wrong_thread_panics() {
    let cache = background_cache(16);
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    cache
        .guarantee_handle_with_path("meshes/a.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();

    let worker = cache.clone();
    let result = thread::spawn(move || worker.run_finalizers()).join();
    assert!(result.is_err());

    // The owning thread can still drain the queue
    let report = cache.finalize_until_idle(TIMEOUT);
    assert_eq!(report.finalized.len(), 1);
}

#[test]
fn test_finalize_thread_can_be_rebound() {
    let cache = background_cache(16);
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    let handle = cache
        .guarantee_handle_with_path("meshes/b.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();

    let render_thread = cache.clone();
    let finalized = thread::spawn(move || {
        render_thread.bind_finalize_thread();
        render_thread.finalize_until_idle(TIMEOUT).finalized.len()
    })
    .join()
    .unwrap();

    assert_eq!(finalized, 1);
    assert!(handle.resource().is_some());
    assert!(!cache.finalize_thread().is_current());
}

#[test]
#[should_panic(expected = "already constructed")]
fn test_double_finalize_panics() {
    let cache = ResourceCache::new(CacheConfig::all_inline(16));
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    let handle = cache
        .guarantee_handle_with_path("meshes/c.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();
    cache.run_finalizers();
    assert!(handle.is_constructed());

    let mut device = resource_cache::HeadlessDevice::new();
    let affinity = ThreadAffinity::current();
    handle.post_construct(&mut FinalizeContext::new(&mut device, &affinity));
}

#[test]
fn test_reload_on_access_round_trip() {
    let cache = background_cache(16);
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    let events = cache.subscribe();
    let handle = cache
        .guarantee_handle_with_path("meshes/d.obj", ResourceKind::Mesh, HandleFlags::default())
        .unwrap();
    cache.finalize_until_idle(TIMEOUT);

    cache.remove(handle.id(), RemoveFlags::soft()).unwrap();
    assert!(handle.resource().is_none());
    assert_eq!(cache.process_reload_requests(), 1);
    cache.finalize_until_idle(TIMEOUT);
    assert!(handle.resource().is_some());

    let reloads = events
        .try_iter()
        .filter(|event| matches!(event, CacheEvent::NeedsReload { id } if *id == handle.id()))
        .count();
    assert_eq!(reloads, 1);
}

#[test]
fn test_reload_on_access_can_be_disabled() {
    let cache = ResourceCache::new(
        CacheConfig::all_inline(16).with_reload_on_access(false),
    );
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    let handle = cache
        .insert_handle(ResourceHandle::from_path(
            "meshes/e.obj",
            ResourceKind::Mesh,
            HandleFlags::default(),
        ))
        .unwrap();

    assert!(handle.resource().is_none());
    assert_eq!(cache.process_reload_requests(), 0);
    assert!(!handle.is_loading());
}

#[test]
fn test_concurrent_guarantee_shares_one_handle_per_path() {
    const THREADS: usize = 8;
    const PATHS: usize = 200;

    let cache = background_cache(1024);
    cache.register_loader(ResourceKind::Mesh, mesh_loader);
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..PATHS)
                    .map(|i| {
                        cache
                            .guarantee_handle_with_path(
                                &format!("meshes/shared_{i}.obj"),
                                ResourceKind::Mesh,
                                HandleFlags::default(),
                            )
                            .unwrap()
                            .id()
                    })
                    .collect::<Vec<HandleId>>()
            })
        })
        .collect();
    let results: Vec<Vec<HandleId>> = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();

    assert!(results.iter().all(|ids| ids == &results[0]));
    assert_eq!(cache.top_level_count(), PATHS);
    assert_eq!(cache.stats().loads_dispatched, PATHS as u64);

    let report = cache.finalize_until_idle(TIMEOUT);
    assert_eq!(report.finalized.len(), PATHS);
}
