#![allow(dead_code, unused_imports)]

use resource_cache::prelude::*;
use std::time::{Duration, Instant};

const TEXTURE_BYTES: usize = 256 * 1024;

fn texture_loader(request: &LoadRequest) -> Result<LoadedAsset> {
    let side = request
        .attributes
        .get("side")
        .and_then(|value| value.as_u64())
        .unwrap_or(256) as u32;
    let pixels = vec![0u8; TEXTURE_BYTES];
    Ok(LoadedAsset::new(Resource::new(ResourcePayload::Texture(
        TextureData::new(side, side, pixels),
    ))))
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(cache))]
fn profile_loads(cache: &ResourceCache, count: usize) {
    let _span = tracing::info_span!("load_loop", count = count).entered();
    for i in 0..count {
        if i % 100 == 0 {
            tracing::info!("Requesting texture {}/{}", i, count);
        }
        let path = format!("textures/tex_{i}.png");
        if let Err(err) =
            cache.guarantee_handle_with_path(&path, ResourceKind::Texture, HandleFlags::default())
        {
            tracing::error!(error = %err, "request failed");
        }
        if i % 32 == 0 {
            cache.run_finalizers();
        }
    }
}

#[cfg(feature = "profiling")]
fn main() {
    let _guard = match resource_cache::profiling::init_tracing("trace.log") {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("could not set up tracing: {err}");
            return;
        }
    };

    let cache = ResourceCache::new(CacheConfig::new(64).with_worker_threads(4));
    cache.register_loader(ResourceKind::Texture, texture_loader);

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        profile_loads(&cache, 64);
        cache.finalize_until_idle(Duration::from_secs(10));
    }

    println!("Profiling 2k texture loads against a 64-unit budget...");
    let start = Instant::now();
    profile_loads(&cache, 2_000);
    let report = cache.finalize_until_idle(Duration::from_secs(30));
    println!(
        "Loaded 2k textures in {:?} ({} finalized in last drain, {} evictions, cost {}/{})",
        start.elapsed(),
        report.finalized.len(),
        cache.stats().evictions,
        cache.current_cost(),
        cache.max_cost()
    );
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_cache binary requires --features profiling");
}
