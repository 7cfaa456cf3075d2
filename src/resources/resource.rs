use crate::resources::asset_types::{
    AnimationData, AssetData, AudioData, CubeTextureData, DeviceObjects, ImageData, MaterialData,
    MeshData, ModelData, ScriptData, ShaderProgramData, SkeletonData, TextureData,
};
use crate::resources::device::{DeviceObject, RenderDevice};
use crate::resources::ResourceKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cost charged before a real cost is computed during finalize
pub const DEFAULT_COST: u64 = 1;

/// Bytes per cost unit (costs are expressed in mebibytes, rounded up)
pub const COST_UNIT_BYTES: u64 = 1024 * 1024;

/// Convert a payload size to cost units; never less than one unit
pub fn cost_for_bytes(bytes: usize) -> u64 {
    (bytes as u64).div_ceil(COST_UNIT_BYTES).max(DEFAULT_COST)
}

/// Decoded asset value, one variant per kind
#[derive(Clone, Debug, PartialEq)]
pub enum ResourcePayload {
    Image(ImageData),
    Texture(TextureData),
    Material(MaterialData),
    Mesh(MeshData),
    CubeTexture(CubeTextureData),
    Animation(AnimationData),
    Model(ModelData),
    ShaderProgram(ShaderProgramData),
    Script(ScriptData),
    Skeleton(SkeletonData),
    Audio(AudioData),
}

impl ResourcePayload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourcePayload::Image(_) => ResourceKind::Image,
            ResourcePayload::Texture(_) => ResourceKind::Texture,
            ResourcePayload::Material(_) => ResourceKind::Material,
            ResourcePayload::Mesh(_) => ResourceKind::Mesh,
            ResourcePayload::CubeTexture(_) => ResourceKind::CubeTexture,
            ResourcePayload::Animation(_) => ResourceKind::Animation,
            ResourcePayload::Model(_) => ResourceKind::Model,
            ResourcePayload::ShaderProgram(_) => ResourceKind::ShaderProgram,
            ResourcePayload::Script(_) => ResourceKind::Script,
            ResourcePayload::Skeleton(_) => ResourceKind::Skeleton,
            ResourcePayload::Audio(_) => ResourceKind::Audio,
        }
    }

    fn data(&self) -> &dyn AssetData {
        match self {
            ResourcePayload::Image(data) => data,
            ResourcePayload::Texture(data) => data,
            ResourcePayload::Material(data) => data,
            ResourcePayload::Mesh(data) => data,
            ResourcePayload::CubeTexture(data) => data,
            ResourcePayload::Animation(data) => data,
            ResourcePayload::Model(data) => data,
            ResourcePayload::ShaderProgram(data) => data,
            ResourcePayload::Script(data) => data,
            ResourcePayload::Skeleton(data) => data,
            ResourcePayload::Audio(data) => data,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.data().byte_size()
    }
}

/// A loaded asset owned by exactly one handle.
///
/// `kind` never changes after construction. `cost` stays at
/// [`DEFAULT_COST`] until `post_construct` measures the payload, unless a
/// fixed cost was supplied with [`Resource::with_cost`].
///
/// Consumers receive it as `Arc<Resource>`. A consumer still holding one after
/// eviction keeps the payload, but its device objects are already released.
#[derive(Debug)]
pub struct Resource {
    payload: ResourcePayload,
    cost: u64,
    fixed_cost: bool,
    constructed: AtomicBool,
    device_objects: Mutex<DeviceObjects>,
}

impl Resource {
    pub fn new(payload: ResourcePayload) -> Self {
        Self {
            payload,
            cost: DEFAULT_COST,
            fixed_cost: false,
            constructed: AtomicBool::new(false),
            device_objects: Mutex::new(DeviceObjects::new()),
        }
    }

    /// Resource whose cost is known up front and not re-measured
    pub fn with_cost(payload: ResourcePayload, cost: u64) -> Self {
        Self {
            cost,
            fixed_cost: true,
            ..Self::new(payload)
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.payload.kind()
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed.load(Ordering::Acquire)
    }

    pub fn payload(&self) -> &ResourcePayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut ResourcePayload {
        &mut self.payload
    }

    pub fn device_objects(&self) -> Vec<DeviceObject> {
        self.device_objects.lock().to_vec()
    }

    /// Thread-affine construction step: uploads device objects and measures cost.
    /// Callers check thread affinity; this only guards against running twice.
    pub(crate) fn post_construct(&mut self, label: &str, device: &mut dyn RenderDevice) {
        assert!(
            !self.is_constructed(),
            "post_construct called twice on {} resource '{label}'",
            self.kind()
        );
        *self.device_objects.get_mut() = self.payload.data().upload(label, device);
        if !self.fixed_cost {
            self.cost = cost_for_bytes(self.payload.byte_size());
        }
        *self.constructed.get_mut() = true;
    }

    /// Dual of `post_construct`: releases device objects. Takes `&self` since
    /// consumers may still share the value.
    pub(crate) fn on_removal(&self, device: &mut dyn RenderDevice) {
        let objects = std::mem::take(&mut *self.device_objects.lock());
        for object in objects {
            device.release_object(object);
        }
        self.constructed.store(false, Ordering::Release);
    }
}

impl From<ResourcePayload> for Resource {
    fn from(payload: ResourcePayload) -> Self {
        Resource::new(payload)
    }
}

/// Resource statistics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub loads_dispatched: u64,
    pub loads_finalized: u64,
    pub loads_failed: u64,
    pub loads_discarded: u64,
}

impl CacheStats {
    pub fn cache_hit_ratio(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }
}
