//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use resource_cache::prelude::*;
//! ```

pub use crate::config::CacheConfig;
pub use crate::error::{CacheError, Result};
pub use crate::resources::asset_types::{
    AnimationData, AudioData, CubeTextureData, ImageData, MaterialData, MeshData, ModelData,
    ScriptData, ShaderProgramData, SkeletonData, TextureData,
};
pub use crate::resources::{
    CacheEvent, FinalizeReport, HandleFlags, HandleId, LoadRequest, LoadedAsset, Loader, Priority,
    RemoveFlags, Resource, ResourceCache, ResourceHandle, ResourceKind, ResourcePayload,
};
