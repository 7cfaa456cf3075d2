pub mod asset_types;
pub mod budget;
pub mod cache;
pub mod device;
pub mod events;
pub mod executor;
pub mod finalize;
pub mod handle;
pub mod kind;
pub mod loader;
pub mod resource;
pub mod serialization;

pub use asset_types::AssetData;
pub use cache::{RemoveFlags, ResourceCache};
pub use device::{DeviceObject, FinalizeContext, HeadlessDevice, RenderDevice, ThreadAffinity};
pub use events::CacheEvent;
pub use finalize::FinalizeReport;
pub use handle::{name_from_path, HandleFlags, HandleId, ResourceHandle};
pub use kind::{Priority, ResourceKind};
pub use loader::{ChildAsset, LoadRequest, LoadStrategy, LoadedAsset, Loader, TextSourceLoader};
pub use resource::{cost_for_bytes, CacheStats, Resource, ResourcePayload, COST_UNIT_BYTES, DEFAULT_COST};
pub use serialization::{name_from_record, CacheDocument, HandleRecord};
