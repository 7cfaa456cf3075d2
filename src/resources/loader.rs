use crate::error::{CacheError, Result};
use crate::resources::asset_types::{ScriptData, ShaderProgramData, ShaderStage, ShaderStageKind};
use crate::resources::{HandleId, Resource, ResourceHandle, ResourceKind, ResourcePayload};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Where a load step runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStrategy {
    /// On the thread that requested the load
    Inline,
    /// On the loader worker pool
    Background,
}

/// Snapshot of a handle taken when its load is dispatched.
/// Loaders never see the handle itself.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest {
    pub id: HandleId,
    pub kind: ResourceKind,
    pub name: String,
    pub path: String,
    pub additional_paths: Vec<String>,
    pub attributes: Map<String, Value>,
    pub uses_json: bool,
}

impl LoadRequest {
    pub fn from_handle(handle: &ResourceHandle) -> Self {
        Self {
            id: handle.id(),
            kind: handle.kind(),
            name: handle.name(),
            path: handle.path(),
            additional_paths: handle.additional_paths(),
            attributes: handle.attributes(),
            uses_json: handle.flags().uses_json(),
        }
    }

    /// Primary path followed by any additional ones
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str())
            .filter(|path| !path.is_empty())
            .chain(self.additional_paths.iter().map(String::as_str))
    }
}

/// A sub-resource produced while loading its parent (e.g. the meshes of a model)
#[derive(Debug)]
pub struct ChildAsset {
    pub name: String,
    pub resource: Resource,
}

/// Output of a load step
#[derive(Debug)]
pub struct LoadedAsset {
    pub resource: Resource,
    pub children: Vec<ChildAsset>,
}

impl LoadedAsset {
    pub fn new(resource: impl Into<Resource>) -> Self {
        Self {
            resource: resource.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, name: impl Into<String>, resource: impl Into<Resource>) -> Self {
        self.children.push(ChildAsset {
            name: name.into(),
            resource: resource.into(),
        });
        self
    }
}

impl From<Resource> for LoadedAsset {
    fn from(resource: Resource) -> Self {
        LoadedAsset::new(resource)
    }
}

/// Format decoder for one resource kind. Runs off the finalize thread.
pub trait Loader: Send + Sync {
    fn load(&self, request: &LoadRequest) -> Result<LoadedAsset>;
}

impl<F> Loader for F
where
    F: Fn(&LoadRequest) -> Result<LoadedAsset> + Send + Sync,
{
    fn load(&self, request: &LoadRequest) -> Result<LoadedAsset> {
        self(request)
    }
}

/// Loaders keyed by kind
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: FxHashMap<ResourceKind, Arc<dyn Loader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader, replacing any previous loader for `kind`
    pub fn register(&mut self, kind: ResourceKind, loader: Arc<dyn Loader>) {
        self.loaders.insert(kind, loader);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn Loader>> {
        self.loaders.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.loaders.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

/// Read a whole text file
pub fn read_text(path: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| CacheError::LoadError(format!("Failed to load file {path}: {e}")))
}

/// Read a whole binary file
pub fn read_binary(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| CacheError::LoadError(format!("Failed to load file {path}: {e}")))
}

pub fn file_exists(path: &str) -> bool {
    Path::new(path).exists()
}

/// Loads scripts and shader programs straight from their source files.
///
/// A shader program gets one stage per path; the stage comes from the file
/// extension (`.vert`, `.frag`, `.geom`, `.comp`).
pub struct TextSourceLoader;

impl TextSourceLoader {
    fn load_shader(request: &LoadRequest) -> Result<ShaderProgramData> {
        let mut stages = Vec::new();
        for path in request.all_paths() {
            let extension = Path::new(path)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or_default();
            let kind = ShaderStageKind::from_extension(extension).ok_or_else(|| {
                CacheError::LoadError(format!("Unknown shader stage for file {path}"))
            })?;
            stages.push(ShaderStage {
                kind,
                source: read_text(path)?,
            });
        }
        if stages.is_empty() {
            return Err(CacheError::LoadError(format!(
                "Shader program '{}' has no source files",
                request.name
            )));
        }
        Ok(ShaderProgramData { stages })
    }
}

impl Loader for TextSourceLoader {
    fn load(&self, request: &LoadRequest) -> Result<LoadedAsset> {
        let payload = match request.kind {
            ResourceKind::Script => ResourcePayload::Script(ScriptData {
                source: read_text(&request.path)?,
            }),
            ResourceKind::ShaderProgram => {
                ResourcePayload::ShaderProgram(Self::load_shader(request)?)
            }
            other => return Err(CacheError::NoLoader(other)),
        };
        Ok(LoadedAsset::new(Resource::new(payload)))
    }
}
