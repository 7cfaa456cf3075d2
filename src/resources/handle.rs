use crate::error::{CacheError, Result};
use crate::resources::device::FinalizeContext;
use crate::resources::serialization::HandleRecord;
use crate::resources::{Priority, Resource, ResourceKind};
use crossbeam::channel::Sender;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Process-unique handle identity; never reused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        HandleId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Load/delete behavior of a handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleFlags {
    pub priority: Priority,
    /// Loaded along with a parent resource
    pub child: bool,
    /// No path; built in memory rather than read from a file
    pub runtime_generated: bool,
    /// Never written out when the cache is serialized
    pub unsaved: bool,
    /// Loader initializes the payload from the handle attributes
    pub uses_json: bool,
}

impl HandleFlags {
    pub fn removable() -> Self {
        Self::default()
    }

    pub fn permanent() -> Self {
        Self {
            priority: Priority::Permanent,
            ..Self::default()
        }
    }

    pub fn core() -> Self {
        Self {
            priority: Priority::Core,
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: bool) -> Self {
        self.child = child;
        self
    }

    pub fn with_runtime_generated(mut self, generated: bool) -> Self {
        self.runtime_generated = generated;
        self
    }

    pub fn with_unsaved(mut self, unsaved: bool) -> Self {
        self.unsaved = unsaved;
        self
    }

    pub fn with_uses_json(mut self, uses_json: bool) -> Self {
        self.uses_json = uses_json;
        self
    }

    pub fn is_core(&self) -> bool {
        self.priority == Priority::Core
    }

    pub fn is_removable(&self) -> bool {
        self.priority == Priority::Removable
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_removable()
    }

    /// Core resources are never saved
    pub fn is_unsaved(&self) -> bool {
        self.unsaved || self.is_core()
    }

    pub fn uses_json(&self) -> bool {
        self.uses_json || self.runtime_generated
    }
}

/// Name a handle after its file: the file stem of `path`
pub fn name_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(path)
        .to_string()
}

#[derive(Debug)]
struct HandleMeta {
    name: String,
    path: String,
    additional_paths: Vec<String>,
    flags: HandleFlags,
    attributes: Map<String, Value>,
}

#[derive(Debug, Default)]
struct ResourceSlot {
    resource: Option<Arc<Resource>>,
    loading: bool,
    constructed: bool,
}

/// Stable, named, shareable wrapper around zero or one [`Resource`].
///
/// The attached resource sits behind a handle-local lock so a consumer calling
/// [`resource`](Self::resource) never sees a half-attached value while a loader
/// thread calls [`set_resource`](Self::set_resource). The lock is only held
/// inside handle methods; consumers get a shared `Arc<Resource>`.
pub struct ResourceHandle {
    id: HandleId,
    kind: ResourceKind,
    meta: RwLock<HandleMeta>,
    slot: RwLock<ResourceSlot>,
    children: RwLock<SmallVec<[Arc<ResourceHandle>; 4]>>,
    parent: RwLock<Option<HandleId>>,
    reload_requests: OnceLock<Sender<HandleId>>,
}

impl ResourceHandle {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        kind: ResourceKind,
        flags: HandleFlags,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: HandleId::next(),
            kind,
            meta: RwLock::new(HandleMeta {
                name: name.into(),
                path: path.into(),
                additional_paths: Vec::new(),
                flags,
                attributes: Map::new(),
            }),
            slot: RwLock::new(ResourceSlot::default()),
            children: RwLock::new(SmallVec::new()),
            parent: RwLock::new(None),
            reload_requests: OnceLock::new(),
        })
    }

    /// Handle named after the file at `path`
    pub fn from_path(path: &str, kind: ResourceKind, flags: HandleFlags) -> Arc<Self> {
        Self::new(name_from_path(path), path, kind, flags)
    }

    /// Handle for an in-memory resource with no backing file
    pub fn generated(name: impl Into<String>, kind: ResourceKind, flags: HandleFlags) -> Arc<Self> {
        Self::new(name, "", kind, flags.with_runtime_generated(true))
    }

    /// Handle described by a persisted record
    pub fn from_record(record: &HandleRecord) -> Arc<Self> {
        let flags = HandleFlags {
            priority: record.priority,
            runtime_generated: record.path.is_empty(),
            ..HandleFlags::default()
        };
        let handle = Self::new(record.resolved_name(), record.path.clone(), record.kind, flags);
        {
            let mut meta = handle.meta.write();
            meta.additional_paths = record.additional_paths.clone();
            meta.attributes = record.attributes.clone();
        }
        handle
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Declared kind; every attached resource must match it
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub(crate) fn set_name(&self, name: impl Into<String>) {
        self.meta.write().name = name.into();
    }

    pub fn path(&self) -> String {
        self.meta.read().path.clone()
    }

    pub fn set_path(&self, path: impl Into<String>) {
        self.meta.write().path = path.into();
    }

    /// Set the path of this handle and, recursively, of all its children
    pub fn set_child_paths(&self, path: &str) {
        self.set_path(path);
        for child in self.children() {
            child.set_child_paths(path);
        }
    }

    pub fn additional_paths(&self) -> Vec<String> {
        self.meta.read().additional_paths.clone()
    }

    pub fn push_additional_path(&self, path: impl Into<String>) {
        self.meta.write().additional_paths.push(path.into());
    }

    pub fn flags(&self) -> HandleFlags {
        self.meta.read().flags
    }

    pub fn set_flags(&self, flags: HandleFlags) {
        self.meta.write().flags = flags;
    }

    pub fn priority(&self) -> Priority {
        self.flags().priority
    }

    pub fn set_priority(&self, priority: Priority) {
        self.meta.write().flags.priority = priority;
    }

    pub fn is_child(&self) -> bool {
        self.flags().child
    }

    pub fn is_core(&self) -> bool {
        self.flags().is_core()
    }

    pub fn is_removable(&self) -> bool {
        self.flags().is_removable()
    }

    pub fn is_permanent(&self) -> bool {
        self.flags().is_permanent()
    }

    pub fn is_runtime_generated(&self) -> bool {
        self.flags().runtime_generated
    }

    pub fn is_unsaved(&self) -> bool {
        self.flags().is_unsaved()
    }

    pub fn attributes(&self) -> Map<String, Value> {
        self.meta.read().attributes.clone()
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.meta.read().attributes.get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.meta.write().attributes.insert(key.into(), value);
    }

    pub fn is_loading(&self) -> bool {
        self.slot.read().loading
    }

    pub fn is_constructed(&self) -> bool {
        self.slot.read().constructed
    }

    pub fn has_resource(&self) -> bool {
        self.slot.read().resource.is_some()
    }

    /// No resource attached and none on its way
    pub fn needs_reload(&self) -> bool {
        let slot = self.slot.read();
        slot.resource.is_none() && !slot.loading
    }

    /// Cost of the attached resource, if any
    pub fn cost(&self) -> Option<u64> {
        self.slot.read().resource.as_ref().map(|resource| resource.cost())
    }

    /// Non-blocking access to the finished resource.
    ///
    /// Returns `None` while loading or before finalize has run. If nothing is
    /// attached and nothing is loading, a reload request is sent to the owning
    /// cache first. The returned `Arc` stays valid after eviction.
    pub fn resource(&self) -> Option<Arc<Resource>> {
        let slot = self.slot.read();
        match &slot.resource {
            Some(resource) if slot.constructed => Some(resource.clone()),
            Some(_) => None,
            None => {
                let wants_reload = !slot.loading;
                drop(slot);
                if wants_reload {
                    self.request_reload();
                }
                None
            }
        }
    }

    /// Attach a resource, replacing any previous one without running its
    /// removal hook.
    pub fn set_resource(&self, resource: Resource) -> Result<()> {
        if resource.kind() != self.kind {
            return Err(CacheError::TypeMismatch {
                expected: self.kind,
                found: resource.kind(),
            });
        }
        let mut slot = self.slot.write();
        slot.constructed = resource.is_constructed();
        slot.resource = Some(Arc::new(resource));
        Ok(())
    }

    /// Run the removal hook and detach the resource, cascading to owned
    /// children.
    pub fn remove_resource(&self, ctx: &mut FinalizeContext<'_>) -> bool {
        ctx.affinity.assert_current("remove_resource");
        let removed = {
            let mut slot = self.slot.write();
            slot.constructed = false;
            match slot.resource.take() {
                Some(resource) => {
                    resource.on_removal(&mut *ctx.device);
                    true
                }
                None => false,
            }
        };
        for child in self.owned_children() {
            child.remove_resource(ctx);
        }
        removed
    }

    /// Finalize step: post-construct children, then this resource.
    ///
    /// Panics off the finalize thread, when no resource is attached, or when
    /// this top-level handle was already constructed.
    pub fn post_construct(&self, ctx: &mut FinalizeContext<'_>) {
        ctx.affinity.assert_current("post_construct");
        if self.is_constructed() {
            if self.parent_id().is_none() {
                panic!(
                    "post_construct called on already constructed resource '{}' ({})",
                    self.name(),
                    self.id
                );
            }
            tracing::warn!(name = %self.name(), "skipped reconstruction of child resource");
            return;
        }

        for child in self.children() {
            if child.is_child() && child.has_resource() {
                child.post_construct(ctx);
            }
        }

        let label = self.name();
        let mut slot = self.slot.write();
        // Unconstructed resources are never handed out, so the slot is the only owner
        let resource = match slot.resource.as_mut().map(Arc::get_mut) {
            Some(Some(resource)) => resource,
            Some(None) => panic!("post_construct called on '{label}' while its resource is shared"),
            None => panic!("post_construct called on '{label}' with no resource attached"),
        };
        resource.post_construct(&label, &mut *ctx.device);
        slot.constructed = true;
        slot.loading = false;
    }

    /// Mark the handle as loading. Fails if a load is pending or a resource
    /// is already present.
    pub(crate) fn begin_load(&self) -> Result<()> {
        let mut slot = self.slot.write();
        if slot.loading {
            return Err(CacheError::InvalidState(format!(
                "resource {} is already loading",
                self.id
            )));
        }
        if slot.constructed || slot.resource.is_some() {
            return Err(CacheError::InvalidState(format!(
                "resource {} is already loaded",
                self.id
            )));
        }
        slot.loading = true;
        Ok(())
    }

    pub(crate) fn abort_load(&self) {
        self.slot.write().loading = false;
    }

    pub(crate) fn bind_reload_channel(&self, sender: Sender<HandleId>) {
        // A handle belongs to one cache; later binds are ignored
        let _ = self.reload_requests.set(sender);
    }

    fn request_reload(&self) {
        if let Some(sender) = self.reload_requests.get() {
            let _ = sender.send(self.id);
        }
    }

    pub fn parent_id(&self) -> Option<HandleId> {
        *self.parent.read()
    }

    pub fn children(&self) -> Vec<Arc<ResourceHandle>> {
        self.children.read().to_vec()
    }

    /// Children whose lifetime follows this handle: child-flagged ones, unless
    /// this handle is runtime generated (its children are linked by hand)
    pub(crate) fn owned_children(&self) -> Vec<Arc<ResourceHandle>> {
        if self.is_runtime_generated() {
            return Vec::new();
        }
        self.children
            .read()
            .iter()
            .filter(|child| child.is_child())
            .cloned()
            .collect()
    }

    pub fn add_child(&self, child: Arc<ResourceHandle>) -> Result<()> {
        let mut children = self.children.write();
        if children.iter().any(|existing| existing.id == child.id) {
            return Err(CacheError::DuplicateChild(child.id));
        }
        if child.is_child() {
            *child.parent.write() = Some(self.id);
        }
        children.push(child);
        Ok(())
    }

    pub fn child(&self, id: HandleId) -> Option<Arc<ResourceHandle>> {
        self.children.read().iter().find(|child| child.id == id).cloned()
    }

    pub fn child_by_name(&self, name: &str, kind: ResourceKind) -> Option<Arc<ResourceHandle>> {
        self.children
            .read()
            .iter()
            .find(|child| child.kind == kind && child.name() == name)
            .cloned()
    }

    pub fn children_of_kind(&self, kind: ResourceKind) -> Vec<Arc<ResourceHandle>> {
        self.children
            .read()
            .iter()
            .filter(|child| child.kind == kind)
            .cloned()
            .collect()
    }

    /// Persisted description of this handle (never the payload)
    pub fn to_record(&self) -> HandleRecord {
        let meta = self.meta.read();
        HandleRecord {
            name: meta.name.clone(),
            kind: self.kind,
            priority: meta.flags.priority,
            path: meta.path.clone(),
            attributes: meta.attributes.clone(),
            additional_paths: meta.additional_paths.clone(),
        }
    }

    pub fn as_json(&self) -> Result<Value> {
        serde_json::to_value(self.to_record())
            .map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    /// Restore name, priority, path and attributes from a record.
    /// The record must describe the same kind as this handle.
    pub fn load_from_json(&self, json: &Value) -> Result<()> {
        let record: HandleRecord = serde_json::from_value(json.clone())
            .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
        if record.kind != self.kind {
            return Err(CacheError::TypeMismatch {
                expected: self.kind,
                found: record.kind,
            });
        }
        let mut meta = self.meta.write();
        meta.name = record.resolved_name();
        meta.flags.priority = record.priority;
        meta.flags.runtime_generated = record.path.is_empty();
        meta.path = record.path;
        meta.additional_paths = record.additional_paths;
        meta.attributes = record.attributes;
        Ok(())
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta.read();
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &meta.name)
            .field("path", &meta.path)
            .field("flags", &meta.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::asset_types::{MeshData, ModelData, ScriptData};
    use crate::resources::device::{HeadlessDevice, ThreadAffinity};
    use crate::resources::ResourcePayload;

    fn payload_of(kind: ResourceKind) -> ResourcePayload {
        use crate::resources::asset_types::*;
        match kind {
            ResourceKind::Image => ResourcePayload::Image(ImageData::default()),
            ResourceKind::Texture => ResourcePayload::Texture(TextureData::default()),
            ResourceKind::Material => ResourcePayload::Material(MaterialData::default()),
            ResourceKind::Mesh => ResourcePayload::Mesh(MeshData::default()),
            ResourceKind::CubeTexture => ResourcePayload::CubeTexture(CubeTextureData::default()),
            ResourceKind::Animation => ResourcePayload::Animation(AnimationData::default()),
            ResourceKind::Model => ResourcePayload::Model(ModelData::default()),
            ResourceKind::ShaderProgram => {
                ResourcePayload::ShaderProgram(ShaderProgramData::default())
            }
            ResourceKind::Script => ResourcePayload::Script(ScriptData::default()),
            ResourceKind::Skeleton => ResourcePayload::Skeleton(SkeletonData::default()),
            ResourceKind::Audio => ResourcePayload::Audio(AudioData::default()),
        }
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let a = ResourceHandle::from_path("meshes/a.obj", ResourceKind::Mesh, HandleFlags::default());
        let b = ResourceHandle::from_path("meshes/a.obj", ResourceKind::Mesh, HandleFlags::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn test_set_resource_rejects_every_mismatched_kind() {
        for declared in ResourceKind::ALL {
            for attached in ResourceKind::ALL {
                let handle = ResourceHandle::new("h", "", declared, HandleFlags::default());
                let result = handle.set_resource(Resource::new(payload_of(attached)));
                if declared == attached {
                    assert!(result.is_ok());
                    assert!(handle.has_resource());
                } else {
                    assert_eq!(
                        result,
                        Err(CacheError::TypeMismatch {
                            expected: declared,
                            found: attached
                        })
                    );
                    assert!(!handle.has_resource());
                }
            }
        }
    }

    #[test]
    fn test_resource_not_ready_until_constructed() {
        let handle = ResourceHandle::new("quad", "", ResourceKind::Mesh, HandleFlags::default());
        handle
            .set_resource(Resource::new(ResourcePayload::Mesh(MeshData::quad())))
            .unwrap();
        assert!(handle.has_resource());
        assert!(handle.resource().is_none());

        let mut device = HeadlessDevice::new();
        let affinity = ThreadAffinity::current();
        handle.post_construct(&mut FinalizeContext::new(&mut device, &affinity));
        assert!(handle.is_constructed());
        assert_eq!(handle.resource().unwrap().kind(), ResourceKind::Mesh);
    }

    #[test]
    fn test_missing_resource_requests_reload() {
        let (sender, receiver) = crossbeam::channel::unbounded();
        let handle = ResourceHandle::new("script", "a.py", ResourceKind::Script, HandleFlags::default());
        handle.bind_reload_channel(sender);

        assert!(handle.resource().is_none());
        assert_eq!(receiver.try_recv().unwrap(), handle.id());

        // A loading handle does not ask again
        handle.begin_load().unwrap();
        assert!(handle.resource().is_none());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    #[should_panic(expected = "already constructed")]
    fn test_double_post_construct_panics() {
        let handle = ResourceHandle::new("script", "", ResourceKind::Script, HandleFlags::default());
        handle
            .set_resource(Resource::new(ResourcePayload::Script(ScriptData::default())))
            .unwrap();
        let mut device = HeadlessDevice::new();
        let affinity = ThreadAffinity::current();
        let mut ctx = FinalizeContext::new(&mut device, &affinity);
        handle.post_construct(&mut ctx);
        handle.post_construct(&mut ctx);
    }

    #[test]
    fn test_post_construct_rejected_off_thread() {
        let handle = ResourceHandle::new("quad", "", ResourceKind::Mesh, HandleFlags::default());
        handle
            .set_resource(Resource::new(ResourcePayload::Mesh(MeshData::quad())))
            .unwrap();
        let affinity = ThreadAffinity::current();
        let worker_handle = handle.clone();
        let panicked = std::thread::spawn(move || {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut device = HeadlessDevice::new();
                worker_handle.post_construct(&mut FinalizeContext::new(&mut device, &affinity));
            }))
            .is_err()
        })
        .join()
        .unwrap();
        assert!(panicked);
        assert!(!handle.is_constructed());
    }

    #[test]
    fn test_remove_resource_cascades_to_children() {
        let model = ResourceHandle::new("crate", "crate.gltf", ResourceKind::Model, HandleFlags::default());
        model
            .set_resource(Resource::new(ResourcePayload::Model(ModelData::default())))
            .unwrap();
        let mesh = ResourceHandle::new(
            "crate_mesh",
            "crate.gltf",
            ResourceKind::Mesh,
            HandleFlags::default().with_child(true),
        );
        mesh.set_resource(Resource::new(ResourcePayload::Mesh(MeshData::quad())))
            .unwrap();
        model.add_child(mesh.clone()).unwrap();
        assert_eq!(mesh.parent_id(), Some(model.id()));
        assert_eq!(
            model.add_child(mesh.clone()),
            Err(CacheError::DuplicateChild(mesh.id()))
        );

        let mut device = HeadlessDevice::new();
        let affinity = ThreadAffinity::current();
        let mut ctx = FinalizeContext::new(&mut device, &affinity);
        model.post_construct(&mut ctx);
        assert!(mesh.is_constructed());
        assert_eq!(ctx.device.live_objects(), 2);

        assert!(model.remove_resource(&mut ctx));
        assert!(!model.has_resource());
        assert!(!mesh.has_resource());
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn test_child_lookup() {
        let model = ResourceHandle::new("m", "m.gltf", ResourceKind::Model, HandleFlags::default());
        let mesh = ResourceHandle::new("body", "m.gltf", ResourceKind::Mesh, HandleFlags::default().with_child(true));
        model.add_child(mesh.clone()).unwrap();

        assert_eq!(model.child(mesh.id()).unwrap().id(), mesh.id());
        assert!(model.child_by_name("body", ResourceKind::Mesh).is_some());
        assert!(model.child_by_name("body", ResourceKind::Material).is_none());
        assert_eq!(model.children_of_kind(ResourceKind::Mesh).len(), 1);

        model.set_child_paths("moved/m.gltf");
        assert_eq!(mesh.path(), "moved/m.gltf");
    }

    #[test]
    fn test_json_round_trip() {
        let handle = ResourceHandle::from_path("textures/brick.png", ResourceKind::Texture, HandleFlags::permanent());
        handle.set_attribute("srgb", serde_json::json!(true));
        let json = handle.as_json().unwrap();
        assert_eq!(json["type"], serde_json::json!(1));
        assert_eq!(json["priority"], serde_json::json!(1));

        let restored = ResourceHandle::new("", "", ResourceKind::Texture, HandleFlags::default());
        restored.load_from_json(&json).unwrap();
        assert_eq!(restored.to_record(), handle.to_record());

        let wrong = ResourceHandle::new("", "", ResourceKind::Mesh, HandleFlags::default());
        assert!(matches!(
            wrong.load_from_json(&json),
            Err(CacheError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_begin_load_rejects_loaded_handle() {
        let handle = ResourceHandle::new("s", "", ResourceKind::Script, HandleFlags::default());
        handle
            .set_resource(Resource::new(ResourcePayload::Script(ScriptData::default())))
            .unwrap();
        assert!(matches!(handle.begin_load(), Err(CacheError::InvalidState(_))));
    }

    #[test]
    fn test_core_flags_imply_unsaved_and_permanent() {
        let flags = HandleFlags::core();
        assert!(flags.is_unsaved());
        assert!(flags.is_permanent());
        assert!(!flags.is_removable());
        assert!(HandleFlags::removable().is_removable());
        assert!(HandleFlags::default().with_runtime_generated(true).uses_json());
    }
}
