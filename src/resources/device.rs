//! Device seam for thread-affine construction steps.
//!
//! Post-construction and removal may create or destroy objects tied to a
//! rendering context. The cache never talks to a GPU API directly; it goes
//! through [`RenderDevice`] and only from the thread recorded in
//! [`ThreadAffinity`].

use ahash::AHashMap;
use std::thread::{self, ThreadId};

/// Opaque id of an object living on the device (buffer, texture, program)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceObject(u64);

impl DeviceObject {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Rendering/device context used by post-construction and removal
pub trait RenderDevice: Send {
    /// Upload `bytes` worth of data and return the created object
    fn create_object(&mut self, label: &str, bytes: usize) -> DeviceObject;

    /// Release a previously created object
    fn release_object(&mut self, object: DeviceObject);

    /// Number of objects currently alive on the device
    fn live_objects(&self) -> usize;
}

/// Device without a backing GPU; tracks object lifetimes only
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_object: u64,
    live: AHashMap<DeviceObject, usize>,
    live_bytes: usize,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held by live objects
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }
}

impl RenderDevice for HeadlessDevice {
    fn create_object(&mut self, _label: &str, bytes: usize) -> DeviceObject {
        self.next_object += 1;
        let object = DeviceObject(self.next_object);
        self.live.insert(object, bytes);
        self.live_bytes += bytes;
        object
    }

    fn release_object(&mut self, object: DeviceObject) {
        match self.live.remove(&object) {
            Some(bytes) => self.live_bytes -= bytes,
            None => panic!("device object {object:?} released twice or never created"),
        }
    }

    fn live_objects(&self) -> usize {
        self.live.len()
    }
}

/// The single thread allowed to run post-construction and removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinity {
    owner: ThreadId,
}

impl ThreadAffinity {
    /// Bind to the calling thread
    pub fn current() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Panics unless called from the owning thread
    pub fn assert_current(&self, operation: &str) {
        let caller = thread::current().id();
        assert!(
            caller == self.owner,
            "{operation} must run on the finalize thread {:?}, called from {:?}",
            self.owner,
            caller
        );
    }
}

/// Everything a thread-affine construction step needs
pub struct FinalizeContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub affinity: &'a ThreadAffinity,
}

impl<'a> FinalizeContext<'a> {
    pub fn new(device: &'a mut dyn RenderDevice, affinity: &'a ThreadAffinity) -> Self {
        Self { device, affinity }
    }
}
