use crate::resources::device::{DeviceObject, RenderDevice};
use glam::{Mat4, Quat, Vec2, Vec3};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::mem::size_of;

/// Device objects created for one resource
pub type DeviceObjects = SmallVec<[DeviceObject; 4]>;

/// Per-kind behavior of a decoded payload
pub trait AssetData: Send + Sync {
    /// Approximate in-memory size of the decoded data
    fn byte_size(&self) -> usize;

    /// Create the device-side objects for this payload.
    /// CPU-only kinds create nothing.
    fn upload(&self, _label: &str, _device: &mut dyn RenderDevice) -> DeviceObjects {
        DeviceObjects::new()
    }
}

/// Decoded image (CPU side only)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

impl AssetData for ImageData {
    fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Texture resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub generate_mipmaps: bool,
}

impl TextureData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
            generate_mipmaps: false,
        }
    }
}

impl AssetData for TextureData {
    fn byte_size(&self) -> usize {
        // A full mip chain adds roughly a third
        if self.generate_mipmaps {
            self.pixels.len() + self.pixels.len() / 3
        } else {
            self.pixels.len()
        }
    }

    fn upload(&self, label: &str, device: &mut dyn RenderDevice) -> DeviceObjects {
        let mut objects = DeviceObjects::new();
        objects.push(device.create_object(label, self.byte_size()));
        objects
    }
}

/// Material: references textures and a shader program by name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialData {
    pub shader: Option<String>,
    pub textures: Vec<String>,
    pub uniforms: BTreeMap<String, f32>,
}

impl AssetData for MaterialData {
    fn byte_size(&self) -> usize {
        let names: usize = self.textures.iter().map(String::len).sum();
        let uniforms: usize = self
            .uniforms
            .keys()
            .map(|key| key.len() + size_of::<f32>())
            .sum();
        names + uniforms + self.shader.as_ref().map_or(0, String::len)
    }
}

/// Mesh vertex and index data
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_bytes(&self) -> usize {
        self.positions.len() * size_of::<Vec3>()
            + self.normals.len() * size_of::<Vec3>()
            + self.uvs.len() * size_of::<Vec2>()
    }

    pub fn index_bytes(&self) -> usize {
        self.indices.len() * size_of::<u32>()
    }

    /// Unit quad in the XY plane, used for built-in procedural meshes
    pub fn quad() -> Self {
        Self {
            positions: vec![
                Vec3::new(-0.5, -0.5, 0.0),
                Vec3::new(0.5, -0.5, 0.0),
                Vec3::new(0.5, 0.5, 0.0),
                Vec3::new(-0.5, 0.5, 0.0),
            ],
            normals: vec![Vec3::Z; 4],
            uvs: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(0.0, 1.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

impl AssetData for MeshData {
    fn byte_size(&self) -> usize {
        self.vertex_bytes() + self.index_bytes()
    }

    fn upload(&self, label: &str, device: &mut dyn RenderDevice) -> DeviceObjects {
        let mut objects = DeviceObjects::new();
        objects.push(device.create_object(label, self.vertex_bytes()));
        if !self.indices.is_empty() {
            objects.push(device.create_object(label, self.index_bytes()));
        }
        objects
    }
}

/// Six square faces (+X, -X, +Y, -Y, +Z, -Z)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CubeTextureData {
    pub face_size: u32,
    pub faces: [Vec<u8>; 6],
}

impl AssetData for CubeTextureData {
    fn byte_size(&self) -> usize {
        self.faces.iter().map(Vec::len).sum()
    }

    fn upload(&self, label: &str, device: &mut dyn RenderDevice) -> DeviceObjects {
        let mut objects = DeviceObjects::new();
        objects.push(device.create_object(label, self.byte_size()));
        objects
    }
}

/// Keyframes for one bone
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationChannel {
    pub bone: String,
    pub times: Vec<f32>,
    pub translations: Vec<Vec3>,
    pub rotations: Vec<Quat>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationData {
    pub duration: f32,
    pub channels: Vec<AnimationChannel>,
}

impl AssetData for AnimationData {
    fn byte_size(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| {
                channel.bone.len()
                    + channel.times.len() * size_of::<f32>()
                    + channel.translations.len() * size_of::<Vec3>()
                    + channel.rotations.len() * size_of::<Quat>()
            })
            .sum()
    }
}

/// Model: meshes, materials and skeleton referenced by name.
/// Meshes loaded along with the model live in child handles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelData {
    pub meshes: Vec<String>,
    pub materials: Vec<String>,
    pub skeleton: Option<String>,
}

impl AssetData for ModelData {
    fn byte_size(&self) -> usize {
        self.meshes.iter().map(String::len).sum::<usize>()
            + self.materials.iter().map(String::len).sum::<usize>()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl ShaderStageKind {
    /// Stage implied by a source file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "vert" => Some(ShaderStageKind::Vertex),
            "frag" => Some(ShaderStageKind::Fragment),
            "geom" => Some(ShaderStageKind::Geometry),
            "comp" => Some(ShaderStageKind::Compute),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderStage {
    pub kind: ShaderStageKind,
    pub source: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderProgramData {
    pub stages: Vec<ShaderStage>,
}

impl AssetData for ShaderProgramData {
    fn byte_size(&self) -> usize {
        self.stages.iter().map(|stage| stage.source.len()).sum()
    }

    fn upload(&self, label: &str, device: &mut dyn RenderDevice) -> DeviceObjects {
        let mut objects = DeviceObjects::new();
        objects.push(device.create_object(label, self.byte_size()));
        objects
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptData {
    pub source: String,
}

impl AssetData for ScriptData {
    fn byte_size(&self) -> usize {
        self.source.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub inverse_bind: Mat4,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonData {
    pub bones: Vec<Bone>,
}

impl AssetData for SkeletonData {
    fn byte_size(&self) -> usize {
        self.bones
            .iter()
            .map(|bone| bone.name.len() + size_of::<Mat4>() + size_of::<usize>())
            .sum()
    }
}

/// Audio resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioData {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioData {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / (self.sample_rate as f32 * self.channels as f32)
    }
}

impl AssetData for AudioData {
    fn byte_size(&self) -> usize {
        self.samples.len() * size_of::<f32>()
    }
}
