use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resource stored by a handle.
///
/// Ordinals are persisted and define reconstruction order: a kind is only
/// ever restored after every kind it can depend on (images before textures,
/// textures before materials, meshes and materials before models).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ResourceKind {
    Image = 0,
    Texture = 1,
    Material = 2,
    Mesh = 3,
    CubeTexture = 4,
    Animation = 5,
    Model = 6,
    ShaderProgram = 7,
    Script = 8,
    Skeleton = 9,
    Audio = 10,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Image,
        ResourceKind::Texture,
        ResourceKind::Material,
        ResourceKind::Mesh,
        ResourceKind::CubeTexture,
        ResourceKind::Animation,
        ResourceKind::Model,
        ResourceKind::ShaderProgram,
        ResourceKind::Script,
        ResourceKind::Skeleton,
        ResourceKind::Audio,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Image => "Image",
            ResourceKind::Texture => "Texture",
            ResourceKind::Material => "Material",
            ResourceKind::Mesh => "Mesh",
            ResourceKind::CubeTexture => "CubeTexture",
            ResourceKind::Animation => "Animation",
            ResourceKind::Model => "Model",
            ResourceKind::ShaderProgram => "ShaderProgram",
            ResourceKind::Script => "Script",
            ResourceKind::Skeleton => "Skeleton",
            ResourceKind::Audio => "Audio",
        }
    }

    /// Folder name housing resources of this kind inside a project
    pub fn dir_name(self) -> &'static str {
        match self {
            ResourceKind::Image => "images",
            ResourceKind::Texture => "textures",
            ResourceKind::Material => "materials",
            ResourceKind::Mesh => "meshes",
            ResourceKind::CubeTexture => "cube_textures",
            ResourceKind::Animation => "animations",
            ResourceKind::Model => "models",
            ResourceKind::ShaderProgram => "shaders",
            ResourceKind::Script => "scripts",
            ResourceKind::Skeleton => "skeletons",
            ResourceKind::Audio => "audio",
        }
    }

    /// Kinds with a dedicated lowercase-name index in the cache
    pub fn has_name_index(self) -> bool {
        matches!(
            self,
            ResourceKind::Model
                | ResourceKind::Material
                | ResourceKind::ShaderProgram
                | ResourceKind::Script
                | ResourceKind::Skeleton
                | ResourceKind::Audio
        )
    }
}

impl TryFrom<i32> for ResourceKind {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_ordinal(value).ok_or_else(|| format!("invalid resource type ordinal: {value}"))
    }
}

impl From<ResourceKind> for i32 {
    fn from(kind: ResourceKind) -> Self {
        kind.ordinal()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cache-management priority of a handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    /// May be evicted to free budget
    #[default]
    Removable = 0,
    /// Only removed when forced
    Permanent = 1,
    /// Built-in engine resource; survives `clear()` and is never evicted
    Core = 2,
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Removable),
            1 => Ok(Priority::Permanent),
            2 => Ok(Priority::Core),
            other => Err(format!("invalid resource priority: {other}")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_dense_and_stable() {
        for (index, kind) in ResourceKind::ALL.iter().enumerate() {
            assert_eq!(kind.ordinal(), index as i32);
            assert_eq!(ResourceKind::from_ordinal(index as i32), Some(*kind));
        }
        assert_eq!(ResourceKind::from_ordinal(-1), None);
        assert_eq!(ResourceKind::from_ordinal(11), None);
    }

    #[test]
    fn test_dependencies_sort_first() {
        assert!(ResourceKind::Mesh < ResourceKind::Model);
        assert!(ResourceKind::Material < ResourceKind::Model);
        assert!(ResourceKind::Image < ResourceKind::Texture);
        assert!(ResourceKind::Texture < ResourceKind::Material);
    }

    #[test]
    fn test_kind_serializes_as_integer() {
        let json = serde_json::to_value(ResourceKind::Model).unwrap();
        assert_eq!(json, serde_json::json!(6));
        let kind: ResourceKind = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(kind, ResourceKind::Mesh);
        assert!(serde_json::from_value::<ResourceKind>(serde_json::json!(42)).is_err());
    }

    #[test]
    fn test_priority_round_trip() {
        assert_eq!(Priority::default(), Priority::Removable);
        let json = serde_json::to_value(Priority::Core).unwrap();
        assert_eq!(json, serde_json::json!(2));
        assert!(serde_json::from_value::<Priority>(serde_json::json!(7)).is_err());
    }
}
