use crate::context::TextureId;
use crate::error::EngineError;
use crate::SmallKeyHashMap;

use mipstream_core::{PixelType, StackKind};

use nalgebra::{Matrix4, Vector3};
use std::fmt;

/// Name of the shared cache texture binding, present in every multiresolution-capable program.
/// Deliberately not under the `volume_` prefix, which enumerates per-volume textures.
pub const CACHE_TEXTURE: &str = "block_cache";

pub fn lut_sampler_name(index: usize) -> String {
    format!("lut_sampler_{}", index)
}

pub fn volume_name(index: usize) -> String {
    format!("volume_{}", index)
}

pub fn transfer_function_name(index: usize) -> String {
    format!("transfer_function_{}", index)
}

pub fn color_map_name(index: usize) -> String {
    format!("color_map_{}", index)
}

/// The shader-relevant shape of one visible volume.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VolumeSignature {
    pub kind: StackKind,
    pub pixel: PixelType,
}

/// Ordered list of [`VolumeSignature`]s describing exactly which program variant the current
/// visible set requires. The key of the compiled-program cache; two frames with the same
/// signature reuse the same program.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ShaderSignature {
    volumes: Vec<VolumeSignature>,
}

impl ShaderSignature {
    pub fn new(volumes: impl IntoIterator<Item = VolumeSignature>) -> Self {
        Self {
            volumes: volumes.into_iter().collect(),
        }
    }

    #[inline]
    pub fn volumes(&self) -> &[VolumeSignature] {
        &self.volumes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Whether any volume in the signature samples the shared block cache.
    pub fn uses_block_cache(&self) -> bool {
        self.volumes
            .iter()
            .any(|v| v.kind == StackKind::Multiresolution)
    }
}

impl fmt::Display for ShaderSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.volumes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let kind = match v.kind {
                StackKind::Simple => "simple",
                StackKind::Multiresolution => "multires",
            };
            write!(f, "{}:{:?}", kind, v.pixel)?;
        }
        write!(f, "]")
    }
}

/// One named source segment handed to the program substrate. The substrate splices segments
/// into its ray-marching skeleton; the engine only decides which segments exist and what they
/// sample.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShaderSegment {
    pub name: String,
    pub source: String,
}

/// The sampling segments for `signature`, one per volume, plus the shared cache declaration
/// when any volume is multiresolution.
pub fn signature_segments(signature: &ShaderSignature) -> Vec<ShaderSegment> {
    let mut segments = Vec::with_capacity(signature.len() + 1);

    if signature.uses_block_cache() {
        segments.push(ShaderSegment {
            name: "cache_decl".into(),
            source: format!("uniform usampler3D {};\n", CACHE_TEXTURE),
        });
    }

    for (i, v) in signature.volumes().iter().enumerate() {
        let sampler = match v.pixel {
            PixelType::U8 | PixelType::U16 => "usampler3D",
            PixelType::Argb => "sampler3D",
        };
        let source = match v.kind {
            StackKind::Simple => format!(
                "uniform {sampler} {volume};\n\
                 float sample_{i}(vec3 p) {{ return convert(texture({volume}, p)); }}\n",
                sampler = sampler,
                volume = volume_name(i),
                i = i,
            ),
            StackKind::Multiresolution => format!(
                "uniform usampler3D {lut};\n\
                 float sample_{i}(vec3 p) {{ return sample_cached({lut}, {cache}, p); }}\n",
                lut = lut_sampler_name(i),
                cache = CACHE_TEXTURE,
                i = i,
            ),
        };

        segments.push(ShaderSegment {
            name: format!("sample_volume_{}", i),
            source,
        });
    }

    segments
}

/// Opaque handle to a compiled program, issued by a [`ProgramFactory`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProgramHandle(pub u64);

/// The shader-compilation substrate: turns a signature and its source segments into a compiled
/// program. One compile per distinct signature; the engine caches the result.
pub trait ProgramFactory {
    fn compile(
        &mut self,
        signature: &ShaderSignature,
        segments: &[ShaderSegment],
    ) -> Result<ProgramHandle, EngineError>;
}

/// A uniform value settable on a [`Program`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f64),
    Vec3(Vector3<f64>),
    Mat4(Matrix4<f64>),
}

/// A compiled program plus its name-keyed texture and uniform tables. The renderer reads these
/// tables when issuing the draw; the engine only writes them.
#[derive(Clone, Debug)]
pub struct Program {
    signature: ShaderSignature,
    handle: ProgramHandle,
    textures: SmallKeyHashMap<String, TextureId>,
    uniforms: SmallKeyHashMap<String, UniformValue>,
}

impl Program {
    pub fn new(signature: ShaderSignature, handle: ProgramHandle) -> Self {
        Self {
            signature,
            handle,
            textures: SmallKeyHashMap::default(),
            uniforms: SmallKeyHashMap::default(),
        }
    }

    #[inline]
    pub fn signature(&self) -> &ShaderSignature {
        &self.signature
    }

    #[inline]
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn set_texture(&mut self, name: impl Into<String>, texture: TextureId) {
        self.textures.insert(name.into(), texture);
    }

    #[inline]
    pub fn texture(&self, name: &str) -> Option<TextureId> {
        self.textures.get(name).copied()
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, value: UniformValue) {
        self.uniforms.insert(name.into(), value);
    }

    #[inline]
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    /// The number of texture bindings whose name starts with `prefix`. The readiness check
    /// counts bindings this way rather than tracking them structurally.
    pub fn textures_with_prefix(&self, prefix: &str) -> usize {
        self.textures.keys().filter(|n| n.starts_with(prefix)).count()
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn mixed_signature() -> ShaderSignature {
        ShaderSignature::new([
            VolumeSignature {
                kind: StackKind::Multiresolution,
                pixel: PixelType::U16,
            },
            VolumeSignature {
                kind: StackKind::Simple,
                pixel: PixelType::U8,
            },
        ])
    }

    #[test]
    fn equal_volume_lists_make_equal_signatures() {
        assert_eq!(mixed_signature(), mixed_signature());

        let reversed = ShaderSignature::new(mixed_signature().volumes().iter().rev().copied());
        assert_ne!(mixed_signature(), reversed);
    }

    #[test]
    fn segments_cover_each_volume_once() {
        let segments = signature_segments(&mixed_signature());

        // Cache declaration plus one sampling segment per volume.
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].name, "cache_decl");
        assert!(segments[1].source.contains(&lut_sampler_name(0)));
        assert!(segments[2].source.contains(&volume_name(1)));
    }

    #[test]
    fn simple_only_signature_skips_the_cache() {
        let signature = ShaderSignature::new([VolumeSignature {
            kind: StackKind::Simple,
            pixel: PixelType::U16,
        }]);

        assert!(!signature.uses_block_cache());
        let segments = signature_segments(&signature);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn prefix_count_sees_only_matching_bindings() {
        let mut program = Program::new(mixed_signature(), ProgramHandle(1));
        program.set_texture(CACHE_TEXTURE, TextureId(10));
        program.set_texture(lut_sampler_name(0), TextureId(11));
        program.set_texture(volume_name(1), TextureId(12));

        assert_eq!(program.textures_with_prefix("lut_sampler_"), 1);
        assert_eq!(program.textures_with_prefix("volume_"), 1);
        assert_eq!(program.textures_with_prefix(CACHE_TEXTURE), 1);
    }
}
