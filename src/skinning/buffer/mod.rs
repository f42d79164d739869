use crate::data::morph::MorphKind;
use crate::skinning::context::ComputeContext;

pub mod allocator;

pub const FLOAT_SIZE: u64 = std::mem::size_of::<f32>() as u64;
pub const MATRIX_SIZE: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64;

pub struct RestPoseBuffers<C: ComputeContext> {
    pub positions: C::Buffer,
    pub normals: C::Buffer,
    pub bone_indices: C::Buffer,
    pub bone_weights: C::Buffer,
    pub uvs: Option<C::Buffer>,
    pub vertex_count: u32,
}

pub struct OutputBuffers<C: ComputeContext> {
    pub positions: C::Buffer,
    pub normals: C::Buffer,
    pub vertex_count: u32,
}

pub struct SkinnedUvBuffer<C: ComputeContext> {
    pub gpu_buffer: C::Buffer,
    pub vertex_count: u32,
}

/// Offset table (written once) and weight vector (written every frame) of one morph kind.
pub struct MorphBuffers<C: ComputeContext> {
    pub offsets: C::Buffer,
    pub weights: C::Buffer,
    pub kind: MorphKind,
    pub morph_count: u32,
    pub vertex_count: u32,
}

pub struct BoneMatrixBuffer<C: ComputeContext> {
    pub gpu_buffer: C::Buffer,
    pub max_bones: u32,
}
