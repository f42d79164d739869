use crate::data::morph::MorphKind;
use crate::data::vertex::VertexAttributeSet;
use crate::skinning::buffer::{
    BoneMatrixBuffer, MorphBuffers, OutputBuffers, RestPoseBuffers, SkinnedUvBuffer, FLOAT_SIZE,
    MATRIX_SIZE,
};
use crate::skinning::context::{BufferRole, ComputeContext};

/// Storage bindings must not be empty.
const MIN_BUFFER_SIZE: u64 = 16;

fn storage_size(size: u64) -> u64 {
    size.max(MIN_BUFFER_SIZE)
}

/// Allocates the fixed-role skinning buffers.
#[derive(Clone, Copy, Debug)]
pub struct ResourcePool {
    max_bones: u32,
}

impl ResourcePool {
    pub fn new(max_bones: u32) -> Self {
        Self { max_bones }
    }

    pub fn max_bones(&self) -> u32 {
        self.max_bones
    }

    pub fn allocate_rest_pose<C: ComputeContext>(
        &self,
        context: &mut C,
        name: &str,
        attributes: &VertexAttributeSet,
    ) -> RestPoseBuffers<C> {
        let vertex_count = attributes.vertex_count() as u32;

        log::debug!("Allocating rest pose buffers {name} for {vertex_count} vertices");

        let positions = Self::create_static(
            context,
            &format!("{name}_REST_POSITIONS_BUFFER"),
            bytemuck::cast_slice(attributes.position_data()),
        );
        let normals = Self::create_static(
            context,
            &format!("{name}_REST_NORMALS_BUFFER"),
            bytemuck::cast_slice(attributes.normal_data()),
        );
        let bone_indices = Self::create_static(
            context,
            &format!("{name}_BONE_INDICES_BUFFER"),
            bytemuck::cast_slice(attributes.bone_index_data().as_slice()),
        );
        let bone_weights = Self::create_static(
            context,
            &format!("{name}_BONE_WEIGHTS_BUFFER"),
            bytemuck::cast_slice(attributes.bone_weight_data().as_slice()),
        );
        let uvs = attributes.uv_data().map(|uv_data| {
            Self::create_static(
                context,
                &format!("{name}_REST_UVS_BUFFER"),
                bytemuck::cast_slice(uv_data),
            )
        });

        RestPoseBuffers {
            positions,
            normals,
            bone_indices,
            bone_weights,
            uvs,
            vertex_count,
        }
    }

    pub fn allocate_output_buffers<C: ComputeContext>(
        &self,
        context: &mut C,
        name: &str,
        vertex_count: u32,
    ) -> OutputBuffers<C> {
        let size = storage_size(vertex_count as u64 * 3 * FLOAT_SIZE);

        OutputBuffers {
            positions: context.create_buffer(
                &format!("{name}_SKINNED_POSITIONS_BUFFER"),
                size,
                BufferRole::SkinnedOutput,
            ),
            normals: context.create_buffer(
                &format!("{name}_SKINNED_NORMALS_BUFFER"),
                size,
                BufferRole::SkinnedOutput,
            ),
            vertex_count,
        }
    }

    pub fn allocate_skinned_uv_buffer<C: ComputeContext>(
        &self,
        context: &mut C,
        name: &str,
        vertex_count: u32,
    ) -> SkinnedUvBuffer<C> {
        SkinnedUvBuffer {
            gpu_buffer: context.create_buffer(
                &format!("{name}_SKINNED_UVS_BUFFER"),
                storage_size(vertex_count as u64 * 2 * FLOAT_SIZE),
                BufferRole::SkinnedOutput,
            ),
            vertex_count,
        }
    }

    pub fn allocate_morph_buffers<C: ComputeContext>(
        &self,
        context: &mut C,
        name: &str,
        kind: MorphKind,
        morph_count: u32,
        vertex_count: u32,
    ) -> MorphBuffers<C> {
        let prefix = match kind {
            MorphKind::Vertex => "MORPH",
            MorphKind::Uv => "UV_MORPH",
        };
        let offsets_size =
            morph_count as u64 * vertex_count as u64 * kind.components() as u64 * FLOAT_SIZE;

        MorphBuffers {
            offsets: context.create_buffer(
                &format!("{name}_{prefix}_OFFSETS_BUFFER"),
                storage_size(offsets_size),
                BufferRole::MorphOffsets,
            ),
            weights: context.create_buffer(
                &format!("{name}_{prefix}_WEIGHTS_BUFFER"),
                storage_size(morph_count as u64 * FLOAT_SIZE),
                BufferRole::MorphWeights,
            ),
            kind,
            morph_count,
            vertex_count,
        }
    }

    pub fn allocate_bone_matrix_buffer<C: ComputeContext>(
        &self,
        context: &mut C,
        name: &str,
    ) -> BoneMatrixBuffer<C> {
        BoneMatrixBuffer {
            gpu_buffer: context.create_buffer(
                &format!("{name}_BONE_MATRICES_BUFFER"),
                storage_size(self.max_bones as u64 * MATRIX_SIZE),
                BufferRole::BoneMatrices,
            ),
            max_bones: self.max_bones,
        }
    }

    fn create_static<C: ComputeContext>(context: &mut C, label: &str, data: &[u8]) -> C::Buffer {
        let buffer = context.create_buffer(
            label,
            storage_size(data.len() as u64),
            BufferRole::RestAttribute,
        );
        context.write_buffer(&buffer, 0, data);
        buffer
    }
}
