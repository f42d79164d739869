use crate::skinning::buffer::{
    BoneMatrixBuffer, MorphBuffers, OutputBuffers, RestPoseBuffers, SkinnedUvBuffer,
};
use crate::skinning::context::{BindingSlot, ComputeContext, MemoryBarrier, UniformLocation};
use crate::skinning::kernel::{group_count, UV_DISABLED};
use crate::skinning::program::SkinningProgram;

pub struct MorphBinding<'a, C: ComputeContext> {
    pub buffers: &'a MorphBuffers<C>,
    pub active_count: u32,
}

impl<'a, C: ComputeContext> MorphBinding<'a, C> {
    pub fn all(buffers: &'a MorphBuffers<C>) -> Self {
        Self {
            buffers,
            active_count: buffers.morph_count,
        }
    }
}

pub enum UvMorphConfig<'a, C: ComputeContext> {
    Disabled,
    Enabled {
        rest_uvs: &'a C::Buffer,
        morphs: Option<MorphBinding<'a, C>>,
        output: &'a SkinnedUvBuffer<C>,
    },
}

impl<C: ComputeContext> UvMorphConfig<'_, C> {
    /// `-1` disables UV processing, `0` copies rest UVs, `N` applies N morphs.
    pub fn uniform_value(&self) -> i32 {
        match self {
            UvMorphConfig::Disabled => UV_DISABLED,
            UvMorphConfig::Enabled { morphs: None, .. } => 0,
            UvMorphConfig::Enabled {
                morphs: Some(morphs),
                ..
            } => morphs.active_count as i32,
        }
    }
}

pub struct DispatchRequest<'a, C: ComputeContext> {
    pub rest_pose: &'a RestPoseBuffers<C>,
    pub bone_matrices: &'a BoneMatrixBuffer<C>,
    pub vertex_morphs: Option<MorphBinding<'a, C>>,
    pub output: &'a OutputBuffers<C>,
    pub uv: UvMorphConfig<'a, C>,
}

impl<C: ComputeContext> DispatchRequest<'_, C> {
    pub fn vertex_morph_count(&self) -> i32 {
        match &self.vertex_morphs {
            Some(morphs) => morphs.active_count as i32,
            None => 0,
        }
    }
}

fn set_uniform<C: ComputeContext>(context: &mut C, location: Option<UniformLocation>, value: i32) {
    if let Some(location) = location {
        context.set_uniform_i32(location, value);
    }
}

/// Returns `false` without touching the context when the program is not ready.
pub fn dispatch_skinning<C: ComputeContext>(
    context: &mut C,
    program: &SkinningProgram<C>,
    request: &DispatchRequest<C>,
) -> bool {
    let gpu_program = match program.gpu_program() {
        Some(gpu_program) => gpu_program,
        None => return false,
    };

    let vertex_count = request.rest_pose.vertex_count;
    let saved_state = context.save_state();

    context.use_program(gpu_program);

    let uniforms = program.uniforms();
    set_uniform(context, uniforms.vertex_count, vertex_count as i32);
    set_uniform(context, uniforms.morph_count, request.vertex_morph_count());
    set_uniform(context, uniforms.max_bones, request.bone_matrices.max_bones as i32);
    set_uniform(context, uniforms.uv_morph_count, request.uv.uniform_value());

    let rest_pose = request.rest_pose;
    context.bind_storage(BindingSlot::RestPositions, &rest_pose.positions);
    context.bind_storage(BindingSlot::RestNormals, &rest_pose.normals);
    context.bind_storage(BindingSlot::BoneIndices, &rest_pose.bone_indices);
    context.bind_storage(BindingSlot::BoneWeights, &rest_pose.bone_weights);
    context.bind_storage(BindingSlot::BoneMatrices, &request.bone_matrices.gpu_buffer);

    if let Some(morphs) = &request.vertex_morphs {
        if morphs.active_count > 0 {
            context.bind_storage(BindingSlot::MorphOffsets, &morphs.buffers.offsets);
            context.bind_storage(BindingSlot::MorphWeights, &morphs.buffers.weights);
        }
    }

    context.bind_storage(BindingSlot::SkinnedPositions, &request.output.positions);
    context.bind_storage(BindingSlot::SkinnedNormals, &request.output.normals);

    if let UvMorphConfig::Enabled {
        rest_uvs,
        morphs,
        output,
    } = &request.uv
    {
        context.bind_storage(BindingSlot::RestUvs, rest_uvs);
        if let Some(morphs) = morphs {
            if morphs.active_count > 0 {
                context.bind_storage(BindingSlot::UvMorphOffsets, &morphs.buffers.offsets);
                context.bind_storage(BindingSlot::UvMorphWeights, &morphs.buffers.weights);
            }
        }
        context.bind_storage(BindingSlot::SkinnedUvs, &output.gpu_buffer);
    }

    let groups = group_count(vertex_count);
    log::trace!("Dispatching skinning for {vertex_count} vertices in {groups} groups");

    context.dispatch(groups);
    context.memory_barrier(MemoryBarrier::SKINNED_OUTPUT);

    context.restore_state(saved_state);

    true
}
