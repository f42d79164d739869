use std::rc::Rc;

use anyhow::Result;

use crate::data::morph::{MorphKind, MorphTargetSet};
use crate::data::vertex::VertexAttributeSet;
use crate::error::Error;
use crate::skinning::buffer::allocator::ResourcePool;
use crate::skinning::buffer::{
    BoneMatrixBuffer, MorphBuffers, OutputBuffers, RestPoseBuffers, SkinnedUvBuffer,
};
use crate::skinning::context::ComputeContext;
use crate::skinning::dispatch::{dispatch_skinning, DispatchRequest, MorphBinding, UvMorphConfig};
use crate::skinning::program::SkinningProgram;
use crate::skinning::upload::{
    check_weight_count, upload_bone_matrices, upload_morph_offsets, upload_morph_weights,
};

pub struct RestPoseMesh<C: ComputeContext> {
    name: String,
    buffers: RestPoseBuffers<C>,
}

impl<C: ComputeContext> RestPoseMesh<C> {
    pub fn load(
        context: &mut C,
        pool: &ResourcePool,
        name: &str,
        attributes: &VertexAttributeSet,
    ) -> Self {
        Self {
            name: name.to_string(),
            buffers: pool.allocate_rest_pose(context, name, attributes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> u32 {
        self.buffers.vertex_count
    }

    pub fn has_uvs(&self) -> bool {
        self.buffers.uvs.is_some()
    }

    pub fn buffers(&self) -> &RestPoseBuffers<C> {
        &self.buffers
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub enum UvSupport<'a> {
    #[default]
    Disabled,
    Enabled(Option<&'a MorphTargetSet>),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InstanceDescriptor<'a> {
    pub name: &'a str,
    pub vertex_morphs: Option<&'a MorphTargetSet>,
    pub uv: UvSupport<'a>,
}

/// Animation state for one frame. Weight vectors replace the previous frame's in full.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInput<'a> {
    pub bone_matrices: &'a [cgmath::Matrix4<f32>],
    pub vertex_morph_weights: Option<&'a [f32]>,
    pub uv_morph_weights: Option<&'a [f32]>,
}

struct UvResources<C: ComputeContext> {
    output: SkinnedUvBuffer<C>,
    morphs: Option<MorphBuffers<C>>,
}

/// Per-instance skinning resources. Everything is released when the instance is dropped.
pub struct SkinnedInstance<C: ComputeContext> {
    name: String,
    mesh: Rc<RestPoseMesh<C>>,
    bone_matrices: BoneMatrixBuffer<C>,
    output: OutputBuffers<C>,
    vertex_morphs: Option<MorphBuffers<C>>,
    uv: Option<UvResources<C>>,
}

impl<C: ComputeContext> SkinnedInstance<C> {
    pub fn activate(
        context: &mut C,
        pool: &ResourcePool,
        mesh: Rc<RestPoseMesh<C>>,
        descriptor: &InstanceDescriptor,
    ) -> Result<Self> {
        let name = descriptor.name;
        let vertex_count = mesh.vertex_count();

        let vertex_morph_set = descriptor.vertex_morphs.filter(|morphs| !morphs.is_empty());
        if let Some(morphs) = vertex_morph_set {
            Self::validate_morphs(morphs, MorphKind::Vertex, vertex_count)?;
        }

        let uv_morph_set = match descriptor.uv {
            UvSupport::Disabled => None,
            UvSupport::Enabled(morphs) => {
                if !mesh.has_uvs() {
                    return Err(Error::invalid_data(format!(
                        "Instance {name} requests UV output but mesh {} has no UVs",
                        mesh.name()
                    ))
                    .into());
                }
                morphs.filter(|morphs| !morphs.is_empty())
            }
        };
        if let Some(morphs) = uv_morph_set {
            Self::validate_morphs(morphs, MorphKind::Uv, vertex_count)?;
        }

        log::debug!(
            "Activating skinned instance {name} of mesh {} ({vertex_count} vertices)",
            mesh.name()
        );

        let bone_matrices = pool.allocate_bone_matrix_buffer(context, name);
        let output = pool.allocate_output_buffers(context, name, vertex_count);

        let vertex_morphs = match vertex_morph_set {
            Some(morphs) => Some(Self::create_morph_buffers(context, pool, name, morphs)?),
            None => None,
        };

        let uv = match descriptor.uv {
            UvSupport::Disabled => None,
            UvSupport::Enabled(_) => {
                let morphs = match uv_morph_set {
                    Some(morphs) => Some(Self::create_morph_buffers(context, pool, name, morphs)?),
                    None => None,
                };
                Some(UvResources {
                    output: pool.allocate_skinned_uv_buffer(context, name, vertex_count),
                    morphs,
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            mesh,
            bone_matrices,
            output,
            vertex_morphs,
            uv,
        })
    }

    fn validate_morphs(morphs: &MorphTargetSet, kind: MorphKind, vertex_count: u32) -> Result<()> {
        if morphs.kind() != kind {
            return Err(Error::invalid_data(format!(
                "Expected {kind:?} morph set, got {:?}",
                morphs.kind()
            ))
            .into());
        }
        if morphs.vertex_count() != vertex_count as usize {
            return Err(Error::invalid_data(format!(
                "{kind:?} morph set covers {} vertices, mesh has {vertex_count}",
                morphs.vertex_count()
            ))
            .into());
        }
        Ok(())
    }

    fn create_morph_buffers(
        context: &mut C,
        pool: &ResourcePool,
        name: &str,
        morphs: &MorphTargetSet,
    ) -> Result<MorphBuffers<C>> {
        let buffers = pool.allocate_morph_buffers(
            context,
            name,
            morphs.kind(),
            morphs.morph_count() as u32,
            morphs.vertex_count() as u32,
        );
        upload_morph_offsets(context, &buffers, morphs)?;
        upload_morph_weights(context, &buffers, morphs.weights())?;
        Ok(buffers)
    }

    /// Uploads one frame of animation state and returns the number of bone matrices written.
    pub fn upload_frame(&self, context: &mut C, frame: &FrameInput) -> Result<usize> {
        let vertex_morphs = self.vertex_morphs.as_ref().zip(frame.vertex_morph_weights);
        let uv_morphs = self
            .uv
            .as_ref()
            .and_then(|uv| uv.morphs.as_ref())
            .zip(frame.uv_morph_weights);

        for &(buffers, weights) in vertex_morphs.iter().chain(uv_morphs.iter()) {
            check_weight_count(buffers, weights)?;
        }

        let bone_count = upload_bone_matrices(context, &self.bone_matrices, frame.bone_matrices);
        for (buffers, weights) in vertex_morphs.into_iter().chain(uv_morphs) {
            upload_morph_weights(context, buffers, weights)?;
        }

        Ok(bone_count)
    }

    pub fn dispatch(&self, context: &mut C, program: &SkinningProgram<C>) -> bool {
        let uv = match &self.uv {
            None => UvMorphConfig::Disabled,
            Some(uv) => match &self.mesh.buffers().uvs {
                Some(rest_uvs) => UvMorphConfig::Enabled {
                    rest_uvs,
                    morphs: uv.morphs.as_ref().map(MorphBinding::all),
                    output: &uv.output,
                },
                None => UvMorphConfig::Disabled,
            },
        };

        let request = DispatchRequest {
            rest_pose: self.mesh.buffers(),
            bone_matrices: &self.bone_matrices,
            vertex_morphs: self.vertex_morphs.as_ref().map(MorphBinding::all),
            output: &self.output,
            uv,
        };

        dispatch_skinning(context, program, &request)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &Rc<RestPoseMesh<C>> {
        &self.mesh
    }

    pub fn vertex_count(&self) -> u32 {
        self.output.vertex_count
    }

    pub fn output(&self) -> &OutputBuffers<C> {
        &self.output
    }

    pub fn skinned_uvs(&self) -> Option<&SkinnedUvBuffer<C>> {
        self.uv.as_ref().map(|uv| &uv.output)
    }

    pub fn vertex_morph_count(&self) -> u32 {
        self.vertex_morphs
            .as_ref()
            .map_or(0, |morphs| morphs.morph_count)
    }

    pub fn uv_morph_count(&self) -> Option<u32> {
        self.uv.as_ref().map(|uv| {
            uv.morphs
                .as_ref()
                .map_or(0, |morphs| morphs.morph_count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::vertex::BoneInfluence;
    use crate::skinning::software::{Command, SoftwareComputeContext};

    fn quad_attributes(with_uvs: bool) -> VertexAttributeSet {
        VertexAttributeSet::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0.0, 0.0, 1.0]; 4],
            with_uvs.then(|| vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            vec![BoneInfluence::single(0); 4],
        )
        .unwrap()
    }

    fn load_mesh(
        context: &mut SoftwareComputeContext,
        with_uvs: bool,
    ) -> Rc<RestPoseMesh<SoftwareComputeContext>> {
        Rc::new(RestPoseMesh::load(
            context,
            &ResourcePool::new(8),
            "QUAD",
            &quad_attributes(with_uvs),
        ))
    }

    #[test]
    fn uv_output_requires_rest_uvs() {
        let mut context = SoftwareComputeContext::new();
        let mesh = load_mesh(&mut context, false);

        let result = SkinnedInstance::activate(
            &mut context,
            &ResourcePool::new(8),
            mesh,
            &InstanceDescriptor {
                name: "QUAD_INSTANCE",
                vertex_morphs: None,
                uv: UvSupport::Enabled(None),
            },
        );

        assert!(result.is_err());
    }

    #[test]
    fn morph_set_for_another_mesh_is_rejected() {
        let mut context = SoftwareComputeContext::new();
        let mesh = load_mesh(&mut context, true);
        let morphs = MorphTargetSet::from_dense(
            MorphKind::Vertex,
            3,
            vec![String::from("smile")],
            vec![0.0; 9],
        )
        .unwrap();

        let result = SkinnedInstance::activate(
            &mut context,
            &ResourcePool::new(8),
            mesh,
            &InstanceDescriptor {
                name: "QUAD_INSTANCE",
                vertex_morphs: Some(&morphs),
                uv: UvSupport::Disabled,
            },
        );

        assert!(result.is_err());
    }

    #[test]
    fn morph_offsets_are_uploaded_once() {
        let mut context = SoftwareComputeContext::new();
        let mesh = load_mesh(&mut context, true);
        let morphs = MorphTargetSet::from_dense(
            MorphKind::Vertex,
            4,
            vec![String::from("lift")],
            vec![0.0, 0.0, 1.0].repeat(4),
        )
        .unwrap();

        let instance = SkinnedInstance::activate(
            &mut context,
            &ResourcePool::new(8),
            mesh,
            &InstanceDescriptor {
                name: "QUAD_INSTANCE",
                vertex_morphs: Some(&morphs),
                uv: UvSupport::Disabled,
            },
        )
        .unwrap();

        for frame in 0..3 {
            instance.upload_frame(
                &mut context,
                &FrameInput {
                    bone_matrices: &[cgmath::Matrix4::from_scale(1.0)],
                    vertex_morph_weights: Some(&[frame as f32]),
                    uv_morph_weights: None,
                },
            )
            .unwrap();
        }

        let offset_buffer = context
            .commands()
            .iter()
            .find_map(|command| match command {
                Command::CreateBuffer { buffer, label, .. }
                    if label == "QUAD_INSTANCE_MORPH_OFFSETS_BUFFER" =>
                {
                    Some(*buffer)
                }
                _ => None,
            })
            .unwrap();
        let offset_writes = context
            .commands()
            .iter()
            .filter(|command| {
                matches!(command, Command::WriteBuffer { buffer, .. } if *buffer == offset_buffer)
            })
            .count();

        assert_eq!(offset_writes, 1);
        assert_eq!(instance.vertex_morph_count(), 1);
        assert_eq!(instance.uv_morph_count(), None);
    }

    #[test]
    fn empty_morph_sets_allocate_nothing() {
        let mut context = SoftwareComputeContext::new();
        let mesh = load_mesh(&mut context, true);
        let morphs = MorphTargetSet::from_dense(MorphKind::Uv, 4, vec![], vec![]).unwrap();

        let instance = SkinnedInstance::activate(
            &mut context,
            &ResourcePool::new(8),
            mesh,
            &InstanceDescriptor {
                name: "QUAD_INSTANCE",
                vertex_morphs: None,
                uv: UvSupport::Enabled(Some(&morphs)),
            },
        )
        .unwrap();

        assert_eq!(instance.uv_morph_count(), Some(0));
        assert!(instance.skinned_uvs().is_some());
        assert!(!context.commands().iter().any(|command| matches!(
            command,
            Command::CreateBuffer { label, .. } if label.contains("MORPH")
        )));
    }

    #[test]
    fn dropping_an_instance_releases_its_buffers_but_not_the_mesh() {
        let mut context = SoftwareComputeContext::new();
        let mesh = load_mesh(&mut context, true);

        let instance = SkinnedInstance::activate(
            &mut context,
            &ResourcePool::new(8),
            mesh.clone(),
            &InstanceDescriptor {
                name: "QUAD_INSTANCE",
                vertex_morphs: None,
                uv: UvSupport::Enabled(None),
            },
        )
        .unwrap();
        context.take_commands();

        drop(instance);

        let released: Vec<String> = context
            .take_commands()
            .into_iter()
            .filter_map(|command| match command {
                Command::ReleaseBuffer { label, .. } => Some(label),
                _ => None,
            })
            .collect();

        assert_eq!(released.len(), 4);
        assert!(released.iter().all(|label| label.starts_with("QUAD_INSTANCE_")));
        assert_eq!(Rc::strong_count(&mesh), 1);
    }
}
