use anyhow::Result;
use cgmath::{Rotation3, SquareMatrix};

use crate::args::Args;
use crate::config::SkinningConfig;
use crate::data::morph::{ControlledMorph, GroupChild, MorphController, MorphKind, MorphTargetSet};
use crate::data::pose::SkeletonPose;
use crate::data::transform::Transform;
use crate::data::vertex::{BoneInfluence, VertexAttributeSet};
use crate::error::Error;
use crate::skinning::context::ComputeContext;
use crate::skinning::instance::{FrameInput, InstanceDescriptor, UvSupport};
use crate::skinning::kernel::{group_count, SkinningParams, UV_DISABLED, WORKGROUP_SIZE};
use crate::skinning::reference::{run_dispatch, DispatchInputs, DispatchOutputs};
use crate::skinning::software::SoftwareComputeContext;
use crate::skinning::storage::InstanceId;
use crate::skinning::wgpu_context::WgpuComputeContext;
use crate::skinning::SkinningSystem;

pub const RING_SEGMENTS: u32 = 16;
pub const RIG_HEIGHT: f32 = 2.0;
pub const RIG_RADIUS: f32 = 0.25;

const FRAME_RATE: f32 = 30.0;
const VERIFY_TOLERANCE: f32 = 1e-3;

/// Contexts whose buffers can be copied back to the host.
pub trait ReadBack: ComputeContext {
    fn read_floats(&mut self, buffer: &Self::Buffer) -> Result<Vec<f32>>;
}

impl ReadBack for SoftwareComputeContext {
    fn read_floats(&mut self, buffer: &Self::Buffer) -> Result<Vec<f32>> {
        Ok(buffer.read_f32())
    }
}

impl ReadBack for WgpuComputeContext {
    fn read_floats(&mut self, buffer: &Self::Buffer) -> Result<Vec<f32>> {
        self.read_f32(buffer)
    }
}

/// Upright cylinder split between two bones, with a bulge and a taper morph on the geometry and
/// a scroll morph on the UVs. A "breathe" group drives scroll and part of the bulge.
pub struct Rig {
    pub attributes: VertexAttributeSet,
    pub vertex_morphs: MorphTargetSet,
    pub uv_morphs: MorphTargetSet,
    controller: MorphController,
    parents: Vec<Option<usize>>,
    inverse_bind_matrices: Vec<cgmath::Matrix4<f32>>,
}

impl Rig {
    pub fn bent_cylinder(vertex_count: u32) -> Result<Self> {
        let rings = vertex_count.div_ceil(RING_SEGMENTS).max(2);

        let mut positions = Vec::with_capacity(vertex_count as usize);
        let mut normals = Vec::with_capacity(vertex_count as usize);
        let mut uvs = Vec::with_capacity(vertex_count as usize);
        let mut influences = Vec::with_capacity(vertex_count as usize);
        let mut bulge = Vec::with_capacity(vertex_count as usize * 3);
        let mut taper = Vec::with_capacity(vertex_count as usize * 3);
        let mut scroll = Vec::with_capacity(vertex_count as usize * 2);

        for index in 0..vertex_count {
            let ring = index / RING_SEGMENTS;
            let segment = index % RING_SEGMENTS;
            let v = ring as f32 / (rings - 1) as f32;
            let u = segment as f32 / RING_SEGMENTS as f32;
            let (sin, cos) = (u * std::f32::consts::TAU).sin_cos();

            positions.push([cos * RIG_RADIUS, v * RIG_HEIGHT, sin * RIG_RADIUS]);
            normals.push([cos, 0.0, sin]);
            uvs.push([u, v]);

            // Upper bone takes over across the middle third.
            let upper = ((v - 1.0 / 3.0) * 3.0).clamp(0.0, 1.0);
            influences.push(BoneInfluence::pair([0, 1], [1.0 - upper, upper]));

            let swell = 0.1 * (v * std::f32::consts::PI).sin();
            bulge.extend_from_slice(&[cos * swell, 0.0, sin * swell]);
            let narrow = -0.5 * RIG_RADIUS * v;
            taper.extend_from_slice(&[cos * narrow, 0.0, sin * narrow]);
            scroll.extend_from_slice(&[0.25, 0.0]);
        }

        let attributes = VertexAttributeSet::new(positions, normals, Some(uvs), influences)?;

        bulge.extend(taper);
        let vertex_morphs = MorphTargetSet::from_dense(
            MorphKind::Vertex,
            vertex_count as usize,
            vec![String::from("bulge"), String::from("taper")],
            bulge,
        )?;
        let uv_morphs = MorphTargetSet::from_dense(
            MorphKind::Uv,
            vertex_count as usize,
            vec![String::from("scroll")],
            scroll,
        )?;

        let mut controller = MorphController::new();
        let bulge = controller.add("bulge", ControlledMorph::Vertex(0));
        controller.add("taper", ControlledMorph::Vertex(1));
        let scroll = controller.add("scroll", ControlledMorph::Uv(0));
        controller.add(
            "breathe",
            ControlledMorph::Group(vec![
                GroupChild {
                    morph: scroll,
                    influence: 1.0,
                },
                GroupChild {
                    morph: bulge,
                    influence: 0.2,
                },
            ]),
        );

        let half_height = cgmath::Vector3::new(0.0, RIG_HEIGHT / 2.0, 0.0);

        Ok(Self {
            attributes,
            vertex_morphs,
            uv_morphs,
            controller,
            parents: vec![None, Some(0)],
            inverse_bind_matrices: vec![
                cgmath::Matrix4::identity(),
                cgmath::Matrix4::from_translation(-half_height),
            ],
        })
    }

    pub fn pose(&self, time: f32) -> Result<SkeletonPose> {
        let twist = cgmath::Quaternion::from_angle_y(cgmath::Rad(time * 0.5));
        let bend = cgmath::Quaternion::from_angle_z(cgmath::Rad((time * 2.0).sin() * 0.8));

        let local_transforms = [
            Transform::from_rotation(twist),
            Transform {
                translation: cgmath::Vector3::new(0.0, RIG_HEIGHT / 2.0, 0.0),
                rotation: bend,
                ..Default::default()
            },
        ];

        SkeletonPose::from_local_transforms(
            &self.parents,
            &local_transforms,
            &self.inverse_bind_matrices,
        )
    }

    pub fn morph_weights(&self, time: f32) -> (Vec<f32>, Vec<f32>) {
        let mut controller = self.controller.clone();
        controller.set_weight_by_name("bulge", time.sin().abs());
        controller.set_weight_by_name("taper", 0.5 + 0.5 * (time * 0.7).cos());
        controller.set_weight_by_name("breathe", (time * 0.3).sin());

        controller.resolve_weights(self.vertex_morphs.morph_count(), self.uv_morphs.morph_count())
    }
}

#[derive(Clone, Debug)]
pub struct BenchmarkReport {
    pub vertices: u32,
    pub instances: usize,
    pub frames: usize,
    pub dispatches: usize,
    pub elapsed: std::time::Duration,
    pub max_error: Option<f32>,
}

struct ActiveInstance {
    id: InstanceId,
    uv_enabled: bool,
    phase: f32,
}

pub fn run_benchmark<C: ReadBack>(
    context: C,
    config: SkinningConfig,
    args: &Args,
) -> Result<BenchmarkReport> {
    let max_bones = config.max_bones;
    let mut system = SkinningSystem::new(context, config)?;
    system.initialize()?;

    let rig = Rig::bent_cylinder(args.vertices)?;
    let mesh = system.load_mesh("RIG", &rig.attributes);

    let mut instances = Vec::with_capacity(args.instances);
    for index in 0..args.instances {
        // Every other instance skips UV processing entirely.
        let uv_enabled = index % 2 == 0;
        let name = format!("RIG_INSTANCE_{index}");
        let descriptor = InstanceDescriptor {
            name: &name,
            vertex_morphs: Some(&rig.vertex_morphs),
            uv: if uv_enabled {
                UvSupport::Enabled(Some(&rig.uv_morphs))
            } else {
                UvSupport::Disabled
            },
        };

        instances.push(ActiveInstance {
            id: system.activate_instance(mesh, &descriptor)?,
            uv_enabled,
            phase: index as f32 * 0.25,
        });
    }

    log::info!(
        "Skinning {} instances of {} vertices for {} frames",
        args.instances,
        args.vertices,
        args.frames
    );

    let start = std::time::Instant::now();
    let mut dispatches = 0;
    for frame in 0..args.frames {
        for instance in instances.iter() {
            let time = frame as f32 / FRAME_RATE + instance.phase;
            let pose = rig.pose(time)?;
            let (vertex_morph_weights, uv_morph_weights) = rig.morph_weights(time);

            system.update_instance(
                instance.id,
                &FrameInput {
                    bone_matrices: pose.bone_matrices(),
                    vertex_morph_weights: Some(&vertex_morph_weights),
                    uv_morph_weights: Some(&uv_morph_weights),
                },
            )?;
        }

        dispatches += system.dispatch_all();
    }
    let elapsed = start.elapsed();

    let max_error = if args.verify && args.frames > 0 {
        let last_frame = args.frames - 1;
        let mut max_error: f32 = 0.0;
        for instance in instances.iter() {
            let time = last_frame as f32 / FRAME_RATE + instance.phase;
            let error = verify_instance(&mut system, &rig, instance, time, max_bones)?;
            max_error = max_error.max(error);
        }
        log::info!("Largest deviation from the reference kernel: {max_error}");

        if max_error > VERIFY_TOLERANCE {
            return Err(Error::invalid_data(format!(
                "Skinned output deviates from the reference kernel by {max_error}"
            ))
            .into());
        }
        Some(max_error)
    } else {
        None
    };

    Ok(BenchmarkReport {
        vertices: args.vertices,
        instances: args.instances,
        frames: args.frames,
        dispatches,
        elapsed,
        max_error,
    })
}

fn verify_instance<C: ReadBack>(
    system: &mut SkinningSystem<C>,
    rig: &Rig,
    instance: &ActiveInstance,
    time: f32,
    max_bones: u32,
) -> Result<f32> {
    let pose = rig.pose(time)?;
    let bone_matrices: Vec<[[f32; 4]; 4]> = pose
        .bone_matrices()
        .iter()
        .take(max_bones as usize)
        .map(|matrix| (*matrix).into())
        .collect();
    let (vertex_morph_weights, uv_morph_weights) = rig.morph_weights(time);
    let bone_indices = rig.attributes.bone_index_data();
    let bone_weights = rig.attributes.bone_weight_data();

    let vertex_count = rig.attributes.vertex_count();
    let params = SkinningParams {
        vertex_count: vertex_count as i32,
        morph_count: rig.vertex_morphs.morph_count() as i32,
        max_bones: max_bones as i32,
        uv_morph_count: if instance.uv_enabled {
            rig.uv_morphs.morph_count() as i32
        } else {
            UV_DISABLED
        },
    };
    let inputs = DispatchInputs {
        rest_positions: rig.attributes.position_data(),
        rest_normals: rig.attributes.normal_data(),
        bone_indices: &bone_indices,
        bone_weights: &bone_weights,
        bone_matrices: bytemuck::cast_slice(&bone_matrices),
        morph_offsets: rig.vertex_morphs.offsets(),
        morph_weights: &vertex_morph_weights,
        rest_uvs: rig.attributes.uv_data().unwrap_or_default(),
        uv_morph_offsets: rig.uv_morphs.offsets(),
        uv_morph_weights: &uv_morph_weights,
    };

    let mut expected_positions = vec![0.0; vertex_count * 3];
    let mut expected_normals = vec![0.0; vertex_count * 3];
    let mut expected_uvs = vec![0.0; vertex_count * 2];
    run_dispatch(
        &params,
        &inputs,
        &mut DispatchOutputs {
            positions: &mut expected_positions,
            normals: &mut expected_normals,
            uvs: instance.uv_enabled.then_some(expected_uvs.as_mut_slice()),
        },
        group_count(vertex_count as u32),
        WORKGROUP_SIZE,
    );

    let (skinned_instance, context) = match system.instance_with_context(instance.id) {
        Some(parts) => parts,
        None => {
            return Err(Error::invalid_data(format!("Unknown instance {:?}", instance.id)).into())
        }
    };

    let mut max_error = max_deviation(
        &context.read_floats(&skinned_instance.output().positions)?,
        &expected_positions,
    );
    max_error = max_error.max(max_deviation(
        &context.read_floats(&skinned_instance.output().normals)?,
        &expected_normals,
    ));
    if let Some(skinned_uvs) = skinned_instance.skinned_uvs() {
        max_error = max_error.max(max_deviation(
            &context.read_floats(&skinned_uvs.gpu_buffer)?,
            &expected_uvs,
        ));
    }

    Ok(max_error)
}

fn max_deviation(actual: &[f32], expected: &[f32]) -> f32 {
    if actual.len() < expected.len() {
        return f32::INFINITY;
    }

    actual
        .iter()
        .zip(expected)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rig_weights_cover_both_bones() {
        let rig = Rig::bent_cylinder(64).unwrap();
        let influences = rig.attributes.influences();

        assert_eq!(influences.len(), 64);
        assert_eq!(influences[0].weights[..2], [1.0, 0.0]);
        assert_eq!(influences[63].weights[..2], [0.0, 1.0]);
        assert_eq!(rig.vertex_morphs.morph_count(), 2);
        assert_eq!(rig.uv_morphs.morph_count(), 1);
    }

    #[test]
    fn rest_pose_at_time_zero_keeps_the_lower_bone_in_place() {
        let rig = Rig::bent_cylinder(32).unwrap();
        let pose = rig.pose(0.0).unwrap();

        assert_eq!(pose.bone_count(), 2);
        assert_eq!(pose.bone_matrices()[0], cgmath::Matrix4::identity());
    }

    #[test]
    fn breathe_group_feeds_both_morph_kinds() {
        let rig = Rig::bent_cylinder(32).unwrap();
        let time: f32 = 1.0;
        let breathe = (time * 0.3).sin();

        let (vertex_weights, uv_weights) = rig.morph_weights(time);

        assert!((vertex_weights[0] - (time.sin().abs() + 0.2 * breathe)).abs() < 1e-6);
        assert!((vertex_weights[1] - (0.5 + 0.5 * (time * 0.7).cos())).abs() < 1e-6);
        assert!((uv_weights[0] - breathe).abs() < 1e-6);
    }

    #[test]
    fn software_benchmark_matches_reference() {
        let args = Args {
            vertices: 300,
            instances: 3,
            frames: 4,
            verify: true,
            ..Default::default()
        };

        let report =
            run_benchmark(SoftwareComputeContext::new(), SkinningConfig::default(), &args)
                .unwrap();

        assert_eq!(report.dispatches, 12);
        assert!(report.max_error.unwrap() < 1e-6);
    }
}
