//! Host-side evaluation of `shaders/skinning.comp.wgsl`. Out-of-range reads yield zero.

use cgmath::{InnerSpace, SquareMatrix, Zero};

use crate::skinning::kernel::{SkinningParams, MAX_UV_MORPHS, MAX_VERTEX_MORPHS, WEIGHT_EPSILON};

#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchInputs<'a> {
    pub rest_positions: &'a [f32],
    pub rest_normals: &'a [f32],
    pub bone_indices: &'a [i32],
    pub bone_weights: &'a [f32],
    /// Column-major, 16 floats per bone.
    pub bone_matrices: &'a [f32],
    pub morph_offsets: &'a [f32],
    pub morph_weights: &'a [f32],
    pub rest_uvs: &'a [f32],
    pub uv_morph_offsets: &'a [f32],
    pub uv_morph_weights: &'a [f32],
}

pub struct DispatchOutputs<'a> {
    pub positions: &'a mut [f32],
    pub normals: &'a mut [f32],
    pub uvs: Option<&'a mut [f32]>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkinnedVertex {
    pub position: cgmath::Vector3<f32>,
    pub normal: cgmath::Vector3<f32>,
    pub uv: Option<cgmath::Vector2<f32>>,
}

fn read<T: Copy + Default>(data: &[T], index: usize) -> T {
    data.get(index).copied().unwrap_or_default()
}

fn read_vec3(data: &[f32], base: usize) -> cgmath::Vector3<f32> {
    cgmath::Vector3::new(read(data, base), read(data, base + 1), read(data, base + 2))
}

fn read_matrix(data: &[f32], bone: usize) -> cgmath::Matrix4<f32> {
    let base = bone * 16;
    let column = |c: usize| {
        [
            read(data, base + c * 4),
            read(data, base + c * 4 + 1),
            read(data, base + c * 4 + 2),
            read(data, base + c * 4 + 3),
        ]
    };

    cgmath::Matrix4::from([column(0), column(1), column(2), column(3)])
}

/// Blended bone transform for one vertex; identity when no valid bone carries weight.
pub fn blend_matrix(
    indices: [i32; 4],
    weights: [f32; 4],
    bone_matrices: &[f32],
    max_bones: i32,
) -> cgmath::Matrix4<f32> {
    let is_valid = |index: i32| index >= 0 && index < max_bones;

    let total_weight: f32 = indices
        .iter()
        .zip(weights)
        .filter(|(index, _)| is_valid(**index))
        .map(|(_, weight)| weight)
        .sum();

    if total_weight <= WEIGHT_EPSILON {
        return cgmath::Matrix4::identity();
    }

    let inverse_weight = 1.0 / total_weight;
    let mut matrix = cgmath::Matrix4::zero();
    for (index, weight) in indices.iter().zip(weights) {
        if is_valid(*index) {
            matrix = matrix + read_matrix(bone_matrices, *index as usize) * (weight * inverse_weight);
        }
    }

    matrix
}

pub fn skin_vertex(params: &SkinningParams, inputs: &DispatchInputs, vertex: usize) -> SkinnedVertex {
    let vertex_count = params.vertex_count.max(0) as usize;
    let base2 = vertex * 2;
    let base3 = vertex * 3;
    let base4 = vertex * 4;

    let mut position = read_vec3(inputs.rest_positions, base3);
    let normal = read_vec3(inputs.rest_normals, base3);

    let morph_limit = params.morph_count.min(MAX_VERTEX_MORPHS as i32).max(0) as usize;
    for morph in 0..morph_limit {
        let weight = read(inputs.morph_weights, morph);
        if weight.abs() > WEIGHT_EPSILON {
            let offset_index = morph * vertex_count * 3 + base3;
            position += read_vec3(inputs.morph_offsets, offset_index) * weight;
        }
    }

    let indices = [0, 1, 2, 3].map(|i| read(inputs.bone_indices, base4 + i));
    let weights = [0, 1, 2, 3].map(|i| read(inputs.bone_weights, base4 + i));
    let skin_matrix = blend_matrix(indices, weights, inputs.bone_matrices, params.max_bones);

    let skinned_position = skin_matrix * position.extend(1.0);
    let normal_matrix = cgmath::Matrix3::from_cols(
        skin_matrix.x.truncate(),
        skin_matrix.y.truncate(),
        skin_matrix.z.truncate(),
    );
    let skinned_normal = (normal_matrix * normal).normalize();

    let uv = if params.uv_morph_count >= 0 {
        let mut uv = cgmath::Vector2::new(
            read(inputs.rest_uvs, base2),
            read(inputs.rest_uvs, base2 + 1),
        );
        let uv_morph_limit = params.uv_morph_count.min(MAX_UV_MORPHS as i32) as usize;
        for morph in 0..uv_morph_limit {
            let weight = read(inputs.uv_morph_weights, morph);
            if weight.abs() > WEIGHT_EPSILON {
                let uv_index = morph * vertex_count * 2 + base2;
                uv += cgmath::Vector2::new(
                    read(inputs.uv_morph_offsets, uv_index),
                    read(inputs.uv_morph_offsets, uv_index + 1),
                ) * weight;
            }
        }
        Some(uv)
    } else {
        None
    };

    SkinnedVertex {
        position: skinned_position.truncate(),
        normal: skinned_normal,
        uv,
    }
}

fn write(data: &mut [f32], index: usize, value: f32) {
    if let Some(slot) = data.get_mut(index) {
        *slot = value;
    }
}

pub fn run_dispatch(
    params: &SkinningParams,
    inputs: &DispatchInputs,
    outputs: &mut DispatchOutputs,
    group_count: u32,
    workgroup_size: u32,
) {
    let invocation_count = group_count as usize * workgroup_size as usize;
    let vertex_count = params.vertex_count.max(0) as usize;

    for vertex in 0..invocation_count.min(vertex_count) {
        let skinned = skin_vertex(params, inputs, vertex);
        let base3 = vertex * 3;

        write(outputs.positions, base3, skinned.position.x);
        write(outputs.positions, base3 + 1, skinned.position.y);
        write(outputs.positions, base3 + 2, skinned.position.z);

        write(outputs.normals, base3, skinned.normal.x);
        write(outputs.normals, base3 + 1, skinned.normal.y);
        write(outputs.normals, base3 + 2, skinned.normal.z);

        if let (Some(uv), Some(uvs)) = (skinned.uv, outputs.uvs.as_deref_mut()) {
            write(uvs, vertex * 2, uv.x);
            write(uvs, vertex * 2 + 1, uv.y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skinning::kernel::UV_DISABLED;

    fn matrix_data(matrices: &[cgmath::Matrix4<f32>]) -> Vec<f32> {
        matrices
            .iter()
            .flat_map(|matrix| {
                let columns: [[f32; 4]; 4] = (*matrix).into();
                columns.into_iter().flatten()
            })
            .collect()
    }

    fn params(vertex_count: i32, morph_count: i32, uv_morph_count: i32) -> SkinningParams {
        SkinningParams {
            vertex_count,
            morph_count,
            max_bones: 2048,
            uv_morph_count,
        }
    }

    #[test]
    fn effective_weights_are_renormalized_and_scale_invariant() {
        let bones = matrix_data(&[
            cgmath::Matrix4::from_translation(cgmath::Vector3::new(2.0, 0.0, 0.0)),
            cgmath::Matrix4::from_translation(cgmath::Vector3::new(0.0, 4.0, 0.0)),
        ]);

        let raw = blend_matrix([0, 1, -1, -1], [0.3, 0.3, 0.0, 0.0], &bones, 2048);
        let scaled = blend_matrix([0, 1, -1, -1], [3.0, 3.0, 0.0, 0.0], &bones, 2048);

        assert!((raw.w.x - 1.0).abs() < 1e-6);
        assert!((raw.w.y - 2.0).abs() < 1e-6);
        assert!((raw.w.w - 1.0).abs() < 1e-6);
        for (a, b) in [(raw.w, scaled.w), (raw.x, scaled.x), (raw.y, scaled.y)] {
            assert!((a - b).magnitude() < 1e-6);
        }
    }

    #[test]
    fn invalid_indices_are_excluded_from_both_sides() {
        let bones = matrix_data(&[cgmath::Matrix4::from_translation(cgmath::Vector3::new(
            1.0, 0.0, 0.0,
        ))]);

        let matrix = blend_matrix([0, 5000, -3, -1], [0.5, 0.9, 0.9, 0.0], &bones, 2048);

        assert!((matrix.w.x - 1.0).abs() < 1e-6);
        assert!((matrix.x.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn vertex_without_influence_keeps_morphed_rest_position() {
        let inputs = DispatchInputs {
            rest_positions: &[1.0, 2.0, 3.0],
            rest_normals: &[0.0, 1.0, 0.0],
            bone_indices: &[0, 1, -1, -1],
            bone_weights: &[0.0005, 0.0, 0.0, 0.0],
            bone_matrices: &matrix_data(&[cgmath::Matrix4::from_scale(5.0); 2]),
            morph_offsets: &[0.5, 0.0, -1.0],
            morph_weights: &[1.0],
            ..Default::default()
        };

        let skinned = skin_vertex(&params(1, 1, UV_DISABLED), &inputs, 0);

        assert_eq!(skinned.position, cgmath::Vector3::new(1.5, 2.0, 2.0));
        assert_eq!(skinned.normal, cgmath::Vector3::new(0.0, 1.0, 0.0));
        assert!(skinned.uv.is_none());
    }

    #[test]
    fn morph_contributions_commute() {
        let rest_positions = [0.0, 0.0, 0.0];
        let offsets = [0.1, 0.2, 0.3, -0.4, 0.5, 0.25];
        let swapped_offsets = [-0.4, 0.5, 0.25, 0.1, 0.2, 0.3];
        let identity = matrix_data(&[cgmath::Matrix4::identity()]);

        let inputs = DispatchInputs {
            rest_positions: &rest_positions,
            rest_normals: &[0.0, 0.0, 1.0],
            bone_indices: &[0, -1, -1, -1],
            bone_weights: &[1.0, 0.0, 0.0, 0.0],
            bone_matrices: &identity,
            morph_offsets: &offsets,
            morph_weights: &[0.6, 0.8],
            ..Default::default()
        };
        let swapped = DispatchInputs {
            morph_offsets: &swapped_offsets,
            morph_weights: &[0.8, 0.6],
            ..inputs
        };

        let a = skin_vertex(&params(1, 2, UV_DISABLED), &inputs, 0);
        let b = skin_vertex(&params(1, 2, UV_DISABLED), &swapped, 0);

        assert!((a.position - b.position).magnitude() < 1e-6);
        assert!((a.position.x - (0.06 - 0.32)).abs() < 1e-6);
    }

    #[test]
    fn uv_morphs_use_signed_weights_and_cap() {
        let morph_count = MAX_UV_MORPHS as usize + 4;
        let uv_offsets: Vec<f32> = (0..morph_count).flat_map(|_| [1.0, 1.0]).collect();
        let mut uv_weights = vec![-0.5; morph_count];
        uv_weights[1] = 0.0005;

        let inputs = DispatchInputs {
            rest_positions: &[0.0; 3],
            rest_normals: &[0.0, 1.0, 0.0],
            bone_indices: &[-1; 4],
            bone_weights: &[0.0; 4],
            rest_uvs: &[0.5, 0.5],
            uv_morph_offsets: &uv_offsets,
            uv_morph_weights: &uv_weights,
            ..Default::default()
        };

        let skinned = skin_vertex(&params(1, 0, morph_count as i32), &inputs, 0);
        let uv = skinned.uv.unwrap();

        let applied = (MAX_UV_MORPHS - 1) as f32;
        assert!((uv.x - (0.5 - 0.5 * applied)).abs() < 1e-4);
        assert!((uv.y - uv.x).abs() < 1e-6);
    }

    #[test]
    fn dispatch_only_writes_in_range_vertices() {
        let identity = matrix_data(&[cgmath::Matrix4::identity()]);
        let inputs = DispatchInputs {
            rest_positions: &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0],
            rest_normals: &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            bone_indices: &[0, -1, -1, -1, 0, -1, -1, -1],
            bone_weights: &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            bone_matrices: &identity,
            ..Default::default()
        };
        let mut positions = vec![-9.0; 9];
        let mut normals = vec![-9.0; 9];

        run_dispatch(
            &params(2, 0, UV_DISABLED),
            &inputs,
            &mut DispatchOutputs {
                positions: &mut positions,
                normals: &mut normals,
                uvs: None,
            },
            1,
            256,
        );

        assert_eq!(&positions[..6], &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(&positions[6..], &[-9.0, -9.0, -9.0]);
    }
}
