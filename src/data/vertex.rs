use anyhow::Result;

use crate::error::Error;

pub const BONES_PER_VERTEX: usize = 4;

/// Bone index that never resolves to a bone; its weight is ignored by the kernel.
pub const UNUSED_BONE_INDEX: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneInfluence {
    pub indices: [i32; BONES_PER_VERTEX],
    pub weights: [f32; BONES_PER_VERTEX],
}

impl BoneInfluence {
    pub fn single(bone: i32) -> Self {
        Self {
            indices: [bone, UNUSED_BONE_INDEX, UNUSED_BONE_INDEX, UNUSED_BONE_INDEX],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn pair(bones: [i32; 2], weights: [f32; 2]) -> Self {
        Self {
            indices: [bones[0], bones[1], UNUSED_BONE_INDEX, UNUSED_BONE_INDEX],
            weights: [weights[0], weights[1], 0.0, 0.0],
        }
    }
}

impl Default for BoneInfluence {
    fn default() -> Self {
        Self {
            indices: [UNUSED_BONE_INDEX; BONES_PER_VERTEX],
            weights: [0.0; BONES_PER_VERTEX],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VertexAttributeSet {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Option<Vec<[f32; 2]>>,
    influences: Vec<BoneInfluence>,
}

impl VertexAttributeSet {
    pub fn new(
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        uvs: Option<Vec<[f32; 2]>>,
        influences: Vec<BoneInfluence>,
    ) -> Result<Self> {
        let vertex_count = positions.len();

        if normals.len() != vertex_count {
            return Err(Error::invalid_data(format!(
                "Vertex attribute set has {} normals for {vertex_count} positions",
                normals.len()
            ))
            .into());
        }

        if let Some(uvs) = &uvs {
            if uvs.len() != vertex_count {
                return Err(Error::invalid_data(format!(
                    "Vertex attribute set has {} UVs for {vertex_count} positions",
                    uvs.len()
                ))
                .into());
            }
        }

        if influences.len() != vertex_count {
            return Err(Error::invalid_data(format!(
                "Vertex attribute set has {} bone influences for {vertex_count} positions",
                influences.len()
            ))
            .into());
        }

        Ok(Self {
            positions,
            normals,
            uvs,
            influences,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn uvs(&self) -> Option<&[[f32; 2]]> {
        self.uvs.as_deref()
    }

    pub fn influences(&self) -> &[BoneInfluence] {
        &self.influences
    }

    pub fn position_data(&self) -> &[f32] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn normal_data(&self) -> &[f32] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn uv_data(&self) -> Option<&[f32]> {
        self.uvs.as_ref().map(|uvs| bytemuck::cast_slice(uvs))
    }

    pub fn bone_index_data(&self) -> Vec<i32> {
        self.influences
            .iter()
            .flat_map(|influence| influence.indices)
            .collect()
    }

    pub fn bone_weight_data(&self) -> Vec<f32> {
        self.influences
            .iter()
            .flat_map(|influence| influence.weights)
            .collect()
    }
}
