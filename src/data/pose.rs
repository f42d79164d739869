use anyhow::Result;

use crate::data::transform::Transform;
use crate::error::Error;

/// Final skinning matrices for one frame, one per bone.
#[derive(Clone, Debug, Default)]
pub struct SkeletonPose {
    bone_matrices: Vec<cgmath::Matrix4<f32>>,
}

impl SkeletonPose {
    /// Composes local bone transforms down the hierarchy and applies the inverse bind matrices.
    pub fn from_local_transforms(
        parents: &[Option<usize>],
        local_transforms: &[Transform],
        inverse_bind_matrices: &[cgmath::Matrix4<f32>],
    ) -> Result<Self> {
        let bone_count = parents.len();
        if local_transforms.len() != bone_count || inverse_bind_matrices.len() != bone_count {
            return Err(Error::invalid_data(format!(
                "Skeleton pose expects {bone_count} local transforms and inverse bind matrices, got {} and {}",
                local_transforms.len(),
                inverse_bind_matrices.len()
            ))
            .into());
        }

        let mut global_matrices: Vec<cgmath::Matrix4<f32>> = Vec::with_capacity(bone_count);
        for (bone, (parent, local_transform)) in parents.iter().zip(local_transforms).enumerate() {
            let local_matrix = cgmath::Matrix4::from(*local_transform);

            let global_matrix = match parent {
                Some(parent) if *parent < bone => global_matrices[*parent] * local_matrix,
                Some(parent) => {
                    return Err(Error::invalid_data(format!(
                        "Bone {bone} references parent {parent} which does not precede it"
                    ))
                    .into())
                }
                None => local_matrix,
            };

            global_matrices.push(global_matrix);
        }

        let bone_matrices = global_matrices
            .iter()
            .zip(inverse_bind_matrices)
            .map(|(global_matrix, inverse_bind_matrix)| *global_matrix * *inverse_bind_matrix)
            .collect();

        Ok(Self { bone_matrices })
    }

    pub fn bone_count(&self) -> usize {
        self.bone_matrices.len()
    }

    pub fn bone_matrices(&self) -> &[cgmath::Matrix4<f32>] {
        &self.bone_matrices
    }
}

#[cfg(test)]
mod tests {
    use cgmath::SquareMatrix;

    use super::*;

    #[test]
    fn child_bones_inherit_parent_transforms() {
        let parents = [None, Some(0)];
        let local_transforms = [
            Transform::from_translation(cgmath::Vector3::new(0.0, 1.0, 0.0)),
            Transform::from_translation(cgmath::Vector3::new(0.0, 2.0, 0.0)),
        ];
        let inverse_bind_matrices = [cgmath::Matrix4::identity(); 2];

        let pose =
            SkeletonPose::from_local_transforms(&parents, &local_transforms, &inverse_bind_matrices)
                .unwrap();

        let child = pose.bone_matrices()[1];
        assert!((child.w.y - 3.0).abs() < 1e-6);
        assert!((child.w.x).abs() < 1e-6);
    }

    #[test]
    fn parents_must_precede_children() {
        let result = SkeletonPose::from_local_transforms(
            &[Some(1), None],
            &[Transform::default(); 2],
            &[cgmath::Matrix4::identity(); 2],
        );

        assert!(result.is_err());
    }
}
