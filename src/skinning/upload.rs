use anyhow::Result;

use crate::data::morph::MorphTargetSet;
use crate::error::Error;
use crate::skinning::buffer::{BoneMatrixBuffer, MorphBuffers, FLOAT_SIZE};
use crate::skinning::context::ComputeContext;

/// Writes up to `max_bones` matrices and returns how many were written.
pub fn upload_bone_matrices<C: ComputeContext>(
    context: &mut C,
    buffer: &BoneMatrixBuffer<C>,
    matrices: &[cgmath::Matrix4<f32>],
) -> usize {
    let bone_count = matrices.len().min(buffer.max_bones as usize);
    if bone_count == 0 {
        return 0;
    }

    if bone_count < matrices.len() {
        log::trace!(
            "Truncating bone matrix upload from {} to {bone_count} bones",
            matrices.len()
        );
    }

    let matrix_data: Vec<[[f32; 4]; 4]> = matrices[..bone_count]
        .iter()
        .map(|matrix| (*matrix).into())
        .collect();

    context.write_buffer(&buffer.gpu_buffer, 0, bytemuck::cast_slice(&matrix_data));

    bone_count
}

/// Writes the whole weight vector. The length must match the allocated morph count.
pub fn upload_morph_weights<C: ComputeContext>(
    context: &mut C,
    buffers: &MorphBuffers<C>,
    weights: &[f32],
) -> Result<()> {
    check_weight_count(buffers, weights)?;
    if weights.is_empty() {
        return Ok(());
    }

    context.write_buffer(&buffers.weights, 0, bytemuck::cast_slice(weights));

    Ok(())
}

pub fn check_weight_count<C: ComputeContext>(
    buffers: &MorphBuffers<C>,
    weights: &[f32],
) -> Result<()> {
    if weights.len() != buffers.morph_count as usize {
        return Err(Error::invalid_data(format!(
            "{:?} morph weight vector has {} entries, expected {}",
            buffers.kind,
            weights.len(),
            buffers.morph_count
        ))
        .into());
    }
    Ok(())
}

pub fn upload_morph_offsets<C: ComputeContext>(
    context: &mut C,
    buffers: &MorphBuffers<C>,
    morphs: &MorphTargetSet,
) -> Result<()> {
    if morphs.kind() != buffers.kind
        || morphs.morph_count() != buffers.morph_count as usize
        || morphs.vertex_count() != buffers.vertex_count as usize
    {
        return Err(Error::invalid_data(format!(
            "{:?} morph set ({} morphs, {} vertices) does not fit {:?} buffers ({} morphs, {} vertices)",
            morphs.kind(),
            morphs.morph_count(),
            morphs.vertex_count(),
            buffers.kind,
            buffers.morph_count,
            buffers.vertex_count
        ))
        .into());
    }

    if morphs.offsets().is_empty() {
        return Ok(());
    }

    log::debug!(
        "Uploading {:?} morph offsets: {} bytes",
        buffers.kind,
        morphs.offsets().len() as u64 * FLOAT_SIZE
    );

    context.write_buffer(&buffers.offsets, 0, bytemuck::cast_slice(morphs.offsets()));

    Ok(())
}
