use crate::skinning::kernel::KernelSource;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BindingSlot {
    RestPositions = 0,
    RestNormals = 1,
    BoneIndices = 2,
    BoneWeights = 3,
    BoneMatrices = 4,
    MorphOffsets = 5,
    MorphWeights = 6,
    SkinnedPositions = 7,
    SkinnedNormals = 8,
    RestUvs = 9,
    UvMorphOffsets = 10,
    UvMorphWeights = 11,
    SkinnedUvs = 12,
}

pub const BINDING_SLOT_COUNT: usize = 13;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotAccess {
    Read,
    Write,
}

impl BindingSlot {
    pub const ALL: [BindingSlot; BINDING_SLOT_COUNT] = [
        BindingSlot::RestPositions,
        BindingSlot::RestNormals,
        BindingSlot::BoneIndices,
        BindingSlot::BoneWeights,
        BindingSlot::BoneMatrices,
        BindingSlot::MorphOffsets,
        BindingSlot::MorphWeights,
        BindingSlot::SkinnedPositions,
        BindingSlot::SkinnedNormals,
        BindingSlot::RestUvs,
        BindingSlot::UvMorphOffsets,
        BindingSlot::UvMorphWeights,
        BindingSlot::SkinnedUvs,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn access(&self) -> SlotAccess {
        match self {
            BindingSlot::SkinnedPositions | BindingSlot::SkinnedNormals | BindingSlot::SkinnedUvs => {
                SlotAccess::Write
            }
            _ => SlotAccess::Read,
        }
    }

    pub fn is_uv_slot(&self) -> bool {
        matches!(
            self,
            BindingSlot::RestUvs
                | BindingSlot::UvMorphOffsets
                | BindingSlot::UvMorphWeights
                | BindingSlot::SkinnedUvs
        )
    }
}

/// How a buffer will be written over its lifetime. A driver hint only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsageHint {
    Static,
    Dynamic,
    DynamicCopy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferRole {
    RestAttribute,
    BoneMatrices,
    MorphOffsets,
    MorphWeights,
    SkinnedOutput,
}

impl BufferRole {
    pub fn usage_hint(&self) -> UsageHint {
        match self {
            BufferRole::RestAttribute | BufferRole::MorphOffsets => UsageHint::Static,
            BufferRole::BoneMatrices | BufferRole::MorphWeights => UsageHint::Dynamic,
            BufferRole::SkinnedOutput => UsageHint::DynamicCopy,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryBarrier {
    pub shader_storage: bool,
    pub vertex_attribute: bool,
}

impl MemoryBarrier {
    /// Makes kernel writes visible to later storage reads and to vertex fetch.
    pub const SKINNED_OUTPUT: MemoryBarrier = MemoryBarrier {
        shader_storage: true,
        vertex_attribute: true,
    };
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UniformLocation(pub u32);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KernelBuildError {
    Compile { diagnostic: String },
    Link { diagnostic: String },
}

impl std::fmt::Display for KernelBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelBuildError::Compile { diagnostic } => {
                write!(f, "Skinning kernel failed to compile: {diagnostic}")
            }
            KernelBuildError::Link { diagnostic } => {
                write!(f, "Skinning kernel failed to link: {diagnostic}")
            }
        }
    }
}

impl std::error::Error for KernelBuildError {}

/// Device-side command stream used by the skinning engine.
///
/// Slot bindings, the active program and uniform values are state of the context, not of the
/// program: every dispatch sequence must bind everything it reads before dispatching. Buffers
/// and programs release their device resources when dropped.
pub trait ComputeContext {
    type Buffer;
    type Program;
    type SavedState;

    fn create_buffer(&mut self, label: &str, size: u64, role: BufferRole) -> Self::Buffer;

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn build_program(
        &mut self,
        label: &str,
        source: &KernelSource,
    ) -> Result<Self::Program, KernelBuildError>;

    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<UniformLocation>;

    fn save_state(&self) -> Self::SavedState;

    fn restore_state(&mut self, state: Self::SavedState);

    fn use_program(&mut self, program: &Self::Program);

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32);

    fn bind_storage(&mut self, slot: BindingSlot, buffer: &Self::Buffer);

    fn dispatch(&mut self, group_count: u32);

    fn memory_barrier(&mut self, barrier: MemoryBarrier);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_match_their_binding_numbers() {
        for (index, slot) in BindingSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), index);
        }
    }

    #[test]
    fn only_output_slots_are_writable() {
        let writable: Vec<_> = BindingSlot::ALL
            .iter()
            .filter(|slot| slot.access() == SlotAccess::Write)
            .map(|slot| slot.index())
            .collect();

        assert_eq!(writable, vec![7, 8, 12]);
    }
}
