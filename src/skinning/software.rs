use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::skinning::context::{
    BindingSlot, BufferRole, ComputeContext, KernelBuildError, MemoryBarrier, UniformLocation,
    BINDING_SLOT_COUNT,
};
use crate::skinning::kernel::{KernelSource, SkinningParams, UNIFORM_NAMES, WORKGROUP_SIZE};
use crate::skinning::reference::{run_dispatch, DispatchInputs, DispatchOutputs};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateBuffer {
        buffer: u64,
        label: String,
        size: u64,
        role: BufferRole,
    },
    WriteBuffer {
        buffer: u64,
        offset: u64,
        size: u64,
    },
    ReleaseBuffer {
        buffer: u64,
        label: String,
    },
    BuildProgram {
        program: u64,
        label: String,
    },
    ReleaseProgram {
        program: u64,
    },
    UseProgram {
        program: u64,
    },
    SetUniform {
        location: UniformLocation,
        value: i32,
    },
    BindStorage {
        slot: BindingSlot,
        buffer: u64,
    },
    Dispatch {
        group_count: u32,
    },
    MemoryBarrier(MemoryBarrier),
    RestoreState,
}

type CommandLog = Rc<RefCell<Vec<Command>>>;

struct BufferStorage {
    id: u64,
    label: String,
    data: RefCell<Vec<u8>>,
    log: CommandLog,
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Command::ReleaseBuffer {
            buffer: self.id,
            label: std::mem::take(&mut self.label),
        });
    }
}

pub struct SoftwareBuffer(Rc<BufferStorage>);

impl SoftwareBuffer {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn size(&self) -> u64 {
        self.0.data.borrow().len() as u64
    }

    pub fn read_f32(&self) -> Vec<f32> {
        bytemuck::pod_collect_to_vec(self.0.data.borrow().as_slice())
    }
}

struct ProgramStorage {
    id: u64,
    uniform_values: Cell<[i32; 4]>,
    log: CommandLog,
}

impl Drop for ProgramStorage {
    fn drop(&mut self) {
        self.log
            .borrow_mut()
            .push(Command::ReleaseProgram { program: self.id });
    }
}

/// Built kernel. Holds its own uniform values, the way a linked program object does.
pub struct SoftwareProgram(Rc<ProgramStorage>);

impl SoftwareProgram {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn uniform_values(&self) -> [i32; 4] {
        self.0.uniform_values.get()
    }
}

#[derive(Clone, Default)]
pub struct SoftwareState {
    program: Option<Weak<ProgramStorage>>,
    bindings: [Option<Weak<BufferStorage>>; BINDING_SLOT_COUNT],
}

#[derive(Default)]
pub struct SoftwareComputeContext {
    state: SoftwareState,
    next_id: u64,
    log: CommandLog,
    failing_build: Option<KernelBuildError>,
}

impl SoftwareComputeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `build_program` call fail with `error`.
    pub fn fail_next_build(&mut self, error: KernelBuildError) {
        self.failing_build = Some(error);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.borrow().clone()
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn bound_buffer(&self, slot: BindingSlot) -> Option<u64> {
        self.state.bindings[slot.index()]
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|storage| storage.id)
    }

    pub fn active_program(&self) -> Option<u64> {
        self.state
            .program
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|storage| storage.id)
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&self, command: Command) {
        self.log.borrow_mut().push(command);
    }

    fn bound_storage(&self, slot: BindingSlot) -> Option<Rc<BufferStorage>> {
        self.state.bindings[slot.index()]
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn read_slot<T: bytemuck::Pod>(&self, slot: BindingSlot) -> Vec<T> {
        let storage = match self.bound_storage(slot) {
            Some(storage) => storage,
            None => return Vec::new(),
        };
        let data = storage.data.borrow();
        bytemuck::pod_collect_to_vec(data.as_slice())
    }

    fn write_slot(&self, slot: BindingSlot, values: &[f32]) {
        if let Some(storage) = self.bound_storage(slot) {
            let mut data = storage.data.borrow_mut();
            let bytes: &[u8] = bytemuck::cast_slice(values);
            let size = bytes.len().min(data.len());
            data[..size].copy_from_slice(&bytes[..size]);
        }
    }
}

impl ComputeContext for SoftwareComputeContext {
    type Buffer = SoftwareBuffer;
    type Program = SoftwareProgram;
    type SavedState = SoftwareState;

    fn create_buffer(&mut self, label: &str, size: u64, role: BufferRole) -> SoftwareBuffer {
        let id = self.allocate_id();
        self.record(Command::CreateBuffer {
            buffer: id,
            label: label.to_string(),
            size,
            role,
        });

        SoftwareBuffer(Rc::new(BufferStorage {
            id,
            label: label.to_string(),
            data: RefCell::new(vec![0; size as usize]),
            log: self.log.clone(),
        }))
    }

    fn write_buffer(&mut self, buffer: &SoftwareBuffer, offset: u64, data: &[u8]) {
        self.record(Command::WriteBuffer {
            buffer: buffer.id(),
            offset,
            size: data.len() as u64,
        });

        let mut contents = buffer.0.data.borrow_mut();
        let start = (offset as usize).min(contents.len());
        let end = (start + data.len()).min(contents.len());
        if end - start < data.len() {
            log::warn!(
                "Write of {} bytes at offset {offset} overruns buffer {} of {} bytes",
                data.len(),
                buffer.label(),
                contents.len()
            );
        }
        contents[start..end].copy_from_slice(&data[..end - start]);
    }

    fn build_program(
        &mut self,
        label: &str,
        source: &KernelSource,
    ) -> Result<SoftwareProgram, KernelBuildError> {
        if let Some(error) = self.failing_build.take() {
            return Err(error);
        }

        if source.wgsl.trim().is_empty() {
            return Err(KernelBuildError::Compile {
                diagnostic: format!("{}: empty kernel source", source.label),
            });
        }
        if source.wgsl.contains("{{") || source.wgsl.contains("{%") {
            return Err(KernelBuildError::Compile {
                diagnostic: format!("{}: unrendered template expression", source.label),
            });
        }
        if !source.wgsl.contains(&format!("fn {}(", source.entry_point())) {
            return Err(KernelBuildError::Link {
                diagnostic: format!("{}: missing entry point {}", source.label, source.entry_point()),
            });
        }

        let id = self.allocate_id();
        self.record(Command::BuildProgram {
            program: id,
            label: label.to_string(),
        });

        Ok(SoftwareProgram(Rc::new(ProgramStorage {
            id,
            uniform_values: Cell::new([0; 4]),
            log: self.log.clone(),
        })))
    }

    fn uniform_location(&self, _program: &SoftwareProgram, name: &str) -> Option<UniformLocation> {
        UNIFORM_NAMES
            .iter()
            .position(|uniform_name| *uniform_name == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn save_state(&self) -> SoftwareState {
        self.state.clone()
    }

    fn restore_state(&mut self, state: SoftwareState) {
        self.record(Command::RestoreState);
        self.state = state;
    }

    fn use_program(&mut self, program: &SoftwareProgram) {
        self.record(Command::UseProgram {
            program: program.id(),
        });
        self.state.program = Some(Rc::downgrade(&program.0));
    }

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32) {
        self.record(Command::SetUniform { location, value });

        let program = self.state.program.as_ref().and_then(Weak::upgrade);
        match program {
            Some(program) if (location.0 as usize) < UNIFORM_NAMES.len() => {
                let mut values = program.uniform_values.get();
                values[location.0 as usize] = value;
                program.uniform_values.set(values);
            }
            Some(_) => log::warn!("Uniform location {} is out of range", location.0),
            None => log::warn!("Uniform set with no active program"),
        }
    }

    fn bind_storage(&mut self, slot: BindingSlot, buffer: &SoftwareBuffer) {
        self.record(Command::BindStorage {
            slot,
            buffer: buffer.id(),
        });
        self.state.bindings[slot.index()] = Some(Rc::downgrade(&buffer.0));
    }

    fn dispatch(&mut self, group_count: u32) {
        self.record(Command::Dispatch { group_count });

        let program = match self.state.program.as_ref().and_then(Weak::upgrade) {
            Some(program) => program,
            None => {
                log::warn!("Dispatch with no active program");
                return;
            }
        };
        let params = SkinningParams::from_values(program.uniform_values.get());

        let rest_positions: Vec<f32> = self.read_slot(BindingSlot::RestPositions);
        let rest_normals: Vec<f32> = self.read_slot(BindingSlot::RestNormals);
        let bone_indices: Vec<i32> = self.read_slot(BindingSlot::BoneIndices);
        let bone_weights: Vec<f32> = self.read_slot(BindingSlot::BoneWeights);
        let bone_matrices: Vec<f32> = self.read_slot(BindingSlot::BoneMatrices);
        let morph_offsets: Vec<f32> = self.read_slot(BindingSlot::MorphOffsets);
        let morph_weights: Vec<f32> = self.read_slot(BindingSlot::MorphWeights);
        let rest_uvs: Vec<f32> = self.read_slot(BindingSlot::RestUvs);
        let uv_morph_offsets: Vec<f32> = self.read_slot(BindingSlot::UvMorphOffsets);
        let uv_morph_weights: Vec<f32> = self.read_slot(BindingSlot::UvMorphWeights);

        let mut positions: Vec<f32> = self.read_slot(BindingSlot::SkinnedPositions);
        let mut normals: Vec<f32> = self.read_slot(BindingSlot::SkinnedNormals);
        let uvs_bound = self.bound_storage(BindingSlot::SkinnedUvs).is_some();
        let mut uvs: Vec<f32> = self.read_slot(BindingSlot::SkinnedUvs);

        let inputs = DispatchInputs {
            rest_positions: &rest_positions,
            rest_normals: &rest_normals,
            bone_indices: &bone_indices,
            bone_weights: &bone_weights,
            bone_matrices: &bone_matrices,
            morph_offsets: &morph_offsets,
            morph_weights: &morph_weights,
            rest_uvs: &rest_uvs,
            uv_morph_offsets: &uv_morph_offsets,
            uv_morph_weights: &uv_morph_weights,
        };
        let mut outputs = DispatchOutputs {
            positions: &mut positions,
            normals: &mut normals,
            uvs: uvs_bound.then_some(uvs.as_mut_slice()),
        };

        run_dispatch(
            &params,
            &inputs,
            &mut outputs,
            group_count,
            WORKGROUP_SIZE,
        );

        self.write_slot(BindingSlot::SkinnedPositions, &positions);
        self.write_slot(BindingSlot::SkinnedNormals, &normals);
        if uvs_bound && params.uv_morph_count >= 0 {
            self.write_slot(BindingSlot::SkinnedUvs, &uvs);
        }
    }

    fn memory_barrier(&mut self, barrier: MemoryBarrier) {
        self.record(Command::MemoryBarrier(barrier));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_a_buffer_records_its_release() {
        let mut context = SoftwareComputeContext::new();
        let buffer = context.create_buffer("TEST_BUFFER", 16, BufferRole::BoneMatrices);
        let id = buffer.id();

        drop(buffer);

        assert_eq!(
            context.commands().last(),
            Some(&Command::ReleaseBuffer {
                buffer: id,
                label: String::from("TEST_BUFFER"),
            })
        );
    }

    #[test]
    fn released_buffers_no_longer_count_as_bound() {
        let mut context = SoftwareComputeContext::new();
        let buffer = context.create_buffer("TEST_BUFFER", 16, BufferRole::RestAttribute);
        context.bind_storage(BindingSlot::RestPositions, &buffer);
        assert_eq!(context.bound_buffer(BindingSlot::RestPositions), Some(buffer.id()));

        drop(buffer);

        assert_eq!(context.bound_buffer(BindingSlot::RestPositions), None);
    }

    #[test]
    fn writes_land_at_the_requested_offset() {
        let mut context = SoftwareComputeContext::new();
        let buffer = context.create_buffer("TEST_BUFFER", 12, BufferRole::MorphWeights);

        context.write_buffer(&buffer, 4, bytemuck::cast_slice(&[2.5f32]));

        assert_eq!(buffer.read_f32(), vec![0.0, 2.5, 0.0]);
    }

    #[test]
    fn uniform_values_belong_to_the_active_program() {
        let mut context = SoftwareComputeContext::new();
        let source = KernelSource::skinning().unwrap();
        let first = context.build_program("FIRST", &source).unwrap();
        let second = context.build_program("SECOND", &source).unwrap();

        context.use_program(&first);
        context.set_uniform_i32(UniformLocation(2), 64);
        context.use_program(&second);
        context.set_uniform_i32(UniformLocation(2), 8);

        assert_eq!(first.uniform_values()[2], 64);
        assert_eq!(second.uniform_values()[2], 8);
    }

    #[test]
    fn restore_state_brings_back_earlier_bindings() {
        let mut context = SoftwareComputeContext::new();
        let first = context.create_buffer("FIRST", 16, BufferRole::RestAttribute);
        let second = context.create_buffer("SECOND", 16, BufferRole::RestAttribute);
        context.bind_storage(BindingSlot::RestNormals, &first);

        let saved = context.save_state();
        context.bind_storage(BindingSlot::RestNormals, &second);
        context.restore_state(saved);

        assert_eq!(context.bound_buffer(BindingSlot::RestNormals), Some(first.id()));
    }

    #[test]
    fn injected_build_failure_is_returned_once() {
        let mut context = SoftwareComputeContext::new();
        let source = KernelSource::skinning().unwrap();
        context.fail_next_build(KernelBuildError::Compile {
            diagnostic: String::from("0:12: syntax error"),
        });

        assert!(matches!(
            context.build_program("SKINNING_PROGRAM", &source),
            Err(KernelBuildError::Compile { .. })
        ));
        assert!(context.build_program("SKINNING_PROGRAM", &source).is_ok());
    }

    #[test]
    fn source_without_entry_point_fails_to_link() {
        let mut context = SoftwareComputeContext::new();
        let mut source = KernelSource::skinning().unwrap();
        source.wgsl = source.wgsl.replace("fn skin_vertices(", "fn renamed(");

        assert!(matches!(
            context.build_program("SKINNING_PROGRAM", &source),
            Err(KernelBuildError::Link { .. })
        ));
    }
}
