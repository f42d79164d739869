use std::cell::Cell;
use std::rc::{Rc, Weak};

use anyhow::Result;
use wgpu::util::DeviceExt;

use crate::config::AdapterConfig;
use crate::error::{Error, ErrorKind};
use crate::skinning::context::{
    BindingSlot, BufferRole, ComputeContext, KernelBuildError, MemoryBarrier, SlotAccess,
    UniformLocation, BINDING_SLOT_COUNT,
};
use crate::skinning::kernel::{KernelSource, SkinningParams};

/// Large enough for one element of every slot's array type.
const PLACEHOLDER_SIZE: u64 = 64;

pub struct WgpuBuffer {
    gpu_buffer: Rc<wgpu::Buffer>,
}

impl WgpuBuffer {
    pub fn gpu_buffer(&self) -> &wgpu::Buffer {
        &self.gpu_buffer
    }

    pub fn size(&self) -> u64 {
        self.gpu_buffer.size()
    }
}

struct ProgramObject {
    label: String,
    gpu_pipeline: wgpu::ComputePipeline,
    params_bind_group_layout: wgpu::BindGroupLayout,
    uniform_names: [&'static str; 4],
    uniform_values: Cell<[i32; 4]>,
}

pub struct WgpuProgram(Rc<ProgramObject>);

#[derive(Clone, Default)]
pub struct WgpuState {
    program: Option<Weak<ProgramObject>>,
    bindings: [Option<Weak<wgpu::Buffer>>; BINDING_SLOT_COUNT],
}

/// Compute context backed by a wgpu device.
///
/// Dispatches are recorded into a pending encoder; a memory barrier submits it, which orders the
/// writes before any later dispatch or draw on the same queue. Unbound slots are backed by
/// per-slot placeholder buffers since a bind group must be complete.
pub struct WgpuComputeContext {
    device: Rc<wgpu::Device>,
    queue: Rc<wgpu::Queue>,
    storage_bind_group_layout: wgpu::BindGroupLayout,
    placeholder_buffers: Vec<wgpu::Buffer>,
    encoder: Option<wgpu::CommandEncoder>,
    state: WgpuState,
}

impl WgpuComputeContext {
    pub async fn new(config: &AdapterConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
        {
            Some(adapter) => adapter,
            None => {
                return Err(Error::new(
                    ErrorKind::Unsupported,
                    String::from("Failed to retrieve adapter."),
                )
                .into())
            }
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Using adapter {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let available_storage_buffers = adapter.limits().max_storage_buffers_per_shader_stage;
        if available_storage_buffers < BINDING_SLOT_COUNT as u32 {
            return Err(Error::new(
                ErrorKind::Unsupported,
                format!(
                    "Adapter supports {available_storage_buffers} storage buffers per stage, {BINDING_SLOT_COUNT} are required"
                ),
            )
            .into());
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("SKINNING_DEVICE"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffers_per_shader_stage: BINDING_SLOT_COUNT as u32,
                        ..wgpu::Limits::default()
                    },
                    ..Default::default()
                },
                None,
            )
            .await?;

        Self::from_device(Rc::new(device), Rc::new(queue))
    }

    /// Wraps a device owned by a renderer, so skinned outputs can feed its draws directly.
    pub fn from_device(device: Rc<wgpu::Device>, queue: Rc<wgpu::Queue>) -> Result<Self> {
        let available_storage_buffers = device.limits().max_storage_buffers_per_shader_stage;
        if available_storage_buffers < BINDING_SLOT_COUNT as u32 {
            return Err(Error::new(
                ErrorKind::Unsupported,
                format!(
                    "Device allows {available_storage_buffers} storage buffers per stage, {BINDING_SLOT_COUNT} are required"
                ),
            )
            .into());
        }

        let storage_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("SKINNING_STORAGE_BIND_GROUP_LAYOUT"),
                entries: &BindingSlot::ALL
                    .iter()
                    .map(|slot| wgpu::BindGroupLayoutEntry {
                        binding: slot.index() as u32,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage {
                                read_only: slot.access() == SlotAccess::Read,
                            },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    })
                    .collect::<Vec<_>>(),
            });

        let placeholder_buffers = BindingSlot::ALL
            .iter()
            .map(|slot| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("SKINNING_PLACEHOLDER_{}_BUFFER", slot.index())),
                    size: PLACEHOLDER_SIZE,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            })
            .collect();

        Ok(Self {
            device,
            queue,
            storage_bind_group_layout,
            placeholder_buffers,
            encoder: None,
            state: Default::default(),
        })
    }

    pub fn device(&self) -> &Rc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Rc<wgpu::Queue> {
        &self.queue
    }

    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    pub fn read_buffer(&mut self, buffer: &WgpuBuffer) -> Result<Vec<u8>> {
        self.flush();

        let size = buffer.size();
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SKINNING_READBACK_BUFFER"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("SKINNING_READBACK_COMMAND_ENCODER"),
            });
        encoder.copy_buffer_to_buffer(buffer.gpu_buffer(), 0, &staging_buffer, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let staging_slice = staging_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        staging_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver.recv()??;

        let data = staging_slice.get_mapped_range().to_vec();
        staging_buffer.unmap();

        Ok(data)
    }

    pub fn read_f32(&mut self, buffer: &WgpuBuffer) -> Result<Vec<f32>> {
        let data = self.read_buffer(buffer)?;
        Ok(bytemuck::pod_collect_to_vec(data.as_slice()))
    }

    fn usage_for(role: BufferRole) -> wgpu::BufferUsages {
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;

        match role {
            BufferRole::RestAttribute | BufferRole::SkinnedOutput => {
                usage | wgpu::BufferUsages::VERTEX
            }
            BufferRole::BoneMatrices | BufferRole::MorphOffsets | BufferRole::MorphWeights => usage,
        }
    }
}

impl ComputeContext for WgpuComputeContext {
    type Buffer = WgpuBuffer;
    type Program = WgpuProgram;
    type SavedState = WgpuState;

    fn create_buffer(&mut self, label: &str, size: u64, role: BufferRole) -> WgpuBuffer {
        log::trace!("Creating buffer {label} of {size} bytes for {:?}", role.usage_hint());

        let gpu_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: Self::usage_for(role),
            mapped_at_creation: false,
        });

        WgpuBuffer {
            gpu_buffer: Rc::new(gpu_buffer),
        }
    }

    fn write_buffer(&mut self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer.gpu_buffer(), offset, data);
    }

    fn build_program(
        &mut self,
        label: &str,
        source: &KernelSource,
    ) -> Result<WgpuProgram, KernelBuildError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&source.label),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.as_str().into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(KernelBuildError::Compile {
                diagnostic: error.to_string(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params_bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label}_PARAMS_BIND_GROUP_LAYOUT")),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    }],
                });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{label}_PIPELINE_LAYOUT")),
                bind_group_layouts: &[&self.storage_bind_group_layout, &params_bind_group_layout],
                push_constant_ranges: &[],
            });

        let gpu_pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{label}_COMPUTE_PIPELINE")),
                layout: Some(&pipeline_layout),
                module: &shader_module,
                entry_point: source.entry_point(),
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(KernelBuildError::Link {
                diagnostic: error.to_string(),
            });
        }

        Ok(WgpuProgram(Rc::new(ProgramObject {
            label: label.to_string(),
            gpu_pipeline,
            params_bind_group_layout,
            uniform_names: source.configuration.uniform_names,
            uniform_values: Cell::new([0; 4]),
        })))
    }

    fn uniform_location(&self, program: &WgpuProgram, name: &str) -> Option<UniformLocation> {
        program
            .0
            .uniform_names
            .iter()
            .position(|uniform_name| *uniform_name == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn save_state(&self) -> WgpuState {
        self.state.clone()
    }

    fn restore_state(&mut self, state: WgpuState) {
        self.state = state;
    }

    fn use_program(&mut self, program: &WgpuProgram) {
        self.state.program = Some(Rc::downgrade(&program.0));
    }

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32) {
        let program = match self.state.program.as_ref().and_then(Weak::upgrade) {
            Some(program) => program,
            None => {
                log::warn!("Uniform set with no active program");
                return;
            }
        };

        let mut values = program.uniform_values.get();
        match values.get_mut(location.0 as usize) {
            Some(slot) => *slot = value,
            None => log::warn!("Uniform location {} is out of range", location.0),
        }
        program.uniform_values.set(values);
    }

    fn bind_storage(&mut self, slot: BindingSlot, buffer: &WgpuBuffer) {
        self.state.bindings[slot.index()] = Some(Rc::downgrade(&buffer.gpu_buffer));
    }

    fn dispatch(&mut self, group_count: u32) {
        let program = match self.state.program.as_ref().and_then(Weak::upgrade) {
            Some(program) => program,
            None => {
                log::warn!("Dispatch with no active program");
                return;
            }
        };

        let bound_buffers: Vec<Option<Rc<wgpu::Buffer>>> = self
            .state
            .bindings
            .iter()
            .map(|binding| binding.as_ref().and_then(Weak::upgrade))
            .collect();

        let storage_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}_STORAGE_BIND_GROUP", program.label)),
            layout: &self.storage_bind_group_layout,
            entries: &BindingSlot::ALL
                .iter()
                .map(|slot| {
                    let gpu_buffer = bound_buffers[slot.index()]
                        .as_deref()
                        .unwrap_or(&self.placeholder_buffers[slot.index()]);
                    wgpu::BindGroupEntry {
                        binding: slot.index() as u32,
                        resource: gpu_buffer.as_entire_binding(),
                    }
                })
                .collect::<Vec<_>>(),
        });

        let params = SkinningParams::from_values(program.uniform_values.get());
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{}_PARAMS_BUFFER", program.label)),
                contents: bytemuck::cast_slice(&[params]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let params_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}_PARAMS_BIND_GROUP", program.label)),
            layout: &program.params_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("SKINNING_COMMAND_ENCODER"),
                })
        });

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&format!("{}_COMPUTE_PASS", program.label)),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&program.gpu_pipeline);
        compute_pass.set_bind_group(0, &storage_bind_group, &[]);
        compute_pass.set_bind_group(1, &params_bind_group, &[]);
        compute_pass.dispatch_workgroups(group_count, 1, 1);
    }

    fn memory_barrier(&mut self, barrier: MemoryBarrier) {
        if barrier.shader_storage || barrier.vertex_attribute {
            self.flush();
        }
    }
}
