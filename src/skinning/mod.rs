use anyhow::Result;

use crate::config::SkinningConfig;
use crate::data::vertex::VertexAttributeSet;
use crate::error::Error;
use crate::skinning::buffer::allocator::ResourcePool;
use crate::skinning::context::ComputeContext;
use crate::skinning::instance::{FrameInput, InstanceDescriptor, RestPoseMesh, SkinnedInstance};
use crate::skinning::program::SkinningProgram;
use crate::skinning::storage::{InstanceId, MeshId, SkinningStorage};

pub mod buffer;
pub mod context;
pub mod dispatch;
pub mod instance;
pub mod kernel;
pub mod program;
pub mod reference;
pub mod software;
pub mod storage;
pub mod upload;
pub mod wgpu_context;

/// Owns the compute context, the skinning program and every loaded mesh and active instance.
pub struct SkinningSystem<C: ComputeContext> {
    config: SkinningConfig,
    pool: ResourcePool,
    program: SkinningProgram<C>,
    storage: SkinningStorage<C>,
    context: C,
}

impl<C: ComputeContext> SkinningSystem<C> {
    pub fn new(context: C, config: SkinningConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pool: ResourcePool::new(config.max_bones),
            config,
            program: SkinningProgram::new(),
            storage: Default::default(),
            context,
        })
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.program.initialize(&mut self.context)
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_ready()
    }

    pub fn shutdown(&mut self) {
        self.program.shutdown();
    }

    pub fn load_mesh(&mut self, name: &str, attributes: &VertexAttributeSet) -> MeshId {
        let mesh = RestPoseMesh::load(&mut self.context, &self.pool, name, attributes);
        self.storage.insert_mesh(mesh)
    }

    /// Forgets the mesh. Its buffers stay alive until the last instance using them is removed.
    pub fn unload_mesh(&mut self, id: MeshId) -> bool {
        self.storage.mesh_registry.remove(&id).is_some()
    }

    pub fn activate_instance(
        &mut self,
        mesh_id: MeshId,
        descriptor: &InstanceDescriptor,
    ) -> Result<InstanceId> {
        let mesh = match self.storage.mesh_registry.get(&mesh_id) {
            Some(mesh) => mesh.clone(),
            None => {
                return Err(Error::invalid_data(format!("Unknown mesh {mesh_id:?}")).into());
            }
        };

        let instance = SkinnedInstance::activate(&mut self.context, &self.pool, mesh, descriptor)?;

        Ok(self.storage.insert_instance(instance))
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> bool {
        match self.storage.instance_registry.remove(&id) {
            Some(instance) => {
                log::debug!("Removing skinned instance {}", instance.name());
                true
            }
            None => false,
        }
    }

    pub fn update_instance(&mut self, id: InstanceId, frame: &FrameInput) -> Result<usize> {
        match self.storage.instance_registry.get(&id) {
            Some(instance) => instance.upload_frame(&mut self.context, frame),
            None => Err(Error::invalid_data(format!("Unknown instance {id:?}")).into()),
        }
    }

    pub fn dispatch_instance(&mut self, id: InstanceId) -> bool {
        match self.storage.instance_registry.get(&id) {
            Some(instance) => instance.dispatch(&mut self.context, &self.program),
            None => false,
        }
    }

    /// Dispatches every active instance in activation order and returns how many ran.
    pub fn dispatch_all(&mut self) -> usize {
        if !self.program.is_ready() {
            return 0;
        }

        let mut ids: Vec<InstanceId> = self.storage.instance_registry.keys().copied().collect();
        ids.sort();

        ids.into_iter()
            .filter(|id| self.dispatch_instance(*id))
            .count()
    }

    pub fn instance(&self, id: InstanceId) -> Option<&SkinnedInstance<C>> {
        self.storage.instance_registry.get(&id)
    }

    pub fn instance_with_context(&mut self, id: InstanceId) -> Option<(&SkinnedInstance<C>, &mut C)> {
        let instance = self.storage.instance_registry.get(&id)?;
        Some((instance, &mut self.context))
    }

    pub fn instance_count(&self) -> usize {
        self.storage.instance_registry.len()
    }

    pub fn config(&self) -> &SkinningConfig {
        &self.config
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }
}
