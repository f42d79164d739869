use std::collections::HashMap;
use std::rc::Rc;

use crate::skinning::context::ComputeContext;
use crate::skinning::instance::{RestPoseMesh, SkinnedInstance};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MeshId(usize);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstanceId(usize);

pub struct SkinningStorage<C: ComputeContext> {
    pub mesh_registry: HashMap<MeshId, Rc<RestPoseMesh<C>>>,
    pub instance_registry: HashMap<InstanceId, SkinnedInstance<C>>,
    next_id: usize,
}

impl<C: ComputeContext> Default for SkinningStorage<C> {
    fn default() -> Self {
        Self {
            mesh_registry: HashMap::new(),
            instance_registry: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<C: ComputeContext> SkinningStorage<C> {
    pub fn insert_mesh(&mut self, mesh: RestPoseMesh<C>) -> MeshId {
        let id = MeshId(self.allocate_id());
        self.mesh_registry.insert(id, Rc::new(mesh));
        id
    }

    pub fn insert_instance(&mut self, instance: SkinnedInstance<C>) -> InstanceId {
        let id = InstanceId(self.allocate_id());
        self.instance_registry.insert(id, instance);
        id
    }

    fn allocate_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
