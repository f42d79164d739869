use std::collections::HashMap;

use anyhow::Result;

use crate::error::Error;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MorphKind {
    Vertex,
    Uv,
}

impl MorphKind {
    pub fn components(&self) -> usize {
        match self {
            MorphKind::Vertex => 3,
            MorphKind::Uv => 2,
        }
    }
}

/// `offsets` holds `kind.components()` floats per entry, parallel to `vertex_indices`.
#[derive(Clone, Debug, Default)]
pub struct SparseMorph {
    pub name: String,
    pub vertex_indices: Vec<u32>,
    pub offsets: Vec<f32>,
}

/// The offset for morph `m` and vertex `v` starts at
/// `(m * vertex_count + v) * components`.
#[derive(Clone, Debug)]
pub struct MorphTargetSet {
    kind: MorphKind,
    vertex_count: usize,
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
    offsets: Vec<f32>,
    weights: Vec<f32>,
}

impl MorphTargetSet {
    pub fn from_dense(
        kind: MorphKind,
        vertex_count: usize,
        names: Vec<String>,
        offsets: Vec<f32>,
    ) -> Result<Self> {
        let morph_count = names.len();
        let expected = morph_count * vertex_count * kind.components();

        if offsets.len() != expected {
            return Err(Error::invalid_data(format!(
                "{kind:?} morph offset table has {} floats, expected {expected} ({morph_count} morphs x {vertex_count} vertices x {})",
                offsets.len(),
                kind.components()
            ))
            .into());
        }

        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();

        Ok(Self {
            kind,
            vertex_count,
            names,
            name_to_index,
            offsets,
            weights: vec![0.0; morph_count],
        })
    }

    pub fn from_sparse(kind: MorphKind, vertex_count: usize, morphs: &[SparseMorph]) -> Result<Self> {
        let components = kind.components();
        let mut offsets = vec![0.0; morphs.len() * vertex_count * components];

        for (morph_index, morph) in morphs.iter().enumerate() {
            if morph.offsets.len() != morph.vertex_indices.len() * components {
                return Err(Error::invalid_data(format!(
                    "Sparse {kind:?} morph '{}' has {} offset floats for {} vertices",
                    morph.name,
                    morph.offsets.len(),
                    morph.vertex_indices.len()
                ))
                .into());
            }

            let morph_base = morph_index * vertex_count * components;

            for (entry, vertex_index) in morph.vertex_indices.iter().enumerate() {
                let vertex_index = *vertex_index as usize;
                if vertex_index >= vertex_count {
                    log::debug!(
                        "Skipping {kind:?} morph '{}' offset for out-of-range vertex {vertex_index}",
                        morph.name
                    );
                    continue;
                }

                let source = &morph.offsets[entry * components..(entry + 1) * components];
                let target_begin = morph_base + vertex_index * components;
                for (target, value) in offsets[target_begin..target_begin + components]
                    .iter_mut()
                    .zip(source)
                {
                    *target += *value;
                }
            }
        }

        let names = morphs.iter().map(|morph| morph.name.clone()).collect();

        Self::from_dense(kind, vertex_count, names, offsets)
    }

    pub fn kind(&self) -> MorphKind {
        self.kind
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn morph_count(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn offsets(&self) -> &[f32] {
        &self.offsets
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weights are stored as given; UV morphs rely on negative values.
    pub fn set_weight(&mut self, index: usize, weight: f32) {
        if let Some(slot) = self.weights.get_mut(index) {
            *slot = weight;
        }
    }

    pub fn set_weights(&mut self, weights: &[f32]) {
        for (slot, weight) in self.weights.iter_mut().zip(weights) {
            *slot = *weight;
        }
    }

    pub fn reset_weights(&mut self) {
        self.weights.iter_mut().for_each(|weight| *weight = 0.0);
    }
}

const GROUP_DEPTH_LIMIT: u32 = 16;
const GROUP_WEIGHT_EPSILON: f32 = 0.001;

/// Child of a group morph, scaled by `influence` when the group is applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupChild {
    pub morph: usize,
    pub influence: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControlledMorph {
    Vertex(usize),
    Uv(usize),
    Group(Vec<GroupChild>),
}

/// Animation-facing morph list. Each entry drives a vertex morph, a UV morph or a group of
/// other entries; `resolve` folds the controller weights into the dense per-kind weight vectors.
#[derive(Clone, Debug, Default)]
pub struct MorphController {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
    morphs: Vec<ControlledMorph>,
    weights: Vec<f32>,
}

impl MorphController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, morph: ControlledMorph) -> usize {
        let index = self.morphs.len();
        self.names.push(name.to_string());
        self.name_to_index.insert(name.to_string(), index);
        self.morphs.push(morph);
        self.weights.push(0.0);
        index
    }

    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn set_weight(&mut self, index: usize, weight: f32) {
        if let Some(slot) = self.weights.get_mut(index) {
            *slot = weight;
        }
    }

    pub fn set_weight_by_name(&mut self, name: &str, weight: f32) -> bool {
        match self.find_by_name(name) {
            Some(index) => {
                self.weights[index] = weight;
                true
            }
            None => false,
        }
    }

    /// Replaces the weights of both sets with the effective weights of this frame.
    pub fn resolve(
        &self,
        vertex_morphs: Option<&mut MorphTargetSet>,
        uv_morphs: Option<&mut MorphTargetSet>,
    ) {
        let (vertex_weights, uv_weights) = self.resolve_weights(
            vertex_morphs.as_ref().map_or(0, |set| set.morph_count()),
            uv_morphs.as_ref().map_or(0, |set| set.morph_count()),
        );

        if let Some(set) = vertex_morphs {
            set.set_weights(&vertex_weights);
        }
        if let Some(set) = uv_morphs {
            set.set_weights(&uv_weights);
        }
    }

    pub fn resolve_weights(
        &self,
        vertex_morph_count: usize,
        uv_morph_count: usize,
    ) -> (Vec<f32>, Vec<f32>) {
        let mut vertex_weights = vec![0.0; vertex_morph_count];
        let mut uv_weights = vec![0.0; uv_morph_count];

        for (index, weight) in self.weights.iter().enumerate() {
            self.accumulate(index, *weight, 0, &mut vertex_weights, &mut uv_weights);
        }

        (vertex_weights, uv_weights)
    }

    fn accumulate(
        &self,
        index: usize,
        weight: f32,
        depth: u32,
        vertex_weights: &mut [f32],
        uv_weights: &mut [f32],
    ) {
        if depth > GROUP_DEPTH_LIMIT || weight.abs() < GROUP_WEIGHT_EPSILON {
            return;
        }

        let target = match self.morphs.get(index) {
            Some(ControlledMorph::Vertex(target)) => vertex_weights.get_mut(*target),
            Some(ControlledMorph::Uv(target)) => uv_weights.get_mut(*target),
            Some(ControlledMorph::Group(children)) => {
                for child in children.iter().filter(|child| child.morph != index) {
                    self.accumulate(
                        child.morph,
                        weight * child.influence,
                        depth + 1,
                        vertex_weights,
                        uv_weights,
                    );
                }
                return;
            }
            None => return,
        };

        match target {
            Some(slot) => *slot += weight,
            None => log::debug!("Morph '{}' targets a morph outside its set", self.names[index]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_table_length_is_checked() {
        let result = MorphTargetSet::from_dense(
            MorphKind::Vertex,
            4,
            vec!["smile".to_string()],
            vec![0.0; 11],
        );

        assert!(result.is_err());

        let set = MorphTargetSet::from_dense(
            MorphKind::Vertex,
            4,
            vec!["smile".to_string()],
            vec![0.0; 12],
        )
        .unwrap();
        assert_eq!(set.weights().len(), set.morph_count());
    }

    #[test]
    fn sparse_morphs_are_packed_per_morph_and_vertex() {
        let morphs = [
            SparseMorph {
                name: "blink".to_string(),
                vertex_indices: vec![1],
                offsets: vec![0.5, -0.5],
            },
            SparseMorph {
                name: "scroll".to_string(),
                vertex_indices: vec![0, 2, 9],
                offsets: vec![1.0, 0.0, 0.0, 1.0, 7.0, 7.0],
            },
        ];

        let set = MorphTargetSet::from_sparse(MorphKind::Uv, 3, &morphs).unwrap();

        assert_eq!(set.morph_count(), 2);
        assert_eq!(
            set.offsets(),
            &[0.0, 0.0, 0.5, -0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(set.find_by_name("scroll"), Some(1));
    }

    #[test]
    fn weights_keep_their_sign() {
        let mut set =
            MorphTargetSet::from_dense(MorphKind::Uv, 1, vec!["a".to_string()], vec![0.0; 2])
                .unwrap();

        set.set_weight(0, -0.75);
        set.set_weight(5, 1.0);

        assert_eq!(set.weights(), &[-0.75]);

        set.reset_weights();
        assert_eq!(set.weights(), &[0.0]);
    }

    fn controller_sets() -> (MorphTargetSet, MorphTargetSet) {
        let vertex = MorphTargetSet::from_dense(
            MorphKind::Vertex,
            1,
            vec!["mouth_open".to_string(), "brow_up".to_string()],
            vec![0.0; 6],
        )
        .unwrap();
        let uv = MorphTargetSet::from_dense(MorphKind::Uv, 1, vec!["blush".to_string()], vec![0.0; 2])
            .unwrap();
        (vertex, uv)
    }

    #[test]
    fn groups_scale_their_children_across_kinds() {
        let (mut vertex, mut uv) = controller_sets();
        let mut controller = MorphController::new();
        let mouth = controller.add("mouth_open", ControlledMorph::Vertex(0));
        let brow = controller.add("brow_up", ControlledMorph::Vertex(1));
        let blush = controller.add("blush", ControlledMorph::Uv(0));
        controller.add(
            "surprise",
            ControlledMorph::Group(vec![
                GroupChild { morph: mouth, influence: 0.5 },
                GroupChild { morph: brow, influence: 1.0 },
                GroupChild { morph: blush, influence: -1.0 },
            ]),
        );

        controller.set_weight(mouth, 0.25);
        assert!(controller.set_weight_by_name("surprise", 0.8));
        assert!(!controller.set_weight_by_name("missing", 1.0));
        controller.resolve(Some(&mut vertex), Some(&mut uv));

        assert!((vertex.weights()[0] - 0.65).abs() < 1e-6);
        assert!((vertex.weights()[1] - 0.8).abs() < 1e-6);
        assert!((uv.weights()[0] + 0.8).abs() < 1e-6);
    }

    #[test]
    fn cyclic_groups_stop_at_the_depth_limit() {
        let (mut vertex, _) = controller_sets();
        let mut controller = MorphController::new();
        let mouth = controller.add("mouth_open", ControlledMorph::Vertex(0));
        // Entry 1 references itself and entry 2; entry 2 points back at 1.
        controller.add(
            "loop_a",
            ControlledMorph::Group(vec![
                GroupChild { morph: 1, influence: 1.0 },
                GroupChild { morph: 2, influence: 1.0 },
            ]),
        );
        controller.add(
            "loop_b",
            ControlledMorph::Group(vec![
                GroupChild { morph: 1, influence: 1.0 },
                GroupChild { morph: mouth, influence: 0.1 },
            ]),
        );

        controller.set_weight_by_name("loop_a", 1.0);
        controller.resolve(Some(&mut vertex), None);

        // loop_b is reached at depths 1, 3, ..., 15 and adds 0.1 each time.
        assert!((vertex.weights()[0] - 0.8).abs() < 1e-5);
        assert_eq!(vertex.weights()[1], 0.0);
    }

    #[test]
    fn resolve_replaces_previous_weights() {
        let (mut vertex, _) = controller_sets();
        vertex.set_weight(1, 0.9);
        let mut controller = MorphController::new();
        controller.add("mouth_open", ControlledMorph::Vertex(0));
        controller.add("stale", ControlledMorph::Vertex(7));
        controller.set_weight(0, 0.0005);
        controller.set_weight(1, 1.0);

        controller.resolve(Some(&mut vertex), None);

        assert_eq!(vertex.weights(), &[0.0, 0.0]);
    }
}
