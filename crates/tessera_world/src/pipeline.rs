//! The pipeline: every system, in phase order.
//!
//! Phases are entities with the `Phase` tag, ordered by their `DependsOn`
//! pairs. Among phases whose dependencies have all been placed, the lowest
//! entity index goes first. Within a phase systems run in registration
//! order. The pipeline is rebuilt lazily when phases or systems change.

use std::collections::{BTreeMap, HashMap};

use tessera_component::{Entity, Id};
use tracing::{info, warn};

use crate::builtin::{DEPENDS_ON, PHASE};
use crate::system::SystemKey;
use crate::world::World;

/// Topological order of `phases`, each listed with the entities it depends
/// on. Dependencies outside the list are ignored.
pub(crate) fn order_phases(phases: &[(Entity, Vec<Entity>)]) -> Vec<Entity> {
    let known: HashMap<Entity, usize> = phases.iter().enumerate().map(|(i, (e, _))| (*e, i)).collect();
    let mut pending = vec![0usize; phases.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); phases.len()];
    for (i, (_, deps)) in phases.iter().enumerate() {
        for dep in deps {
            if let Some(&d) = known.get(dep) {
                pending[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BTreeMap<u32, usize> = phases
        .iter()
        .enumerate()
        .filter(|(i, _)| pending[*i] == 0)
        .map(|(i, (e, _))| (e.index(), i))
        .collect();
    let mut order = Vec::with_capacity(phases.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(phases[i].0);
        for &next in &dependents[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert(phases[next].0.index(), next);
            }
        }
    }

    if order.len() < phases.len() {
        // DependsOn is kept acyclic, so this only happens with corrupt input.
        let mut rest: Vec<Entity> = phases
            .iter()
            .map(|(e, _)| *e)
            .filter(|e| !order.contains(e))
            .collect();
        rest.sort_by_key(|e| e.index());
        warn!(phases = rest.len(), "phase dependencies contain a cycle");
        order.extend(rest);
    }
    order
}

impl World {
    pub(crate) fn rebuild_pipeline(&mut self) {
        let phase_tag = Id::entity(PHASE);
        let phases: Vec<(Entity, Vec<Entity>)> = self
            .archetypes
            .iter()
            .filter(|a| a.has(phase_tag))
            .flat_map(|a| a.entities().iter().copied())
            .map(|phase| (phase, self.targets(phase, DEPENDS_ON)))
            .collect();
        let order = order_phases(&phases);

        let mut by_phase: HashMap<Entity, Vec<(u64, SystemKey)>> = HashMap::new();
        for (key, slot) in &self.systems {
            by_phase.entry(slot.phase).or_default().push((slot.order, key));
        }
        let mut pipeline = Vec::with_capacity(self.systems.len());
        for phase in &order {
            if let Some(mut systems) = by_phase.remove(phase) {
                systems.sort_unstable_by_key(|(order, _)| *order);
                pipeline.extend(systems.into_iter().map(|(_, key)| key));
            }
        }
        for (phase, systems) in by_phase {
            warn!(
                phase = %self.id_string(Id::entity(phase)),
                systems = systems.len(),
                "systems belong to a phase that no longer exists"
            );
        }

        self.pipeline = pipeline;
        self.pipeline_dirty = false;
        info!(
            phases = order.len(),
            systems = self.pipeline.len(),
            "rebuilt pipeline"
        );
    }

    /// System entities in the order `progress` runs them.
    pub fn pipeline_systems(&mut self) -> Vec<Entity> {
        if self.pipeline_dirty {
            self.rebuild_pipeline();
        }
        self.pipeline
            .iter()
            .filter_map(|&key| self.systems.get(key).map(|slot| slot.entity))
            .collect()
    }
}
