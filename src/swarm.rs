use deps::*;

use bevy::prelude::Transform;
use bevy::tasks::{ComputeTaskPool, TaskPool};

use crate::formation::{BoneTransform, Formation};
use crate::math::*;
use crate::octree::Octree;
use crate::{SwarmConfig, SwarmParams};

pub mod agents;
pub mod flock;
pub mod integrate;
pub mod phase;

pub use agents::Agents;
pub use flock::FlockAccum;
pub use phase::{PhaseController, PhaseStep, SimulationPhase};

use flock::flock_agent;
use integrate::{integrate_agent, AgentSlots};

/// The whole simulation: agents, the phase countdown, the active formation and the
/// spatial index, advanced together by [`Swarm::tick`].
pub struct Swarm {
    agents: Agents,
    phase: PhaseController,
    formation: Option<Formation>,
    octree: Option<Octree>,
    /// Agents the octree refused this tick.
    unindexed: Vec<bool>,
    flock: Vec<FlockAccum>,
    scale: TVec3,
    elapsed: TReal,
    last_step: PhaseStep,
    /// Shared with bevy's compute systems when running inside an app.
    pool: &'static ComputeTaskPool,
}

impl Swarm {
    pub fn new(config: &SwarmConfig) -> eyre::Result<Self> {
        config.validate()?;
        Ok(Self::from_agents(Agents::spawn(&config.spawn), config))
    }

    /// Builds the simulation around an existing population.
    pub fn from_agents(agents: Agents, config: &SwarmConfig) -> Self {
        let count = agents.len();
        let phase = PhaseController::new(config.phase.clone());
        let last_step = PhaseStep {
            phase: phase.phase(),
            response_rate: config.params.max_response_rate,
            reset_attached: false,
        };
        Self {
            octree: if config.octree.enabled {
                Some(Octree::from_config(&config.octree))
            } else {
                None
            },
            unindexed: vec![false; count],
            flock: vec![FlockAccum::default(); count],
            scale: config.spawn.scale,
            elapsed: 0.,
            agents,
            phase,
            formation: None,
            last_step,
            pool: ComputeTaskPool::init(TaskPool::default),
        }
    }

    pub fn agents(&self) -> &Agents {
        &self.agents
    }

    /// Direct access to the population. Adding or removing agents is not supported.
    pub fn agents_mut(&mut self) -> &mut Agents {
        &mut self.agents
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase.phase()
    }

    pub fn phase_controller(&self) -> &PhaseController {
        &self.phase
    }

    /// The step the last tick ran with.
    pub fn last_step(&self) -> &PhaseStep {
        &self.last_step
    }

    pub fn elapsed(&self) -> TReal {
        self.elapsed
    }

    pub fn octree(&self) -> Option<&Octree> {
        self.octree.as_ref()
    }

    pub fn formation(&self) -> Option<&Formation> {
        self.formation.as_ref()
    }

    /// Swaps the active formation, restarting the transition and detaching every agent.
    pub fn set_formation(&mut self, formation: Option<Formation>) {
        match &formation {
            Some(formation) => {
                self.agents.assign_targets(formation.point_count());
                tracing::debug!(
                    points = formation.point_count(),
                    agents = self.agents.len(),
                    "formation set"
                );
            }
            None => tracing::debug!("formation cleared"),
        }
        self.agents.clear_attached();
        self.phase.formation_changed(formation.is_some());
        self.formation = formation;
    }

    pub fn set_formation_root(&mut self, root: Transform) {
        if let Some(formation) = &mut self.formation {
            formation.set_root(root);
        }
    }

    /// Snapshots the live bones for the next tick.
    pub fn set_pose(&mut self, live: &[BoneTransform]) -> eyre::Result<()> {
        match &mut self.formation {
            Some(formation) => formation.set_pose(live),
            None => Ok(()),
        }
    }

    /// Applies a new agent scale to the whole population if it changed.
    pub fn set_agent_scale(&mut self, scale: TVec3) {
        if scale != self.scale {
            self.agents.scales.iter_mut().for_each(|s| *s = scale);
            self.scale = scale;
        }
    }

    /// Advances the simulation by `dt` seconds.
    pub fn tick(&mut self, params: &SwarmParams, dt: TReal) -> PhaseStep {
        self.elapsed += dt;
        let step = self.phase.advance(dt, params.max_response_rate);
        if step.reset_attached {
            self.agents.clear_attached();
        }
        let seek = self
            .formation
            .as_ref()
            .map(|formation| formation.root().translation)
            .unwrap_or(params.seek_target);

        if step.phase == SimulationPhase::Flocking {
            self.rebuild_index();
            self.flock_pass(params, seek);
        }
        self.integrate_pass(params, &step, seek, dt);

        self.last_step = step;
        step
    }

    fn rebuild_index(&mut self) {
        self.unindexed.iter_mut().for_each(|flag| *flag = false);
        if let Some(octree) = &mut self.octree {
            for &id in octree.rebuild(&self.agents.positions) {
                self.unindexed[id as usize] = true;
            }
        }
    }

    fn flock_pass(&mut self, params: &SwarmParams, seek: TVec3) {
        let batch = params.batch_size.max(1);
        let radius = params.query_radius();
        let positions = &self.agents.positions[..];
        let velocities = &self.agents.velocities[..];
        let unindexed = &self.unindexed[..];
        let octree = self.octree.as_ref();
        let chunks = self.flock.chunks_mut(batch);

        self.pool.scope(|scope| {
            for (chunk_ii, chunk) in chunks.enumerate() {
                scope.spawn(async move {
                    let mut neighbors = Vec::new();
                    for (offset, slot) in chunk.iter_mut().enumerate() {
                        let ii = chunk_ii * batch + offset;
                        *slot = match octree {
                            Some(octree) if !unindexed[ii] => {
                                neighbors.clear();
                                octree.query_neighbors(positions[ii], radius, &mut neighbors);
                                // refused agents aren't in the tree but still count as neighbours
                                let candidates = neighbors
                                    .iter()
                                    .chain(octree.dropped().iter())
                                    .map(|&id| id as usize);
                                flock_agent(ii, positions, velocities, candidates, seek, params)
                            }
                            _ => flock_agent(
                                ii,
                                positions,
                                velocities,
                                0..positions.len(),
                                seek,
                                params,
                            ),
                        };
                    }
                });
            }
        });
    }

    fn integrate_pass(&mut self, params: &SwarmParams, step: &PhaseStep, seek: TVec3, dt: TReal) {
        let batch = params.batch_size.max(1);
        let elapsed = self.elapsed;
        let flock = &self.flock[..];
        let formation = self.formation.as_ref();
        let Agents {
            positions,
            velocities,
            rotations,
            attached,
            target_indices,
            ..
        } = &mut self.agents;
        let target_indices = &target_indices[..];

        let chunks = positions
            .chunks_mut(batch)
            .zip(velocities.chunks_mut(batch))
            .zip(rotations.chunks_mut(batch))
            .zip(attached.chunks_mut(batch));
        self.pool.scope(|scope| {
            for (chunk_ii, (((positions, velocities), rotations), attached)) in chunks.enumerate() {
                scope.spawn(async move {
                    for offset in 0..positions.len() {
                        let ii = chunk_ii * batch + offset;
                        let target = match (step.phase, formation) {
                            (SimulationPhase::Flocking, _) | (_, None) => None,
                            (_, Some(formation)) => Some(formation.resolve_breathing(
                                target_indices[ii] as usize,
                                elapsed,
                                params,
                            )),
                        };
                        let desired = if step.phase == SimulationPhase::Flocking {
                            flock[ii].desired(positions[offset], seek, params)
                        } else {
                            TVec3::ZERO
                        };
                        integrate_agent(
                            AgentSlots {
                                position: &mut positions[offset],
                                velocity: &mut velocities[offset],
                                rotation: &mut rotations[offset],
                                attached: &mut attached[offset],
                            },
                            desired,
                            target,
                            step,
                            params,
                            dt,
                        );
                    }
                });
            }
        });
    }
}
