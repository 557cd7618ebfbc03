use deps::*;

use rand::prelude::*;

use crate::math::*;
use crate::SpawnConfig;

/// The population, one array per field, indexed by agent id.
#[derive(Debug, Clone, Default)]
pub struct Agents {
    pub positions: Vec<TVec3>,
    pub velocities: Vec<TVec3>,
    pub rotations: Vec<TQuat>,
    pub scales: Vec<TVec3>,
    pub attached: Vec<bool>,
    /// Index into the active formation's points.
    pub target_indices: Vec<u32>,
}

impl Agents {
    pub fn with_capacity(count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(count),
            velocities: Vec::with_capacity(count),
            rotations: Vec::with_capacity(count),
            scales: Vec::with_capacity(count),
            attached: Vec::with_capacity(count),
            target_indices: Vec::with_capacity(count),
        }
    }

    /// Scatters `config.count` agents on a jittered ring around the origin.
    pub fn spawn(config: &SpawnConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let count = config.count;
        let mut agents = Self::with_capacity(count);
        let step = 360. / count.max(1) as TReal;
        for ii in 0..count {
            let angle = (ii as TReal * (step + rng.gen_range(0. ..20.))).to_radians();
            let lift = rng.gen_range(-1. ..=1.);
            let radius = rng.gen_range(config.radius_min..=config.radius_max);
            agents.push(
                TVec3::new(angle.cos(), lift, angle.sin()) * radius,
                config.scale,
            );
        }
        tracing::debug!(count, seed = config.seed, "agents spawned");
        agents
    }

    /// Adds a resting agent at `position`.
    pub fn push(&mut self, position: TVec3, scale: TVec3) -> u32 {
        let id = self.positions.len() as u32;
        self.positions.push(position);
        self.velocities.push(TVec3::ZERO);
        self.rotations.push(TQuat::IDENTITY);
        self.scales.push(scale);
        self.attached.push(false);
        self.target_indices.push(0);
        id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Spreads the agents over `point_count` formation points.
    pub fn assign_targets(&mut self, point_count: usize) {
        let count = self.len();
        for (ii, target) in self.target_indices.iter_mut().enumerate() {
            *target = if point_count == 0 {
                0
            } else {
                crate::formation::target_index(ii, count, point_count) as u32
            };
        }
    }

    pub fn clear_attached(&mut self) {
        self.attached.iter_mut().for_each(|flag| *flag = false);
    }

    pub fn attached_count(&self) -> usize {
        self.attached.iter().filter(|flag| **flag).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_is_seeded_and_on_ring() {
        let config = SpawnConfig {
            count: 64,
            radius_min: 4.,
            radius_max: 6.,
            scale: TVec3::splat(0.5),
            seed: 42,
        };
        let a = Agents::spawn(&config);
        let b = Agents::spawn(&config);
        assert_eq!(a.len(), 64);
        assert_eq!(a.positions, b.positions);
        for ii in 0..a.len() {
            let p = a.positions[ii];
            let flat = TVec3::new(p.x, 0., p.z).length();
            assert!((4. - 1e-4..=6. + 1e-4).contains(&flat), "{flat}");
            assert!(p.y.abs() <= 6. + 1e-4);
            assert_eq!(a.velocities[ii], TVec3::ZERO);
            assert_eq!(a.rotations[ii], TQuat::IDENTITY);
            assert_eq!(a.scales[ii], TVec3::splat(0.5));
            assert!(!a.attached[ii]);
        }
    }

    #[test]
    fn assigns_strided_targets() {
        let mut agents = Agents::default();
        for ii in 0..4 {
            agents.push(TVec3::splat(ii as TReal), TVec3::ONE);
        }
        agents.assign_targets(10);
        assert_eq!(agents.target_indices, vec![0, 3, 6, 9]);
        agents.attached[2] = true;
        assert_eq!(agents.attached_count(), 1);
        agents.clear_attached();
        assert_eq!(agents.attached_count(), 0);
    }
}
