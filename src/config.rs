use deps::*;

use std::path::Path;

use eyre::WrapErr;

use crate::math::*;

/// Everything the swarm reads from outside. Loaded once, read every tick.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", default)]
pub struct SwarmConfig {
    pub spawn: SpawnConfig,
    pub params: SwarmParams,
    pub phase: PhaseConfig,
    pub octree: OctreeConfig,
    /// Step size used by the plugin instead of the frame delta when set.
    /// In seconds.
    pub fixed_dt: Option<TReal>,
}

/// Used once when the population is created.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", default)]
pub struct SpawnConfig {
    pub count: usize,
    /// Agents are spawned on a ring with a radius drawn from `radius_min..=radius_max`.
    pub radius_min: TReal,
    pub radius_max: TReal,
    #[serde(with = "crate::math::serde_vec3")]
    pub scale: TVec3,
    pub seed: u64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            count: 256,
            radius_min: 18.,
            radius_max: 22.,
            scale: TVec3::ONE,
            seed: 0x4564ff,
        }
    }
}

/// Tuning scalars passed into every tick.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", default)]
pub struct SwarmParams {
    /// Agents closer than this contribute to alignment and cohesion.
    pub neighbor_distance: TReal,
    /// Optional tighter cutoff for separation. Without it every neighbour pushes, with
    /// a falloff that reaches zero at `neighbor_distance`.
    pub separation_distance: Option<TReal>,

    pub align_weight: TReal,
    pub cohesion_weight: TReal,
    pub separation_weight: TReal,
    pub seek_weight: TReal,
    /// Where the flock is drawn to when no formation is active.
    #[serde(with = "crate::math::serde_vec3")]
    pub seek_target: TVec3,

    /// In m/s.
    pub min_speed: TReal,
    /// In m/s.
    pub max_speed: TReal,

    /// Velocity smoothing rate used while flocking and at the start of a transition.
    /// The velocity keeps `exp(-rate * dt)` of the desired direction per tick, so zero
    /// means agents steer straight at their targets.
    pub max_response_rate: TReal,
    /// Agents may snap onto their targets once the response rate is at or below this.
    pub response_rate_floor: TReal,
    /// Distance at which an agent snaps onto its formation point.
    pub snap_distance: TReal,

    /// Upper bound of the outward breathing offset applied to formation points.
    pub breathing_max_distance: TReal,
    pub breathing_time_factor: TReal,

    /// Agents per parallel task.
    pub batch_size: usize,
}

impl Default for SwarmParams {
    fn default() -> Self {
        Self {
            neighbor_distance: 2.,
            separation_distance: None,
            align_weight: 1.,
            cohesion_weight: 1.,
            separation_weight: 1.5,
            seek_weight: 0.5,
            seek_target: TVec3::new(0., 1., 0.),
            min_speed: 1.,
            max_speed: 6.,
            max_response_rate: 2.,
            response_rate_floor: 0.01,
            snap_distance: 0.2,
            breathing_max_distance: 0.15,
            breathing_time_factor: 1.5,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", default)]
pub struct PhaseConfig {
    /// Seconds spent flocking after a formation is set before converging on it.
    pub formation_start_delay: TReal,
    /// Seconds over which the response rate decays to zero.
    pub transition_duration: TReal,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            formation_start_delay: 5.,
            transition_duration: 2.,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", default)]
pub struct OctreeConfig {
    /// Falls back to the all pairs scan when disabled.
    pub enabled: bool,
    pub max_depth: u8,
    pub max_entities_per_node: usize,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 5,
            max_entities_per_node: 64,
        }
    }
}

impl SwarmConfig {
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("unable to read swarm config at {path:?}"))?;
        let config: Self = ron::from_str(&raw)
            .wrap_err_with(|| format!("unable to parse swarm config at {path:?}"))?;
        config
            .validate()
            .wrap_err_with(|| format!("invalid swarm config at {path:?}"))?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        self.spawn.validate()?;
        self.params.validate()?;
        let PhaseConfig {
            formation_start_delay,
            transition_duration,
        } = self.phase;
        eyre::ensure!(
            formation_start_delay.is_finite() && formation_start_delay >= 0.,
            "formation_start_delay must be non-negative, got {formation_start_delay}"
        );
        eyre::ensure!(
            transition_duration.is_finite() && transition_duration > 0.,
            "transition_duration must be positive, got {transition_duration}"
        );
        eyre::ensure!(
            (1..=crate::octree::MAX_DEPTH_LIMIT).contains(&self.octree.max_depth),
            "octree max_depth must be in 1..={}, got {}",
            crate::octree::MAX_DEPTH_LIMIT,
            self.octree.max_depth
        );
        eyre::ensure!(
            self.octree.max_entities_per_node > 0,
            "octree max_entities_per_node must be positive"
        );
        if let Some(dt) = self.fixed_dt {
            eyre::ensure!(dt.is_finite() && dt > 0., "fixed_dt must be positive, got {dt}");
        }
        Ok(())
    }
}

impl SpawnConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(self.count > 0, "spawn count must be positive");
        eyre::ensure!(
            self.count <= u32::MAX as usize,
            "spawn count {} exceeds agent id range",
            self.count
        );
        eyre::ensure!(
            self.radius_min >= 0. && self.radius_min <= self.radius_max,
            "spawn radius range {}..={} is not ordered",
            self.radius_min,
            self.radius_max
        );
        eyre::ensure!(self.scale.is_finite(), "spawn scale must be finite");
        Ok(())
    }
}

impl SwarmParams {
    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(
            self.neighbor_distance > 0.,
            "neighbor_distance must be positive, got {}",
            self.neighbor_distance
        );
        if let Some(cutoff) = self.separation_distance {
            eyre::ensure!(cutoff > 0., "separation_distance must be positive, got {cutoff}");
        }
        eyre::ensure!(
            self.min_speed >= 0. && self.min_speed <= self.max_speed,
            "speed bounds {}..={} are not ordered",
            self.min_speed,
            self.max_speed
        );
        eyre::ensure!(
            self.max_response_rate >= 0. && self.response_rate_floor >= 0.,
            "response rates must be non-negative"
        );
        eyre::ensure!(self.snap_distance >= 0., "snap_distance must be non-negative");
        eyre::ensure!(
            self.breathing_max_distance >= 0.,
            "breathing_max_distance must be non-negative"
        );
        eyre::ensure!(self.batch_size > 0, "batch_size must be positive");
        Ok(())
    }

    /// The radius neighbour queries have to cover for all three rules.
    #[inline]
    pub fn query_radius(&self) -> TReal {
        self.neighbor_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SwarmConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_ron_fills_defaults() {
        let config: SwarmConfig = ron::from_str(
            "(params: (min_speed: 0.1, max_speed: 5.0, seek_target: (x: 1.0, y: 2.0, z: 3.0)), fixed_dt: Some(0.016))",
        )
        .unwrap();
        assert_eq!(config.params.min_speed, 0.1);
        assert_eq!(config.params.seek_target, TVec3::new(1., 2., 3.));
        assert_eq!(config.params.snap_distance, 0.2);
        assert_eq!(config.spawn.count, 256);
        assert_eq!(config.fixed_dt, Some(0.016));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = SwarmConfig::default();
        config.params.min_speed = 10.;
        assert!(config.validate().is_err());

        let mut config = SwarmConfig::default();
        config.octree.max_depth = 22;
        assert!(config.validate().is_err());

        let mut config = SwarmConfig::default();
        config.phase.transition_duration = 0.;
        assert!(config.validate().is_err());

        let mut config = SwarmConfig::default();
        config.spawn.count = 0;
        assert!(config.validate().is_err());

        let mut config = SwarmConfig::default();
        config.params.separation_distance = Some(0.);
        assert!(config.validate().is_err());
        config.params.separation_distance = Some(0.5);
        config.validate().unwrap();
    }

    #[test]
    fn bundled_config_loads() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/swarm.ron");
        let config = SwarmConfig::load(path).unwrap();
        assert_eq!(config.spawn.seed, SpawnConfig::default().seed);
        assert!(config.fixed_dt.is_some());
    }

    #[test]
    fn ron_round_trip() {
        let config = SwarmConfig::default();
        let out = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        let back: SwarmConfig = ron::from_str(&out).unwrap();
        assert_eq!(back.spawn.seed, config.spawn.seed);
        assert_eq!(back.params.seek_target, config.params.seek_target);
        assert_eq!(back.octree.max_depth, config.octree.max_depth);
    }
}
