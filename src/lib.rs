pub mod config;
pub mod formation;
pub mod math;
pub mod octree;
pub mod plugin;
pub mod swarm;

pub use config::*;
pub use plugin::{AgentAttached, AgentId, FormationAnchor, LivePose, SwarmPlugin, SwarmSystems};
pub use swarm::Swarm;
