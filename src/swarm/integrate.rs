use deps::*;

use crate::math::*;
use crate::swarm::phase::{PhaseStep, SimulationPhase};
use crate::SwarmParams;

/// Mutable view of one agent's slots for the integrator.
#[derive(Debug)]
pub struct AgentSlots<'a> {
    pub position: &'a mut TVec3,
    pub velocity: &'a mut TVec3,
    pub rotation: &'a mut TQuat,
    pub attached: &'a mut bool,
}

/// Advances a single agent by `dt`.
///
/// `desired` is the flocking velocity and only used while flocking. `target` is the
/// agent's formation point, if a formation is active.
pub fn integrate_agent(
    agent: AgentSlots<'_>,
    desired: TVec3,
    target: Option<TVec3>,
    step: &PhaseStep,
    params: &SwarmParams,
    dt: TReal,
) {
    let AgentSlots {
        position,
        velocity,
        rotation,
        attached,
    } = agent;

    let target = match (step.phase, target) {
        (SimulationPhase::Flocking, _) | (_, None) => None,
        (_, Some(target)) => Some(target),
    };

    if let Some(target) = target {
        // attached agents ride along with their point
        if *attached {
            *position = target;
            *velocity = TVec3::ZERO;
            return;
        }
    }

    let desired = match target {
        Some(target) => target - *position,
        None => desired,
    };
    let keep = (-step.response_rate * dt).exp();
    let new_vel = velocity.lerp(desired, keep);
    let new_vel = clamp_speed(new_vel, *velocity, params.min_speed, params.max_speed);

    if let Some(target) = target {
        // an agent left with nowhere to go is already on its point
        let settled = step.response_rate <= params.response_rate_floor
            || new_vel.length_squared() <= DEGENERATE_LENGTH_SQ;
        if settled && position.distance(target) <= params.snap_distance {
            *position = target;
            *velocity = TVec3::ZERO;
            *attached = true;
            return;
        }
    }

    *velocity = new_vel;
    *rotation = facing(new_vel, *rotation);
    *position += new_vel * dt;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Agent {
        position: TVec3,
        velocity: TVec3,
        rotation: TQuat,
        attached: bool,
    }

    impl Agent {
        fn at(position: TVec3) -> Self {
            Self {
                position,
                velocity: TVec3::ZERO,
                rotation: TQuat::IDENTITY,
                attached: false,
            }
        }

        fn slots(&mut self) -> AgentSlots<'_> {
            AgentSlots {
                position: &mut self.position,
                velocity: &mut self.velocity,
                rotation: &mut self.rotation,
                attached: &mut self.attached,
            }
        }
    }

    fn params() -> SwarmParams {
        SwarmParams {
            min_speed: 0.1,
            max_speed: 5.,
            ..Default::default()
        }
    }

    const CONVERGE: PhaseStep = PhaseStep {
        phase: SimulationPhase::ConvergingToFormation,
        response_rate: 1.,
        reset_attached: false,
    };

    const ATTACHED: PhaseStep = PhaseStep {
        phase: SimulationPhase::AttachedToFormation,
        response_rate: 0.,
        reset_attached: false,
    };

    const FLOCK: PhaseStep = PhaseStep {
        phase: SimulationPhase::Flocking,
        response_rate: 2.,
        reset_attached: false,
    };

    #[test]
    fn flocking_follows_desired_and_faces_motion() {
        let mut agent = Agent::at(TVec3::ZERO);
        let target = Some(TVec3::new(-100., 0., 0.));
        integrate_agent(agent.slots(), TVec3::new(0., 0., 40.), target, &FLOCK, &params(), 0.1);
        // target ignored while flocking, speed capped
        assert!((agent.velocity.length() - 5.).abs() < 1e-5);
        assert!(agent.velocity.normalize().abs_diff_eq(TVec3::Z, 1e-6));
        assert!(agent.position.abs_diff_eq(TVec3::new(0., 0., 0.5), 1e-5));
        assert!((agent.rotation * -TVec3::Z).abs_diff_eq(TVec3::Z, 1e-5));
        assert!(!agent.attached);
    }

    #[test]
    fn no_snap_while_rate_is_high() {
        let mut agent = Agent::at(TVec3::new(0.1, 0., 0.));
        integrate_agent(agent.slots(), TVec3::ZERO, Some(TVec3::ZERO), &CONVERGE, &params(), 0.016);
        assert!(!agent.attached);
        assert!(agent.velocity.length() >= 0.1 - 1e-6);
    }

    #[test]
    fn snaps_when_close_and_settled() {
        let mut agent = Agent::at(TVec3::new(0.15, 0., 0.));
        agent.velocity = TVec3::new(-1., 0., 0.);
        let target = TVec3::new(0., 0., 0.);
        integrate_agent(agent.slots(), TVec3::ZERO, Some(target), &ATTACHED, &params(), 0.016);
        assert!(agent.attached);
        assert_eq!(agent.position, target);
        assert_eq!(agent.velocity, TVec3::ZERO);
    }

    #[test]
    fn resting_on_point_reattaches_at_any_rate() {
        let target = TVec3::new(2., 0., 1.);
        let mut agent = Agent::at(target);
        integrate_agent(agent.slots(), TVec3::ZERO, Some(target), &CONVERGE, &params(), 0.016);
        assert!(agent.attached);
        assert_eq!(agent.position, target);
        assert_eq!(agent.velocity, TVec3::ZERO);
    }

    #[test]
    fn attached_agents_track_their_point() {
        let mut agent = Agent::at(TVec3::ZERO);
        agent.attached = true;
        let moved = TVec3::new(1., 2., 3.);
        integrate_agent(agent.slots(), TVec3::X, Some(moved), &CONVERGE, &params(), 0.016);
        assert_eq!(agent.position, moved);
        assert_eq!(agent.velocity, TVec3::ZERO);
        assert!(agent.attached);
    }

    #[test]
    fn zero_desired_keeps_previous_velocity() {
        let mut agent = Agent::at(TVec3::ZERO);
        integrate_agent(agent.slots(), TVec3::ZERO, None, &FLOCK, &params(), 0.016);
        assert_eq!(agent.velocity, TVec3::ZERO);
        assert_eq!(agent.position, TVec3::ZERO);
        assert_eq!(agent.rotation, TQuat::IDENTITY);
    }
}
