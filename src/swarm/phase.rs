use deps::*;

use educe::Educe;

use crate::math::*;
use crate::PhaseConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Educe)]
#[educe(Default)]
pub enum SimulationPhase {
    #[educe(Default)]
    Flocking,
    ConvergingToFormation,
    AttachedToFormation,
}

/// What a tick should do, as decided by the [`PhaseController`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStep {
    pub phase: SimulationPhase,
    pub response_rate: TReal,
    /// Detach every agent before integrating.
    pub reset_attached: bool,
}

/// Countdown from flocking into the formation.
///
/// Setting a formation starts the start delay, after which the transition timer counts
/// down from `transition_duration`. The response rate decays with the timer and hits zero
/// when it runs out. Once the timer has overrun by a full duration the agents are detached
/// and the timer restarts at half the duration.
#[derive(Debug, Clone)]
pub struct PhaseController {
    config: PhaseConfig,
    phase: SimulationPhase,
    has_formation: bool,
    delay_left: TReal,
    timer: TReal,
}

impl PhaseController {
    pub fn new(config: PhaseConfig) -> Self {
        Self {
            timer: config.transition_duration,
            delay_left: 0.,
            config,
            phase: SimulationPhase::Flocking,
            has_formation: false,
        }
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    /// Seconds left on the transition timer. Negative once overrun.
    pub fn timer(&self) -> TReal {
        self.timer
    }

    /// Restarts the countdown. Call whenever the formation is swapped.
    pub fn formation_changed(&mut self, has_formation: bool) {
        self.has_formation = has_formation;
        self.delay_left = if has_formation {
            self.config.formation_start_delay
        } else {
            0.
        };
        self.timer = self.config.transition_duration;
        self.set_phase(if has_formation && self.delay_left <= 0. {
            SimulationPhase::ConvergingToFormation
        } else {
            SimulationPhase::Flocking
        });
    }

    /// Response rate for the current timer.
    pub fn response_rate(&self, max_rate: TReal) -> TReal {
        match self.phase {
            SimulationPhase::Flocking => max_rate,
            _ => {
                let duration = self.config.transition_duration;
                max_rate * (self.timer / duration).clamp(0., 1.)
            }
        }
    }

    pub fn advance(&mut self, dt: TReal, max_rate: TReal) -> PhaseStep {
        if !self.has_formation {
            return self.step(max_rate, false);
        }
        if self.delay_left > 0. {
            self.delay_left -= dt;
            if self.delay_left <= 0. {
                self.set_phase(SimulationPhase::ConvergingToFormation);
            }
            return PhaseStep {
                phase: SimulationPhase::Flocking,
                response_rate: max_rate,
                reset_attached: false,
            };
        }

        let duration = self.config.transition_duration;
        self.timer -= dt;
        let mut reset_attached = false;
        if self.timer <= -duration {
            self.timer = duration * 0.5;
            reset_attached = true;
            tracing::debug!("formation overrun, detaching agents");
        }
        self.set_phase(if self.timer > 0. {
            SimulationPhase::ConvergingToFormation
        } else {
            SimulationPhase::AttachedToFormation
        });
        self.step(max_rate, reset_attached)
    }

    fn step(&self, max_rate: TReal, reset_attached: bool) -> PhaseStep {
        PhaseStep {
            phase: self.phase,
            response_rate: self.response_rate(max_rate),
            reset_attached,
        }
    }

    fn set_phase(&mut self, phase: SimulationPhase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "phase change");
            self.phase = phase;
        }
    }
}
