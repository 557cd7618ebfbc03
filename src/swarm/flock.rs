use deps::*;

use crate::math::*;
use crate::SwarmParams;

/// Per agent output of the flock pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlockAccum {
    /// Average neighbour velocity.
    pub alignment: TVec3,
    /// Average of the neighbour positions and the seek point.
    pub cohesion: TVec3,
    /// Push away from close neighbours, stronger the closer they are.
    pub separation: TVec3,
}

impl Default for FlockAccum {
    fn default() -> Self {
        Self {
            alignment: TVec3::ZERO,
            cohesion: TVec3::ZERO,
            separation: TVec3::ZERO,
        }
    }
}

impl FlockAccum {
    /// Steering velocity for an agent at `position`.
    #[inline]
    pub fn desired(&self, position: TVec3, seek: TVec3, params: &SwarmParams) -> TVec3 {
        params.align_weight * self.alignment
            + params.cohesion_weight * (self.cohesion - position)
            + params.separation_weight * self.separation
            + params.seek_weight * (seek - position)
    }
}

/// Accumulates the flocking rules for agent `ii` over `candidates`.
///
/// Candidates outside the rule radii and `ii` itself are ignored, so passing every agent
/// gives the all pairs result.
pub fn flock_agent(
    ii: usize,
    positions: &[TVec3],
    velocities: &[TVec3],
    candidates: impl IntoIterator<Item = usize>,
    seek: TVec3,
    params: &SwarmParams,
) -> FlockAccum {
    let current_pos = positions[ii];
    let neighbor_dist_sq = params.neighbor_distance * params.neighbor_distance;
    let separation_dist_sq = params
        .separation_distance
        .map(|cutoff| cutoff * cutoff)
        .unwrap_or(neighbor_dist_sq);

    // the counts start at one so a lone agent divides by one
    let mut count = 1.;
    let mut vel_sum = TVec3::ZERO;
    let mut center_sum = seek;
    let mut separation = TVec3::ZERO;

    for jj in candidates {
        if jj == ii {
            continue;
        }
        let offset = current_pos - positions[jj];
        let dist_sq = offset.length_squared();
        if dist_sq >= neighbor_dist_sq {
            continue;
        }
        count += 1.;
        vel_sum += velocities[jj];
        center_sum += positions[jj];
        // the falloff always spans the neighbour radius, the cutoff only trims it
        if dist_sq < separation_dist_sq && dist_sq > DEGENERATE_LENGTH_SQ {
            let dist = dist_sq.sqrt();
            let falloff = (1. - dist / params.neighbor_distance).clamp(0., 1.);
            separation += offset * (falloff / dist);
        }
    }

    FlockAccum {
        alignment: vel_sum / count,
        cohesion: center_sum / count,
        separation,
    }
}
