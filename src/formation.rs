use deps::*;

use bevy::prelude::Transform;

use crate::math::*;
use crate::SwarmParams;

pub mod asset;
pub mod skeleton;

pub use asset::{BoneGridCell, FormationAsset};
pub use skeleton::{BoneTransform, PosedBone, Skeleton, SkeletonPose};

pub const MAX_BONES_PER_POINT: usize = 4;
/// Bone influences lighter than this are skipped when skinning. The remaining weights
/// are renormalized.
pub const MIN_BONE_WEIGHT: TReal = 0.01;
pub const WEIGHT_SUM_TOLERANCE: TReal = 1e-4;

/// Index of the formation point agent `agent` of `agent_count` is assigned to.
///
/// Points are visited with a stride of `ceil(point_count / agent_count)` so smaller swarms
/// still spread over the whole cloud. `point_count` must be non-zero.
#[inline]
pub fn target_index(agent: usize, agent_count: usize, point_count: usize) -> usize {
    debug_assert!(point_count > 0);
    let stride = (point_count + agent_count.max(1) - 1) / agent_count.max(1);
    ((agent as u64 * stride as u64) % point_count as u64) as usize
}

/// A target point skinned to up to four bones.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinnedPoint {
    pub local_offset: TVec3,
    /// `(bone index, weight)` pairs of the influential bones, weights summing to one.
    pub bones: SVec<[(u16, TReal); MAX_BONES_PER_POINT]>,
}

impl SkinnedPoint {
    fn from_cell(cell: &BoneGridCell, bone_count: usize) -> eyre::Result<Self> {
        eyre::ensure!(
            cell.local_offset.is_finite(),
            "local offset {:?} is not finite",
            cell.local_offset
        );
        eyre::ensure!(
            cell.bone_indices.len() == cell.bone_weights.len(),
            "{} bone indices but {} weights",
            cell.bone_indices.len(),
            cell.bone_weights.len()
        );
        eyre::ensure!(
            (1..=MAX_BONES_PER_POINT).contains(&cell.bone_indices.len()),
            "point is attached to {} bones, expected 1..={MAX_BONES_PER_POINT}",
            cell.bone_indices.len()
        );
        let mut bones: SVec<[(u16, TReal); MAX_BONES_PER_POINT]> = SVec::new();
        let mut sum = 0.;
        for (&index, &weight) in cell.bone_indices.iter().zip(cell.bone_weights.iter()) {
            if index < 0 || index as usize >= bone_count {
                eyre::bail!("bone index {index} is out of range for a skeleton of {bone_count} bones");
            }
            eyre::ensure!(
                weight.is_finite() && weight >= 0.,
                "bone weight {weight} is not a valid weight"
            );
            sum += weight;
            if weight >= MIN_BONE_WEIGHT {
                bones.push((index as u16, weight));
            }
        }
        // bakers may zero out the light influences, so the sum can fall short by those
        let min_sum = 1.
            - MIN_BONE_WEIGHT * (cell.bone_weights.len() - 1) as TReal
            - WEIGHT_SUM_TOLERANCE;
        eyre::ensure!(
            sum <= 1. + WEIGHT_SUM_TOLERANCE && sum >= min_sum,
            "bone weights sum to {sum} instead of 1"
        );
        let kept = bones.iter().map(|(_, weight)| *weight).sum::<TReal>();
        bones.iter_mut().for_each(|(_, weight)| *weight /= kept);
        Ok(Self {
            local_offset: cell.local_offset,
            bones,
        })
    }
}

#[derive(Debug, Clone)]
pub enum TargetPoints {
    Plain(Vec<TVec3>),
    Skinned {
        points: Vec<SkinnedPoint>,
        skeleton: Skeleton,
    },
}

/// The active target the swarm converges onto.
///
/// Immutable while a tick runs; the root and the pose are refreshed between ticks.
#[derive(Debug, Clone)]
pub struct Formation {
    targets: TargetPoints,
    pose: SkeletonPose,
    root: Transform,
    cell_size: TVec3,
}

impl Formation {
    /// Validates `asset` and builds the runtime formation.
    ///
    /// Rigged assets need the `skeleton` they were baked against.
    pub fn activate(asset: &FormationAsset, skeleton: Option<Skeleton>) -> eyre::Result<Self> {
        eyre::ensure!(asset.point_count() > 0, "formation has no points");
        let (targets, pose) = if asset.is_rigged {
            let skeleton = match skeleton {
                Some(skeleton) => skeleton,
                None => eyre::bail!("rigged formation needs a skeleton"),
            };
            let points = asset
                .point_bones
                .iter()
                .enumerate()
                .map(|(ii, cell)| {
                    SkinnedPoint::from_cell(cell, skeleton.bone_count())
                        .map_err(|err| err.wrap_err(format!("bad bone record at index {ii}")))
                })
                .collect::<eyre::Result<Vec<_>>>()?;
            let pose = skeleton.rest_pose();
            (TargetPoints::Skinned { points, skeleton }, pose)
        } else {
            if let Some(ii) = asset.points.iter().position(|point| !point.is_finite()) {
                eyre::bail!("formation point at index {ii} is not finite");
            }
            if skeleton.is_some() {
                tracing::debug!("skeleton ignored for unrigged formation");
            }
            (TargetPoints::Plain(asset.points.clone()), SkeletonPose::default())
        };
        let formation = Self {
            targets,
            pose,
            root: Transform::identity(),
            cell_size: asset.cell_size,
        };
        tracing::debug!(
            points = formation.point_count(),
            skinned = formation.is_skinned(),
            "formation activated"
        );
        Ok(formation)
    }

    pub fn point_count(&self) -> usize {
        match &self.targets {
            TargetPoints::Plain(points) => points.len(),
            TargetPoints::Skinned { points, .. } => points.len(),
        }
    }

    pub fn is_skinned(&self) -> bool {
        matches!(self.targets, TargetPoints::Skinned { .. })
    }

    pub fn targets(&self) -> &TargetPoints {
        &self.targets
    }

    pub fn cell_size(&self) -> TVec3 {
        self.cell_size
    }

    pub fn root(&self) -> &Transform {
        &self.root
    }

    pub fn set_root(&mut self, root: Transform) {
        self.root = root;
    }

    /// Refreshes the pose snapshot from the live bones.
    ///
    /// A no-op for unrigged formations.
    pub fn set_pose(&mut self, live: &[BoneTransform]) -> eyre::Result<()> {
        match &self.targets {
            TargetPoints::Skinned { skeleton, .. } => skeleton.refresh_pose(live, &mut self.pose),
            TargetPoints::Plain(_) => Ok(()),
        }
    }

    pub fn pose(&self) -> &SkeletonPose {
        &self.pose
    }

    /// Local coordinates of the point, used to seed its breathing phase.
    pub fn local_point(&self, index: usize) -> TVec3 {
        match &self.targets {
            TargetPoints::Plain(points) => points[index],
            TargetPoints::Skinned { points, .. } => points[index].local_offset,
        }
    }

    /// World position of point `index` without the breathing offset.
    pub fn resolve(&self, index: usize) -> TVec3 {
        match &self.targets {
            TargetPoints::Plain(points) => {
                self.root.translation + self.root.rotation * (self.root.scale * points[index])
            }
            TargetPoints::Skinned { points, .. } => {
                let point = &points[index];
                let offset = self.root.rotation * point.local_offset;
                let mut out = TVec3::ZERO;
                for &(bone, weight) in point.bones.iter() {
                    let bone = &self.pose[bone as usize];
                    out += weight * (bone.position + bone.delta * offset);
                }
                out
            }
        }
    }

    /// World position of point `index` at simulation time `elapsed`, breathing included.
    pub fn resolve_breathing(&self, index: usize, elapsed: TReal, params: &SwarmParams) -> TVec3 {
        let world = self.resolve(index);
        if params.breathing_max_distance <= 0. {
            return world;
        }
        world
            + breathing_offset(
                world - self.root.translation,
                self.local_point(index),
                elapsed,
                params.breathing_max_distance,
                params.breathing_time_factor,
            )
    }
}

/// Outward pulse along `from_root`, at most `max_distance` long.
///
/// `seed` picks the per point amplitude so neighbouring points don't move in lockstep.
#[inline]
pub fn breathing_offset(
    from_root: TVec3,
    seed: TVec3,
    elapsed: TReal,
    max_distance: TReal,
    time_factor: TReal,
) -> TVec3 {
    let pulse = (elapsed * time_factor).sin().clamp(0., 1.);
    from_root.normalize_or_zero() * (max_distance * hash01(seed) * pulse)
}
