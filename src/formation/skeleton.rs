use deps::*;

use educe::Educe;

use crate::math::*;

/// World space placement of a single bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneTransform {
    pub position: TVec3,
    pub rotation: TQuat,
}

impl BoneTransform {
    pub fn new(position: TVec3, rotation: TQuat) -> Self {
        Self { position, rotation }
    }
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            position: TVec3::ZERO,
            rotation: TQuat::IDENTITY,
        }
    }
}

/// A bone's live position and its rotation relative to the bind pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosedBone {
    pub position: TVec3,
    /// `current_rotation * inverse(bind_rotation)`
    pub delta: TQuat,
}

/// The bone hierarchy a rigged formation was baked against.
///
/// Bone positions of later poses always come from the live bones. The bind positions
/// are only used for the rest pose.
#[derive(Debug, Clone)]
pub struct Skeleton {
    bind_positions: Vec<TVec3>,
    inverse_bind: Vec<TQuat>,
}

impl Skeleton {
    pub fn bind(bind_pose: &[BoneTransform]) -> eyre::Result<Self> {
        eyre::ensure!(!bind_pose.is_empty(), "skeleton has no bones");
        eyre::ensure!(
            bind_pose.len() <= u16::MAX as usize,
            "skeleton has {} bones, at most {} are supported",
            bind_pose.len(),
            u16::MAX
        );
        let inverse_bind = bind_pose
            .iter()
            .enumerate()
            .map(|(ii, bone)| {
                eyre::ensure!(
                    bone.position.is_finite() && bone.rotation.is_finite(),
                    "bind pose of bone {ii} is not finite"
                );
                Ok(bone.rotation.normalize().inverse())
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        Ok(Self {
            bind_positions: bind_pose.iter().map(|bone| bone.position).collect(),
            inverse_bind,
        })
    }

    #[inline]
    pub fn bone_count(&self) -> usize {
        self.inverse_bind.len()
    }

    /// Writes the pose of `live` relative to the bind pose into `out`.
    pub fn refresh_pose(&self, live: &[BoneTransform], out: &mut SkeletonPose) -> eyre::Result<()> {
        eyre::ensure!(
            live.len() == self.bone_count(),
            "pose has {} bones but the skeleton has {}",
            live.len(),
            self.bone_count()
        );
        out.bones.clear();
        out.bones.extend(
            live.iter()
                .zip(self.inverse_bind.iter())
                .map(|(bone, inv_bind)| PosedBone {
                    position: bone.position,
                    delta: bone.rotation * *inv_bind,
                }),
        );
        Ok(())
    }

    /// The pose the skeleton was bound in.
    pub fn rest_pose(&self) -> SkeletonPose {
        SkeletonPose {
            bones: self
                .bind_positions
                .iter()
                .map(|&position| PosedBone {
                    position,
                    delta: TQuat::IDENTITY,
                })
                .collect(),
        }
    }
}

/// Snapshot of the bones taken once per tick and read by every agent.
#[derive(Debug, Clone, Default, Educe)]
#[educe(Deref)]
pub struct SkeletonPose {
    bones: Vec<PosedBone>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_relative_to_bind() {
        let bind = [
            BoneTransform::new(TVec3::ZERO, TQuat::from_rotation_y(0.5)),
            BoneTransform::default(),
        ];
        let skeleton = Skeleton::bind(&bind).unwrap();
        assert_eq!(skeleton.bone_count(), 2);

        let mut pose = skeleton.rest_pose();
        assert_eq!(pose.len(), 2);
        skeleton.refresh_pose(&bind, &mut pose).unwrap();
        for bone in pose.iter() {
            assert!(bone.delta.abs_diff_eq(TQuat::IDENTITY, 1e-6));
        }

        let turn = TQuat::from_rotation_z(1.2);
        let live = [
            BoneTransform::new(TVec3::X, turn * bind[0].rotation),
            BoneTransform::new(TVec3::Y, turn),
        ];
        skeleton.refresh_pose(&live, &mut pose).unwrap();
        assert_eq!(pose.len(), 2);
        assert!(pose[0].delta.abs_diff_eq(turn, 1e-6));
        assert!(pose[1].delta.abs_diff_eq(turn, 1e-6));
        assert_eq!(pose[1].position, TVec3::Y);
    }

    #[test]
    fn pose_must_match_bone_count() {
        let skeleton = Skeleton::bind(&[BoneTransform::default(); 3]).unwrap();
        let mut pose = SkeletonPose::default();
        assert!(skeleton
            .refresh_pose(&[BoneTransform::default(); 2], &mut pose)
            .is_err());
        assert!(Skeleton::bind(&[]).is_err());
    }
}
