use deps::*;

use bevy::math::{Mat3, Quat, Vec3};

pub type TReal = f32;
pub type TVec3 = Vec3;
pub type TQuat = Quat;

/// Squared lengths at or below this are treated as zero-length.
pub const DEGENERATE_LENGTH_SQ: TReal = 1e-12;

/// Returns `v` with its length clamped to `[min_speed, max_speed]`.
///
/// A vector too short to renormalise yields `previous` unchanged instead.
#[inline]
pub fn clamp_speed(v: TVec3, previous: TVec3, min_speed: TReal, max_speed: TReal) -> TVec3 {
    let len_sq = v.length_squared();
    if len_sq < min_speed * min_speed {
        if len_sq <= DEGENERATE_LENGTH_SQ {
            return previous;
        }
        v * (min_speed / len_sq.sqrt())
    } else if len_sq > max_speed * max_speed {
        v * (max_speed / len_sq.sqrt())
    } else {
        v
    }
}

/// The component of `reference` perpendicular to `dir`, normalized.
///
/// `dir` is assumed to be normalized. `None` when the two are (nearly) parallel.
#[inline]
pub fn stable_up(dir: TVec3, reference: TVec3) -> Option<TVec3> {
    let up = reference - dir * dir.dot(reference);
    let len_sq = up.length_squared();
    if len_sq <= 1e-8 {
        None
    } else {
        Some(up / len_sq.sqrt())
    }
}

/// Orientation whose -Z axis points along `forward` and whose Y axis is `up`.
///
/// Both inputs are expected to be normalized and perpendicular.
#[inline]
pub fn look_rotation(forward: TVec3, up: TVec3) -> TQuat {
    let back = -forward;
    let right = up.cross(back).normalize();
    let up = back.cross(right);
    TQuat::from_mat3(&Mat3::from_cols(right, up, back))
}

/// Facing for an agent moving with `velocity`.
///
/// World up is projected off the direction of motion; if motion is vertical the previous
/// rotation's up is used instead. Returns `previous` when no stable basis exists.
pub fn facing(velocity: TVec3, previous: TQuat) -> TQuat {
    let len_sq = velocity.length_squared();
    if len_sq <= DEGENERATE_LENGTH_SQ {
        return previous;
    }
    let dir = velocity / len_sq.sqrt();
    match stable_up(dir, TVec3::Y).or_else(|| stable_up(dir, previous * TVec3::Y)) {
        Some(up) => look_rotation(dir, up),
        None => previous,
    }
}

/// Deterministic pseudo-random value in `[0, 1)` seeded by a point's coordinates.
#[inline]
pub fn hash01(p: TVec3) -> TReal {
    (p.dot(TVec3::new(12.9898, 78.233, 37.719)).sin() * 43_758.547)
        .fract()
        .abs()
}

/// `(x, y, z)` struct form for vectors in config and asset files.
pub mod serde_vec3 {
    use deps::*;

    use super::TVec3;

    #[derive(serde::Serialize, serde::Deserialize)]
    #[serde(crate = "serde")]
    struct XYZ {
        x: f32,
        y: f32,
        z: f32,
    }

    pub fn serialize<S: serde::Serializer>(v: &TVec3, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(
            &XYZ {
                x: v.x,
                y: v.y,
                z: v.z,
            },
            s,
        )
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<TVec3, D::Error> {
        let XYZ { x, y, z } = serde::Deserialize::deserialize(d)?;
        Ok(TVec3::new(x, y, z))
    }

    /// Same as the parent module but for sequences of vectors.
    pub mod vec {
        use deps::*;

        use super::XYZ;
        use crate::math::TVec3;

        pub fn serialize<S: serde::Serializer>(v: &[TVec3], s: S) -> Result<S::Ok, S::Error> {
            s.collect_seq(v.iter().map(|v| XYZ {
                x: v.x,
                y: v.y,
                z: v.z,
            }))
        }

        pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<TVec3>, D::Error> {
            let raw: Vec<XYZ> = serde::Deserialize::deserialize(d)?;
            Ok(raw
                .into_iter()
                .map(|XYZ { x, y, z }| TVec3::new(x, y, z))
                .collect())
        }
    }
}

#[test]
fn clamp_speed_bounds() {
    let prev = TVec3::X;
    let slow = clamp_speed(TVec3::new(0.01, 0., 0.), prev, 0.1, 5.);
    assert!((slow.length() - 0.1).abs() < 1e-6);
    let fast = clamp_speed(TVec3::new(0., 30., 40.), prev, 0.1, 5.);
    assert!((fast.length() - 5.).abs() < 1e-5);
    assert!(fast.normalize().abs_diff_eq(TVec3::new(0., 0.6, 0.8), 1e-6));
    let ok = TVec3::new(1., 2., 2.);
    assert_eq!(clamp_speed(ok, prev, 0.1, 5.), ok);
}

#[test]
fn clamp_speed_keeps_previous_on_zero() {
    let prev = TVec3::new(0., 0., 3.);
    let out = clamp_speed(TVec3::ZERO, prev, 0.1, 5.);
    assert_eq!(out, prev);
    assert!(out.is_finite());
}

#[test]
fn facing_points_along_motion() {
    let vel = TVec3::new(3., 1., -2.);
    let rot = facing(vel, TQuat::IDENTITY);
    let fwd = rot * -TVec3::Z;
    assert!(fwd.abs_diff_eq(vel.normalize(), 1e-5));
    // up stays in the plane of world up and the motion
    let up = rot * TVec3::Y;
    assert!(up.dot(fwd).abs() < 1e-5);
    assert!(up.y > 0.);
}

#[test]
fn facing_degenerate_inputs() {
    let prev = TQuat::from_rotation_x(0.3);
    assert_eq!(facing(TVec3::ZERO, prev), prev);
    // straight up falls back to the previous up axis
    let rot = facing(TVec3::Y * 2., prev);
    assert!((rot * -TVec3::Z).abs_diff_eq(TVec3::Y, 1e-5));
    assert!(rot.is_finite());
    // vertical motion with a previous up that is also vertical
    let upright = TQuat::IDENTITY;
    assert_eq!(facing(TVec3::Y, upright), upright);
}

#[test]
fn hash01_is_deterministic_and_bounded() {
    for ii in 0..64 {
        let p = TVec3::new(ii as TReal * 0.37, -(ii as TReal) * 1.3, 4.2);
        let h = hash01(p);
        assert!((0. ..1.).contains(&h));
        assert_eq!(h, hash01(p));
    }
}
