//! Keyframe evaluation for clip channels
//!
//! Times are in clip ticks. Each of the three substreams of a channel is
//! sampled independently: lerp for translation and scale, slerp for
//! rotation. An empty substream contributes the identity.

use marrow_core::{Quat, Transform, Vec3};
use marrow_rig::{Channel, Track};

/// Sample one substream at `t` ticks.
///
/// Outside the keyed range the nearest end key holds; inside it, the two
/// keys around `t` are mixed with `interp` at the normalised offset.
fn sample_track<T: Copy>(track: &Track<T>, t: f32, identity: T, interp: impl Fn(T, T, f32) -> T) -> T {
    let Track { times, values } = track;
    let last = match times.len().checked_sub(1) {
        Some(last) => last,
        None => return identity,
    };

    // How many keys lie at or before `t`. Times are ascending by the clip
    // contract, so this is a binary partition; 0 or the full length puts
    // `t` outside the keyed range.
    let ahead = times.partition_point(|&key| key <= t);
    if ahead == 0 {
        return values[0];
    }
    if ahead > last {
        return values[last];
    }

    let (lo, hi) = (ahead - 1, ahead);
    let span = times[hi] - times[lo];
    if span <= 0.0 {
        return values[lo];
    }
    let alpha = (t - times[lo]) / span;
    // An exact key hit lands on alpha 0; return the key untouched rather
    // than routing it through the interpolator
    if alpha <= 0.0 {
        return values[lo];
    }
    interp(values[lo], values[hi], alpha)
}

/// Sample a bone channel at `t` ticks, returning the interpolated local
/// transform. Empty substreams yield the identity contribution
/// (T = 0, R = identity, S = 1).
pub fn sample_channel(channel: &Channel, t: f32) -> Transform {
    Transform {
        translation: sample_track(&channel.translation, t, Vec3::ZERO, Vec3::lerp),
        rotation: sample_track(&channel.rotation, t, Quat::IDENTITY, Quat::slerp),
        scale: sample_track(&channel.scale, t, Vec3::ONE, Vec3::lerp),
    }
}

/// The channel's rest transforms: the first and last key of each substream.
/// Root-motion accounting uses these to measure what one whole loop of the
/// clip displaces the bone by.
pub fn rest_transforms(channel: &Channel) -> (Transform, Transform) {
    let first = Transform {
        translation: channel
            .translation
            .values
            .first()
            .copied()
            .unwrap_or(Vec3::ZERO),
        rotation: channel
            .rotation
            .values
            .first()
            .copied()
            .unwrap_or(Quat::IDENTITY),
        scale: channel.scale.values.first().copied().unwrap_or(Vec3::ONE),
    };
    let last = Transform {
        translation: channel
            .translation
            .values
            .last()
            .copied()
            .unwrap_or(Vec3::ZERO),
        rotation: channel
            .rotation
            .values
            .last()
            .copied()
            .unwrap_or(Quat::IDENTITY),
        scale: channel.scale.values.last().copied().unwrap_or(Vec3::ONE),
    };
    (first, last)
}
