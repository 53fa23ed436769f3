//! Keyframed animation clip data — per-bone channels with ticked key times

use marrow_core::{MarrowError, Quat, Result, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One keyframe substream: ascending times (in ticks) with matching values.
/// An empty track is a legal degenerate and samples as the identity
/// contribution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track<T> {
    pub times: Vec<f32>,
    pub values: Vec<T>,
}

impl<T> Track<T> {
    pub fn new(times: Vec<f32>, values: Vec<T>) -> Self {
        Self { times, values }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    fn validate(&self, what: &str, clip: &str) -> Result<()> {
        if self.times.len() != self.values.len() {
            return Err(MarrowError::InvalidClip(format!(
                "clip '{}': {} track has {} times but {} values",
                clip,
                what,
                self.times.len(),
                self.values.len()
            )));
        }
        if self.times.windows(2).any(|w| w[1] < w[0]) {
            return Err(MarrowError::InvalidClip(format!(
                "clip '{}': {} track times are not ascending",
                clip, what
            )));
        }
        Ok(())
    }
}

/// Keyframes of one bone in one clip, split into translation, rotation
/// and scale substreams (any may be empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub bone: usize,
    #[serde(default)]
    pub translation: Track<Vec3>,
    #[serde(default)]
    pub rotation: Track<Quat>,
    #[serde(default)]
    pub scale: Track<Vec3>,
}

impl Channel {
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            translation: Track::default(),
            rotation: Track::default(),
            scale: Track::default(),
        }
    }
}

/// One keyframed animation clip. `duration` and all key times are in ticks;
/// `ticks_per_second` converts to the player's seconds at every boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub name: String,
    pub duration: f32,
    pub ticks_per_second: f32,
    pub channels: Vec<Channel>,
}

impl Clip {
    /// Clip duration in seconds
    pub fn duration_secs(&self) -> f32 {
        self.duration / self.ticks_per_second
    }

    /// The channel animating `bone`, if the clip has one
    pub fn channel_for_bone(&self, bone: usize) -> Option<&Channel> {
        self.channels.iter().find(|c| c.bone == bone)
    }

    fn validate(&self) -> Result<()> {
        if self.duration <= 0.0 {
            return Err(MarrowError::InvalidClip(format!(
                "clip '{}' has non-positive duration: {}",
                self.name, self.duration
            )));
        }
        if self.ticks_per_second <= 0.0 {
            return Err(MarrowError::InvalidClip(format!(
                "clip '{}' has non-positive ticks_per_second: {}",
                self.name, self.ticks_per_second
            )));
        }
        for ch in &self.channels {
            ch.translation.validate("translation", &self.name)?;
            ch.rotation.validate("rotation", &self.name)?;
            ch.scale.validate("scale", &self.name)?;
        }
        Ok(())
    }
}

/// Collection of clips with name → index lookup. Built by an importer,
/// shared immutably with players for their whole lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClipLibrary {
    clips: Vec<Clip>,
    by_name: HashMap<String, usize>,
}

impl ClipLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a clip, returning its index.
    /// A clip with a duplicate name replaces the previous entry's mapping.
    pub fn add(&mut self, clip: Clip) -> Result<usize> {
        clip.validate()?;
        let index = self.clips.len();
        self.by_name.insert(clip.name.clone(), index);
        self.clips.push(clip);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Clip> {
        self.clips.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Clip> {
        self.index_of(name).and_then(|i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_clip() -> Clip {
        Clip {
            name: "walk".into(),
            duration: 10.0,
            ticks_per_second: 10.0,
            channels: vec![Channel {
                bone: 0,
                translation: Track::new(
                    vec![0.0, 10.0],
                    vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)],
                ),
                rotation: Track::default(),
                scale: Track::default(),
            }],
        }
    }

    #[test]
    fn library_lookup_by_name() {
        let mut lib = ClipLibrary::new();
        let idx = lib.add(walk_clip()).unwrap();
        assert_eq!(lib.index_of("walk"), Some(idx));
        assert!(lib.get_by_name("walk").is_some());
        assert_eq!(lib.index_of("run"), None);
    }

    #[test]
    fn add_rejects_non_positive_duration() {
        let mut lib = ClipLibrary::new();
        let mut clip = walk_clip();
        clip.duration = 0.0;
        assert!(lib.add(clip).is_err());
    }

    #[test]
    fn add_rejects_mismatched_track_lengths() {
        let mut lib = ClipLibrary::new();
        let mut clip = walk_clip();
        clip.channels[0].translation.times.push(20.0);
        assert!(lib.add(clip).is_err());
    }

    #[test]
    fn add_rejects_descending_times() {
        let mut lib = ClipLibrary::new();
        let mut clip = walk_clip();
        clip.channels[0].translation = Track::new(
            vec![10.0, 0.0],
            vec![Vec3::ZERO, Vec3::ONE],
        );
        assert!(lib.add(clip).is_err());
    }

    #[test]
    fn duration_secs_uses_ticks_per_second() {
        let clip = walk_clip();
        assert!((clip.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn channel_for_bone_finds_channel() {
        let clip = walk_clip();
        assert!(clip.channel_for_bone(0).is_some());
        assert!(clip.channel_for_bone(1).is_none());
    }
}
