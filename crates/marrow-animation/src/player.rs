//! Per-clip playback state and the pose/skin pipeline
//!
//! The player owns one `PlayState` per library clip plus the three CPU pose
//! buffers (local, model, skin). `advance_time` moves every playing clip's
//! clock; `compute_local_pose` blends all weighted clips into local bone
//! matrices; `compute_model_pose` walks the hierarchy; `upload_skin`
//! produces the matrices a skinning shader consumes.

use crate::sampler::sample_channel;
use marrow_core::{Mat4, Transform};
use marrow_rig::{ClipLibrary, Skeleton};
use std::sync::Arc;

/// Per-clip runtime state. Time is in seconds; conversion to clip ticks
/// happens at every sampler boundary.
#[derive(Debug, Clone)]
pub struct PlayState {
    /// Current playback time in seconds
    pub time: f32,
    /// Blend weight, >= 0; clips at zero weight do not contribute
    pub weight: f32,
    /// Playback speed multiplier (1.0 = normal, negative = reverse)
    pub speed: f32,
    /// Whether the clip wraps at its ends
    pub looping: bool,
    /// Whether the clock advances
    pub playing: bool,
    /// Whole loop boundaries crossed during the most recent advance
    pub(crate) wraps: u32,
}

impl Default for PlayState {
    fn default() -> Self {
        Self {
            time: 0.0,
            weight: 1.0,
            speed: 1.0,
            looping: false,
            playing: false,
            wraps: 0,
        }
    }
}

impl PlayState {
    /// Whole loop boundaries crossed during the most recent advance
    pub fn wraps(&self) -> u32 {
        self.wraps
    }
}

/// What happened to a clock during one advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdvanceOutcome {
    None,
    Looped,
    Finished,
}

/// Advance one play state by `dt` seconds against a clip of `duration`
/// seconds. Returns the outcome and how much of `dt` was actually consumed
/// (less than `dt` only when a non-looping clip hit an end).
///
/// A single advance may span multiple loops; the whole-loop count is
/// recorded in `state.wraps`. `dt` may be negative for reverse scrubbing.
pub(crate) fn advance_state(state: &mut PlayState, duration: f32, dt: f32) -> (AdvanceOutcome, f32) {
    state.wraps = 0;
    if !state.playing || duration <= 0.0 {
        return (AdvanceOutcome::None, dt);
    }

    let start = state.time;
    state.time += state.speed * dt;

    if state.looping {
        if state.time >= duration {
            let n = (state.time / duration).floor();
            state.time -= n * duration;
            state.wraps = n as u32;
        } else if state.time < 0.0 {
            let n = (-state.time / duration).ceil();
            state.time += n * duration;
            state.wraps = n as u32;
            if state.time >= duration {
                state.time -= duration;
            }
        }
        let outcome = if state.wraps > 0 {
            AdvanceOutcome::Looped
        } else {
            AdvanceOutcome::None
        };
        (outcome, dt)
    } else if state.time >= duration {
        state.time = duration;
        state.playing = false;
        let consumed = if state.speed.abs() > f32::EPSILON && dt > 0.0 {
            ((duration - start) / state.speed).clamp(0.0, dt)
        } else {
            dt
        };
        (AdvanceOutcome::Finished, consumed)
    } else if state.time < 0.0 {
        state.time = 0.0;
        state.playing = false;
        let consumed = if state.speed.abs() > f32::EPSILON && dt > 0.0 {
            (-start / state.speed).clamp(0.0, dt)
        } else {
            dt
        };
        (AdvanceOutcome::Finished, consumed)
    } else {
        (AdvanceOutcome::None, dt)
    }
}

/// Playback event delivered through the registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A looping clip crossed at least one loop boundary this advance
    Looped { clip: usize },
    /// A non-looping clip reached an end and stopped
    Finished { clip: usize },
}

type EventCallback = Box<dyn FnMut(PlayerEvent)>;

/// Playback driver: skeleton + library references, per-clip play state,
/// and the CPU pose buffers.
pub struct Player {
    skeleton: Arc<Skeleton>,
    library: Arc<ClipLibrary>,
    states: Vec<PlayState>,
    local_pose: Vec<Mat4>,
    model_pose: Vec<Mat4>,
    skin: Vec<Mat4>,
    callback: Option<EventCallback>,
}

impl Player {
    /// Build a player over a skeleton and clip library. The pose buffers
    /// start at the bind pose.
    pub fn new(skeleton: Arc<Skeleton>, library: Arc<ClipLibrary>) -> Self {
        let bone_count = skeleton.bone_count();
        let mut player = Self {
            states: vec![PlayState::default(); library.len()],
            local_pose: vec![Mat4::IDENTITY; bone_count],
            model_pose: vec![Mat4::IDENTITY; bone_count],
            skin: vec![Mat4::IDENTITY; bone_count],
            skeleton,
            library,
            callback: None,
        };
        player.reset_to_bind();
        player
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn library(&self) -> &Arc<ClipLibrary> {
        &self.library
    }

    pub fn state(&self, clip: usize) -> Option<&PlayState> {
        self.states.get(clip)
    }

    pub fn state_mut(&mut self, clip: usize) -> Option<&mut PlayState> {
        self.states.get_mut(clip)
    }

    pub fn is_playing(&self, clip: usize) -> bool {
        self.states.get(clip).is_some_and(|s| s.playing)
    }

    pub fn play(&mut self, clip: usize) {
        match self.states.get_mut(clip) {
            Some(state) => state.playing = true,
            None => log::warn!("play: clip index {} out of range", clip),
        }
    }

    pub fn pause(&mut self, clip: usize) {
        match self.states.get_mut(clip) {
            Some(state) => state.playing = false,
            None => log::warn!("pause: clip index {} out of range", clip),
        }
    }

    /// Halt playback and rewind to the start
    pub fn stop(&mut self, clip: usize) {
        match self.states.get_mut(clip) {
            Some(state) => {
                state.playing = false;
                state.time = 0.0;
                state.wraps = 0;
            }
            None => log::warn!("stop: clip index {} out of range", clip),
        }
    }

    /// Rewind to the start of travel: time 0 forward, the clip end backward
    pub fn rewind(&mut self, clip: usize) {
        let duration = self.library.get(clip).map(|c| c.duration_secs());
        match (self.states.get_mut(clip), duration) {
            (Some(state), Some(duration)) => {
                state.time = if state.speed < 0.0 { duration } else { 0.0 };
                state.wraps = 0;
            }
            _ => log::warn!("rewind: clip index {} out of range", clip),
        }
    }

    pub fn stop_all(&mut self) {
        for state in &mut self.states {
            state.playing = false;
            state.time = 0.0;
            state.wraps = 0;
        }
    }

    pub fn set_time(&mut self, clip: usize, time: f32) {
        match self.states.get_mut(clip) {
            Some(state) => state.time = time,
            None => log::warn!("set_time: clip index {} out of range", clip),
        }
    }

    pub fn set_weight(&mut self, clip: usize, weight: f32) {
        match self.states.get_mut(clip) {
            Some(state) => state.weight = weight.max(0.0),
            None => log::warn!("set_weight: clip index {} out of range", clip),
        }
    }

    pub fn set_speed(&mut self, clip: usize, speed: f32) {
        match self.states.get_mut(clip) {
            Some(state) => state.speed = speed,
            None => log::warn!("set_speed: clip index {} out of range", clip),
        }
    }

    pub fn set_looping(&mut self, clip: usize, looping: bool) {
        match self.states.get_mut(clip) {
            Some(state) => state.looping = looping,
            None => log::warn!("set_looping: clip index {} out of range", clip),
        }
    }

    /// Register the callback that receives `Looped` / `Finished` events
    pub fn register_event_callback(&mut self, callback: impl FnMut(PlayerEvent) + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Advance every playing clip by `dt` seconds. `dt` may be negative for
    /// reverse scrubbing; a single call may span multiple loops.
    pub fn advance_time(&mut self, dt: f32) {
        let Self {
            states,
            library,
            callback,
            ..
        } = self;
        for (index, state) in states.iter_mut().enumerate() {
            let Some(clip) = library.get(index) else {
                continue;
            };
            let (outcome, _) = advance_state(state, clip.duration_secs(), dt);
            match outcome {
                AdvanceOutcome::Looped => {
                    if let Some(cb) = callback.as_mut() {
                        cb(PlayerEvent::Looped { clip: index });
                    }
                }
                AdvanceOutcome::Finished => {
                    if let Some(cb) = callback.as_mut() {
                        cb(PlayerEvent::Finished { clip: index });
                    }
                }
                AdvanceOutcome::None => {}
            }
        }
    }

    /// Blend every clip with weight > 0 into the local pose, weight-normalised
    /// per bone. Bones no weighted clip animates fall back to the local bind.
    pub fn compute_local_pose(&mut self) {
        let skeleton = Arc::clone(&self.skeleton);
        let library = Arc::clone(&self.library);

        for bone in 0..skeleton.bone_count() {
            let mut acc = Transform::ZERO;
            let mut weight_sum = 0.0_f32;
            for (index, state) in self.states.iter().enumerate() {
                if state.weight <= 0.0 {
                    continue;
                }
                let Some(clip) = library.get(index) else {
                    continue;
                };
                let Some(channel) = clip.channel_for_bone(bone) else {
                    continue;
                };
                let tr = sample_channel(channel, state.time * clip.ticks_per_second);
                acc.accumulate(&tr, state.weight);
                weight_sum += state.weight;
            }
            self.local_pose[bone] = if weight_sum > 0.0 {
                acc.scaled(1.0 / weight_sum)
                    .normalized_rotation()
                    .to_matrix()
            } else {
                skeleton.local_bind()[bone]
            };
        }
    }

    /// Accumulate local poses into model space. Relies on the skeleton's
    /// parent-before-child ordering.
    pub fn compute_model_pose(&mut self) {
        let skeleton = Arc::clone(&self.skeleton);
        for bone in 0..skeleton.bone_count() {
            let parent = match skeleton.bones()[bone].parent {
                Some(p) => self.model_pose[p],
                None => *skeleton.root_bind(),
            };
            self.model_pose[bone] = parent.mul(&self.local_pose[bone]);
        }
    }

    /// Produce the skinning matrices: `model * inverse_bind` per bone
    pub fn upload_skin(&mut self) {
        let skeleton = Arc::clone(&self.skeleton);
        for bone in 0..skeleton.bone_count() {
            self.skin[bone] = self.model_pose[bone].mul(&skeleton.inverse_bind()[bone]);
        }
    }

    /// Restore all three pose buffers to the bind pose
    pub fn reset_to_bind(&mut self) {
        let skeleton = Arc::clone(&self.skeleton);
        self.local_pose.copy_from_slice(skeleton.local_bind());
        self.model_pose.copy_from_slice(skeleton.model_bind());
        self.upload_skin();
    }

    pub fn local_pose(&self) -> &[Mat4] {
        &self.local_pose
    }

    pub fn model_pose(&self) -> &[Mat4] {
        &self.model_pose
    }

    pub fn skin_matrices(&self) -> &[Mat4] {
        &self.skin
    }

    /// The skinning matrices as the byte range a GPU upload consumes
    pub fn skin_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.skin)
    }

    pub(crate) fn set_local_pose(&mut self, bone: usize, matrix: Mat4) {
        if let Some(slot) = self.local_pose.get_mut(bone) {
            *slot = matrix;
        }
    }
}
