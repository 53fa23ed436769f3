//! Tree node variants and their update/eval behaviour
//!
//! Every node is one variant of [`TreeNode`]; the engine matches on the tag
//! in `update` and `eval`. Nodes refer to each other by [`NodeHandle`]
//! (arena index + kind tag), never by pointer.

use crate::player::{advance_state, PlayState};
use crate::sampler::{rest_transforms, sample_channel};
use crate::tree::machine::StateMachineNode;
use crate::tree::{AnimTree, EvalOut, RootMotion};
use marrow_core::{BoneMask, MarrowError, Result, Transform, EPSILON};
use std::sync::Arc;

/// Callback invoked with a bone index and the transform to (optionally)
/// override in place.
pub type BoneCallback = Box<dyn FnMut(usize, &mut Transform)>;

/// Node kind tag; part of every handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Animation,
    Blend2,
    Add2,
    Switch,
    StateMachine,
    Exit,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Animation => "animation",
            NodeKind::Blend2 => "blend2",
            NodeKind::Add2 => "add2",
            NodeKind::Switch => "switch",
            NodeKind::StateMachine => "state machine",
            NodeKind::Exit => "exit",
        }
    }
}

/// Tagged index into the tree's node arena. Identity is stable for the
/// tree's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    pub index: usize,
    pub kind: NodeKind,
}

/// What a node reports back from `update`
#[derive(Debug, Clone, Copy)]
pub struct UpdateInfo {
    /// The node is finished enough for a parent cross-fade to take over
    pub done: bool,
    /// How much of the elapsed time the node actually consumed
    pub consumed: f32,
}

/// Leaf: plays one library clip
pub struct AnimationNode {
    pub clip: usize,
    pub state: PlayState,
    /// Whether a looping clip may report itself done inside the cross-fade
    /// window; when false, a looping clip never hands off
    pub looper: bool,
    /// Root sample from the previous eval; root-motion deltas are measured
    /// against it
    pub(crate) last: Option<Transform>,
    pub(crate) callback: Option<BoneCallback>,
}

/// Normalised two-input blend, optionally gated by a bone mask
pub struct Blend2Node {
    pub input_main: Option<NodeHandle>,
    pub input_blend: Option<NodeHandle>,
    pub weight: f32,
    pub mask: Option<BoneMask>,
}

/// Additive layer: main + weight * add, component-wise
pub struct Add2Node {
    pub input_main: Option<NodeHandle>,
    pub input_add: Option<NodeHandle>,
    pub weight: f32,
    pub mask: Option<BoneMask>,
}

/// N-way input selector with per-input cross-faded weights
pub struct SwitchNode {
    pub(crate) inputs: Vec<Option<NodeHandle>>,
    pub(crate) weights: Vec<f32>,
    pub active: usize,
    /// Leave a newly-activated input running instead of rewinding it, so
    /// phase stays aligned across inputs sharing a period
    pub synced: bool,
    pub xfade: f32,
    pub(crate) inv_weight_sum: f32,
}

/// Sentinel leaf inside a state-machine state: wraps the pose to play on
/// exit and flags the owning machine as done
pub struct ExitNode {
    pub input: Option<NodeHandle>,
}

/// One of the six node kinds
pub enum TreeNode {
    Animation(AnimationNode),
    Blend2(Blend2Node),
    Add2(Add2Node),
    Switch(SwitchNode),
    StateMachine(StateMachineNode),
    Exit(ExitNode),
}

impl TreeNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::Animation(_) => NodeKind::Animation,
            TreeNode::Blend2(_) => NodeKind::Blend2,
            TreeNode::Add2(_) => NodeKind::Add2,
            TreeNode::Switch(_) => NodeKind::Switch,
            TreeNode::StateMachine(_) => NodeKind::StateMachine,
            TreeNode::Exit(_) => NodeKind::Exit,
        }
    }
}

impl AnimTree {
    pub(crate) fn update_animation(
        &mut self,
        node: &mut AnimationNode,
        elapsed: f32,
        xfade: f32,
    ) -> Result<UpdateInfo> {
        let library = Arc::clone(self.player.library());
        let clip = library
            .get(node.clip)
            .ok_or_else(|| MarrowError::ClipNotFound(format!("clip #{}", node.clip)))?;
        let duration = clip.duration_secs();

        let (_, consumed) = advance_state(&mut node.state, duration, elapsed);

        let state = &node.state;
        let in_window = if state.speed >= 0.0 {
            state.time + EPSILON >= duration - xfade
        } else {
            state.time <= xfade + EPSILON
        };
        // A looping clip only hands off from inside the window, and only
        // when the looper flag allows it
        let done = if state.looping {
            node.looper && in_window
        } else {
            in_window
        };

        Ok(UpdateInfo { done, consumed })
    }

    pub(crate) fn eval_animation(
        &mut self,
        node: &mut AnimationNode,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        let library = Arc::clone(self.player.library());
        let clip = library
            .get(node.clip)
            .ok_or_else(|| MarrowError::ClipNotFound(format!("clip #{}", node.clip)))?;
        let ticks = node.state.time * clip.ticks_per_second;

        let channel = clip.channel_for_bone(bone);
        let mut tr = match channel {
            Some(channel) => sample_channel(channel, ticks),
            None => Transform::IDENTITY,
        };
        if let Some(callback) = node.callback.as_mut() {
            callback(bone, &mut tr);
        }

        if !want_rm {
            return Ok((tr, None));
        }

        let rm = match channel {
            Some(channel) => {
                let (mut rest_first, mut rest_last) = rest_transforms(channel);
                if node.state.speed < 0.0 {
                    std::mem::swap(&mut rest_first, &mut rest_last);
                }
                // A freshly reset node has no previous sample; its clock sits
                // on the first key
                let prev = node.last.unwrap_or(rest_first);
                let wraps = node.state.wraps;
                let motion = if wraps == 0 {
                    tr.delta(&prev)
                } else {
                    let per_loop = rest_last.delta(&rest_first);
                    per_loop
                        .scaled((wraps - 1) as f32)
                        .sum(&rest_last.delta(&prev))
                        .sum(&tr.delta(&rest_first))
                        .normalized_rotation()
                };
                RootMotion {
                    motion,
                    distance: tr.delta(&rest_first),
                }
            }
            None => RootMotion::default(),
        };
        node.last = Some(tr);
        Ok((tr, Some(rm)))
    }

    pub(crate) fn update_blend2(
        &mut self,
        node: &mut Blend2Node,
        elapsed: f32,
        xfade: f32,
    ) -> Result<UpdateInfo> {
        let main = node.input_main.ok_or(MarrowError::UnconnectedInput {
            kind: "blend2",
            input: 0,
        })?;
        let blend = node.input_blend.ok_or(MarrowError::UnconnectedInput {
            kind: "blend2",
            input: 1,
        })?;
        let info = self.update_node(main, elapsed, xfade)?;
        self.update_node(blend, elapsed, 0.0)?;
        Ok(info)
    }

    pub(crate) fn eval_blend2(
        &mut self,
        node: &mut Blend2Node,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        let main = node.input_main.ok_or(MarrowError::UnconnectedInput {
            kind: "blend2",
            input: 0,
        })?;
        let (main_tr, main_rm) = self.eval_node(main, bone, want_rm)?;

        // Bones outside the mask take the main input untouched
        if node.mask.as_ref().is_some_and(|m| !m.contains(bone)) {
            return Ok((main_tr, main_rm));
        }

        let blend = node.input_blend.ok_or(MarrowError::UnconnectedInput {
            kind: "blend2",
            input: 1,
        })?;
        let (blend_tr, blend_rm) = self.eval_node(blend, bone, want_rm)?;
        let w = node.weight.clamp(0.0, 1.0);
        let tr = Transform::lerp(&main_tr, &blend_tr, w);
        let rm = match (main_rm, blend_rm) {
            (Some(a), Some(b)) => Some(RootMotion {
                motion: Transform::lerp_components(&a.motion, &b.motion, w),
                distance: Transform::lerp_components(&a.distance, &b.distance, w),
            }),
            (a, b) => a.or(b),
        };
        Ok((tr, rm))
    }

    pub(crate) fn update_add2(
        &mut self,
        node: &mut Add2Node,
        elapsed: f32,
        xfade: f32,
    ) -> Result<UpdateInfo> {
        let main = node.input_main.ok_or(MarrowError::UnconnectedInput {
            kind: "add2",
            input: 0,
        })?;
        let add = node.input_add.ok_or(MarrowError::UnconnectedInput {
            kind: "add2",
            input: 1,
        })?;
        let info = self.update_node(main, elapsed, xfade)?;
        self.update_node(add, elapsed, 0.0)?;
        Ok(info)
    }

    pub(crate) fn eval_add2(
        &mut self,
        node: &mut Add2Node,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        let main = node.input_main.ok_or(MarrowError::UnconnectedInput {
            kind: "add2",
            input: 0,
        })?;
        let (main_tr, main_rm) = self.eval_node(main, bone, want_rm)?;

        if node.mask.as_ref().is_some_and(|m| !m.contains(bone)) {
            return Ok((main_tr, main_rm));
        }

        let add = node.input_add.ok_or(MarrowError::UnconnectedInput {
            kind: "add2",
            input: 1,
        })?;
        let (add_tr, add_rm) = self.eval_node(add, bone, want_rm)?;
        let w = node.weight.clamp(0.0, 1.0);
        let tr = main_tr.add_scaled(&add_tr, w).normalized_rotation();
        let rm = match (main_rm, add_rm) {
            (Some(a), Some(b)) => Some(RootMotion {
                motion: a.motion.sum(&b.motion.scaled(w)),
                distance: a.distance.sum(&b.distance.scaled(w)),
            }),
            (a, b) => a.or(b),
        };
        Ok((tr, rm))
    }

    pub(crate) fn update_switch(
        &mut self,
        node: &mut SwitchNode,
        elapsed: f32,
        xfade: f32,
    ) -> Result<UpdateInfo> {
        // Move weights toward the active input; zero fade time snaps
        if node.xfade <= 0.0 {
            for (i, w) in node.weights.iter_mut().enumerate() {
                *w = if i == node.active { 1.0 } else { 0.0 };
            }
        } else {
            let step = elapsed / node.xfade;
            for (i, w) in node.weights.iter_mut().enumerate() {
                *w = if i == node.active {
                    (*w + step).clamp(0.0, 1.0)
                } else {
                    (*w - step).clamp(0.0, 1.0)
                };
            }
        }

        // Every input updates every frame so synced inputs stay in phase
        let mut out = UpdateInfo {
            done: false,
            consumed: elapsed,
        };
        for (i, slot) in node.inputs.iter().enumerate() {
            let child = slot.ok_or(MarrowError::UnconnectedInput {
                kind: "switch",
                input: i,
            })?;
            let child_xfade = if i == node.active { xfade } else { 0.0 };
            let info = self.update_node(child, elapsed, child_xfade)?;
            if i == node.active {
                out = info;
            }
        }

        // Cache the inverse weight sum so eval is a multiply per input
        let sum: f32 = node.weights.iter().sum();
        if sum <= 0.0 {
            if let Some(active) = node.weights.get_mut(node.active) {
                *active = 1.0;
            }
            node.inv_weight_sum = 1.0;
        } else {
            node.inv_weight_sum = 1.0 / sum;
        }
        Ok(out)
    }

    pub(crate) fn eval_switch(
        &mut self,
        node: &mut SwitchNode,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        let mut acc = Transform::ZERO;
        let mut motion = Transform::ZERO;
        let mut distance = Transform::ZERO;
        let mut any = false;

        for (i, slot) in node.inputs.iter().enumerate() {
            let w = node.weights[i];
            if w <= 0.0 {
                continue;
            }
            let child = slot.ok_or(MarrowError::UnconnectedInput {
                kind: "switch",
                input: i,
            })?;
            let (tr, rm) = self.eval_node(child, bone, want_rm)?;
            let nw = w * node.inv_weight_sum;
            acc.accumulate(&tr, nw);
            if let Some(rm) = rm {
                motion = motion.sum(&rm.motion.scaled(nw));
                distance = distance.sum(&rm.distance.scaled(nw));
            }
            any = true;
        }

        if !any {
            let rm = want_rm.then(RootMotion::default);
            return Ok((Transform::IDENTITY, rm));
        }
        let tr = acc.normalized_rotation();
        let rm = want_rm.then_some(RootMotion { motion, distance });
        Ok((tr, rm))
    }

    pub(crate) fn update_exit(
        &mut self,
        node: &mut ExitNode,
        elapsed: f32,
        xfade: f32,
    ) -> Result<UpdateInfo> {
        let input = node.input.ok_or(MarrowError::UnconnectedInput {
            kind: "exit",
            input: 0,
        })?;
        self.update_node(input, elapsed, xfade)
    }

    pub(crate) fn eval_exit(
        &mut self,
        node: &mut ExitNode,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        let input = node.input.ok_or(MarrowError::UnconnectedInput {
            kind: "exit",
            input: 0,
        })?;
        self.eval_node(input, bone, want_rm)
    }
}
