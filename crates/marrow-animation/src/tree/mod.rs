//! The animation tree: a bounded arena of composition nodes driven by a
//! two-pass traversal
//!
//! `update(dt)` advances every clock in the graph, then `eval` runs once per
//! bone to produce the blended local transform. Failures during either pass
//! abort the whole update atomically: the pose falls back to the skeleton's
//! bind pose and the next update starts fresh.
//!
//! Nodes live in a fixed-capacity arena and refer to each other by
//! [`NodeHandle`]. During recursive descent a node's slot is temporarily
//! vacated; re-entering it mid-recursion is therefore a structural failure,
//! which is exactly what a reference cycle in the graph would do.

pub mod machine;
mod node;

use crate::player::{PlayState, Player};
use machine::{EdgeParams, StateMachineNode};
use marrow_core::{BoneMask, MarrowError, Result, Transform};
use std::sync::Arc;

pub use node::{
    Add2Node, AnimationNode, Blend2Node, BoneCallback, ExitNode, NodeHandle, NodeKind, SwitchNode,
    TreeNode, UpdateInfo,
};

/// Root-bone displacement extracted from one update: `motion` is the delta
/// accumulated during the update (loops included); `distance` is the drift
/// from the clip's rest start, which the tree subtracts from the root bone's
/// local pose so the rig stays in place.
#[derive(Debug, Clone, Copy)]
pub struct RootMotion {
    pub motion: Transform,
    pub distance: Transform,
}

impl Default for RootMotion {
    fn default() -> Self {
        Self {
            motion: Transform::ZERO,
            distance: Transform::ZERO,
        }
    }
}

pub(crate) type EvalOut = (Transform, Option<RootMotion>);

/// The animation graph: owns the player, the node arena, the root handle
/// and the optional root-motion bone designation.
pub struct AnimTree {
    pub(crate) player: Player,
    nodes: Vec<Option<TreeNode>>,
    capacity: usize,
    root: Option<NodeHandle>,
    root_bone: Option<usize>,
    post_eval: Option<BoneCallback>,
}

impl AnimTree {
    /// Build a tree over a player with a fixed node capacity. `root_bone`
    /// designates the bone whose displacement is reported as root motion.
    pub fn new(player: Player, max_nodes: usize, root_bone: Option<usize>) -> Self {
        Self {
            player,
            nodes: Vec::with_capacity(max_nodes),
            capacity: max_nodes,
            root: None,
            root_bone,
            post_eval: None,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn root(&self) -> Option<NodeHandle> {
        self.root
    }

    pub fn root_bone(&self) -> Option<usize> {
        self.root_bone
    }

    pub fn set_root_bone(&mut self, bone: Option<usize>) {
        self.root_bone = bone;
    }

    /// Install the node evaluated as the top of the graph
    pub fn add_root(&mut self, handle: NodeHandle) {
        self.root = Some(handle);
    }

    /// Per-bone callback run after eval, before the local pose is written
    pub fn set_post_eval_callback(&mut self, callback: impl FnMut(usize, &mut Transform) + 'static) {
        self.post_eval = Some(Box::new(callback));
    }

    // ----- node creation -------------------------------------------------

    fn alloc(&mut self, node: TreeNode) -> Result<NodeHandle> {
        if self.nodes.len() >= self.capacity {
            log::warn!("node pool exhausted (capacity {})", self.capacity);
            return Err(MarrowError::PoolExhausted(self.capacity));
        }
        let kind = node.kind();
        let index = self.nodes.len();
        self.nodes.push(Some(node));
        Ok(NodeHandle { index, kind })
    }

    /// Leaf playing the named library clip. The clock starts running.
    pub fn create_animation(&mut self, clip_name: &str) -> Result<NodeHandle> {
        let Some(clip) = self.player.library().index_of(clip_name) else {
            log::warn!("unknown clip name '{}'", clip_name);
            return Err(MarrowError::ClipNotFound(clip_name.to_string()));
        };
        self.alloc(TreeNode::Animation(AnimationNode {
            clip,
            state: PlayState {
                playing: true,
                ..Default::default()
            },
            looper: true,
            last: None,
            callback: None,
        }))
    }

    pub fn create_blend2(&mut self) -> Result<NodeHandle> {
        self.alloc(TreeNode::Blend2(Blend2Node {
            input_main: None,
            input_blend: None,
            weight: 0.0,
            mask: None,
        }))
    }

    pub fn create_add2(&mut self) -> Result<NodeHandle> {
        self.alloc(TreeNode::Add2(Add2Node {
            input_main: None,
            input_add: None,
            weight: 0.0,
            mask: None,
        }))
    }

    /// Switch over `input_count` inputs; input 0 starts active at weight 1
    pub fn create_switch(&mut self, input_count: usize) -> Result<NodeHandle> {
        let mut weights = vec![0.0; input_count];
        if let Some(first) = weights.first_mut() {
            *first = 1.0;
        }
        self.alloc(TreeNode::Switch(SwitchNode {
            inputs: vec![None; input_count],
            weights,
            active: 0,
            synced: false,
            xfade: 0.0,
            inv_weight_sum: 1.0,
        }))
    }

    /// State machine with fixed state/edge capacity. Travel scratch is only
    /// allocated when `enable_travel` is set.
    pub fn create_state_machine(
        &mut self,
        max_states: usize,
        max_edges: usize,
        enable_travel: bool,
    ) -> Result<NodeHandle> {
        self.alloc(TreeNode::StateMachine(StateMachineNode::new(
            max_states,
            max_edges,
            enable_travel,
        )))
    }

    pub fn create_exit(&mut self) -> Result<NodeHandle> {
        self.alloc(TreeNode::Exit(ExitNode { input: None }))
    }

    // ----- graph composition ---------------------------------------------

    /// Connect `child` as `input` of `parent`. Fails when the parent kind
    /// does not accept children or the index is out of range.
    pub fn add_input(&mut self, parent: NodeHandle, child: NodeHandle, input: usize) -> Result<()> {
        self.node_ref(child)?;
        match self.node_mut(parent)? {
            TreeNode::Blend2(blend) => match input {
                0 => {
                    blend.input_main = Some(child);
                    Ok(())
                }
                1 => {
                    blend.input_blend = Some(child);
                    Ok(())
                }
                _ => {
                    log::warn!("blend2 has no input {}", input);
                    Err(MarrowError::InputOutOfRange {
                        kind: "blend2",
                        index: input,
                    })
                }
            },
            TreeNode::Add2(add) => match input {
                0 => {
                    add.input_main = Some(child);
                    Ok(())
                }
                1 => {
                    add.input_add = Some(child);
                    Ok(())
                }
                _ => {
                    log::warn!("add2 has no input {}", input);
                    Err(MarrowError::InputOutOfRange {
                        kind: "add2",
                        index: input,
                    })
                }
            },
            TreeNode::Switch(switch) => {
                if input < switch.inputs.len() {
                    switch.inputs[input] = Some(child);
                    Ok(())
                } else {
                    log::warn!("switch has no input {}", input);
                    Err(MarrowError::InputOutOfRange {
                        kind: "switch",
                        index: input,
                    })
                }
            }
            TreeNode::Exit(exit) => {
                if input == 0 {
                    exit.input = Some(child);
                    Ok(())
                } else {
                    Err(MarrowError::InputOutOfRange {
                        kind: "exit",
                        index: input,
                    })
                }
            }
            TreeNode::Animation(_) => Err(MarrowError::NotAParent("animation")),
            TreeNode::StateMachine(_) => Err(MarrowError::NotAParent("state machine")),
        }
    }

    /// Add a state wrapping `child` to a state machine; returns the state
    /// index. States connect through edges, not `add_input`.
    pub fn create_state(
        &mut self,
        handle: NodeHandle,
        child: NodeHandle,
        max_out_edges: usize,
    ) -> Result<usize> {
        self.node_ref(child)?;
        match self.node_mut(handle)? {
            TreeNode::StateMachine(stm) => stm.add_state(child, max_out_edges),
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::StateMachine.name(),
                got: handle.kind.name(),
            }),
        }
    }

    /// Add a directed edge between two states; returns the edge index
    pub fn create_edge(
        &mut self,
        handle: NodeHandle,
        begin: usize,
        end: usize,
        params: EdgeParams,
    ) -> Result<usize> {
        match self.node_mut(handle)? {
            TreeNode::StateMachine(stm) => stm.add_edge(begin, end, params),
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::StateMachine.name(),
                got: handle.kind.name(),
            }),
        }
    }

    /// Plan a path to `target` along non-off edges and follow it on the
    /// coming updates. With no admissible path the machine snaps to the
    /// target immediately, with no cross-fade.
    pub fn travel_to(&mut self, handle: NodeHandle, target: usize) -> Result<()> {
        let mut taken = self.take_node(handle)?;
        let kind = taken.kind();
        let result = if let TreeNode::StateMachine(stm) = &mut taken {
            self.travel_state_machine(stm, target)
        } else {
            Err(MarrowError::KindMismatch {
                expected: NodeKind::StateMachine.name(),
                got: kind.name(),
            })
        };
        self.nodes[handle.index] = Some(taken);
        result
    }

    // ----- node parameters -----------------------------------------------

    pub fn animation_state(&self, handle: NodeHandle) -> Result<&PlayState> {
        match self.node_ref(handle)? {
            TreeNode::Animation(anim) => Ok(&anim.state),
            _ => Err(self.kind_error(handle, NodeKind::Animation)),
        }
    }

    pub fn animation_state_mut(&mut self, handle: NodeHandle) -> Result<&mut PlayState> {
        match self.node_mut(handle)? {
            TreeNode::Animation(anim) => Ok(&mut anim.state),
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::Animation.name(),
                got: handle.kind.name(),
            }),
        }
    }

    /// Whether a looping clip may report itself done for a parent cross-fade
    pub fn set_animation_looper(&mut self, handle: NodeHandle, looper: bool) -> Result<()> {
        match self.node_mut(handle)? {
            TreeNode::Animation(anim) => {
                anim.looper = looper;
                Ok(())
            }
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::Animation.name(),
                got: handle.kind.name(),
            }),
        }
    }

    /// Per-node override hook, run after sampling each bone
    pub fn set_animation_callback(
        &mut self,
        handle: NodeHandle,
        callback: impl FnMut(usize, &mut Transform) + 'static,
    ) -> Result<()> {
        match self.node_mut(handle)? {
            TreeNode::Animation(anim) => {
                anim.callback = Some(Box::new(callback));
                Ok(())
            }
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::Animation.name(),
                got: handle.kind.name(),
            }),
        }
    }

    pub fn set_blend2_params(
        &mut self,
        handle: NodeHandle,
        weight: f32,
        mask: Option<BoneMask>,
    ) -> Result<()> {
        match self.node_mut(handle)? {
            TreeNode::Blend2(blend) => {
                blend.weight = weight.clamp(0.0, 1.0);
                blend.mask = mask;
                Ok(())
            }
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::Blend2.name(),
                got: handle.kind.name(),
            }),
        }
    }

    pub fn blend2_weight(&self, handle: NodeHandle) -> Result<f32> {
        match self.node_ref(handle)? {
            TreeNode::Blend2(blend) => Ok(blend.weight),
            _ => Err(self.kind_error(handle, NodeKind::Blend2)),
        }
    }

    pub fn set_add2_params(
        &mut self,
        handle: NodeHandle,
        weight: f32,
        mask: Option<BoneMask>,
    ) -> Result<()> {
        match self.node_mut(handle)? {
            TreeNode::Add2(add) => {
                add.weight = weight.clamp(0.0, 1.0);
                add.mask = mask;
                Ok(())
            }
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::Add2.name(),
                got: handle.kind.name(),
            }),
        }
    }

    pub fn add2_weight(&self, handle: NodeHandle) -> Result<f32> {
        match self.node_ref(handle)? {
            TreeNode::Add2(add) => Ok(add.weight),
            _ => Err(self.kind_error(handle, NodeKind::Add2)),
        }
    }

    pub fn set_switch_params(&mut self, handle: NodeHandle, xfade: f32, synced: bool) -> Result<()> {
        match self.node_mut(handle)? {
            TreeNode::Switch(switch) => {
                switch.xfade = xfade.max(0.0);
                switch.synced = synced;
                Ok(())
            }
            _ => Err(MarrowError::KindMismatch {
                expected: NodeKind::Switch.name(),
                got: handle.kind.name(),
            }),
        }
    }

    /// Select the active input. Unless the switch is synced, the
    /// newly-active input's sub-tree is rewound.
    pub fn set_switch_active(&mut self, handle: NodeHandle, input: usize) -> Result<()> {
        let mut taken = self.take_node(handle)?;
        let kind = taken.kind();
        let result = if let TreeNode::Switch(switch) = &mut taken {
            if input >= switch.inputs.len() {
                log::warn!("switch has no input {}", input);
                Err(MarrowError::InputOutOfRange {
                    kind: "switch",
                    index: input,
                })
            } else if input == switch.active {
                Ok(())
            } else {
                switch.active = input;
                if !switch.synced {
                    match switch.inputs[input] {
                        Some(child) => self.reset_node(child),
                        None => Ok(()),
                    }
                } else {
                    Ok(())
                }
            }
        } else {
            Err(MarrowError::KindMismatch {
                expected: NodeKind::Switch.name(),
                got: kind.name(),
            })
        };
        self.nodes[handle.index] = Some(taken);
        result
    }

    pub fn switch_active(&self, handle: NodeHandle) -> Result<usize> {
        match self.node_ref(handle)? {
            TreeNode::Switch(switch) => Ok(switch.active),
            _ => Err(self.kind_error(handle, NodeKind::Switch)),
        }
    }

    pub fn switch_weights(&self, handle: NodeHandle) -> Result<Vec<f32>> {
        match self.node_ref(handle)? {
            TreeNode::Switch(switch) => Ok(switch.weights.clone()),
            _ => Err(self.kind_error(handle, NodeKind::Switch)),
        }
    }

    pub fn state_machine_active(&self, handle: NodeHandle) -> Result<usize> {
        match self.node_ref(handle)? {
            TreeNode::StateMachine(stm) => Ok(stm.active_state()),
            _ => Err(self.kind_error(handle, NodeKind::StateMachine)),
        }
    }

    pub fn state_machine_done(&self, handle: NodeHandle) -> Result<bool> {
        match self.node_ref(handle)? {
            TreeNode::StateMachine(stm) => Ok(stm.done),
            _ => Err(self.kind_error(handle, NodeKind::StateMachine)),
        }
    }

    // ----- per-frame entry points ----------------------------------------

    /// Advance the graph by `dt` seconds and write the blended pose through
    /// to the skinning matrices. On structural failure the pose is the bind
    /// pose and the error is returned.
    pub fn update(&mut self, dt: f32) -> Result<()> {
        self.update_internal(dt, false).map(|_| ())
    }

    /// As [`update`](Self::update), additionally extracting root motion for
    /// the designated root bone. Without a designated bone the report is
    /// zero.
    pub fn update_with_root_motion(&mut self, dt: f32) -> Result<RootMotion> {
        self.update_internal(dt, true)
            .map(Option::unwrap_or_default)
    }

    fn update_internal(&mut self, dt: f32, want_rm: bool) -> Result<Option<RootMotion>> {
        if dt < 0.0 {
            log::warn!("animation tree update called with negative dt {}", dt);
            return Err(MarrowError::NegativeDelta(dt));
        }
        let root = self.root.ok_or(MarrowError::NoRoot)?;
        match self.run_update(root, dt, want_rm) {
            Ok(rm) => Ok(rm),
            Err(err) => {
                log::error!("animation tree update failed: {}; falling back to bind pose", err);
                self.player.reset_to_bind();
                Err(err)
            }
        }
    }

    fn run_update(
        &mut self,
        root: NodeHandle,
        dt: f32,
        want_rm: bool,
    ) -> Result<Option<RootMotion>> {
        self.update_node(root, dt, 0.0)?;

        let skeleton = Arc::clone(self.player.skeleton());
        let mut reported = None;
        for bone in 0..skeleton.bone_count() {
            let want = want_rm && self.root_bone == Some(bone);
            let (mut tr, rm) = self.eval_node(root, bone, want)?;
            if let Some(rm) = rm {
                // Subtract the accumulated drift: the rig stays in place and
                // the caller moves the avatar by the reported motion instead
                tr = tr.delta(&rm.distance);
                reported = Some(rm);
            }
            if let Some(callback) = self.post_eval.as_mut() {
                callback(bone, &mut tr);
            }
            self.player
                .set_local_pose(bone, tr.normalized_rotation().to_matrix());
        }
        self.player.compute_model_pose();
        self.player.upload_skin();
        Ok(reported)
    }

    // ----- traversal internals -------------------------------------------

    fn kind_error(&self, handle: NodeHandle, expected: NodeKind) -> MarrowError {
        MarrowError::KindMismatch {
            expected: expected.name(),
            got: handle.kind.name(),
        }
    }

    fn node_ref(&self, handle: NodeHandle) -> Result<&TreeNode> {
        let node = self
            .nodes
            .get(handle.index)
            .and_then(|slot| slot.as_ref())
            .ok_or(MarrowError::BrokenNode(handle.index))?;
        if node.kind() != handle.kind {
            return Err(MarrowError::KindMismatch {
                expected: handle.kind.name(),
                got: node.kind().name(),
            });
        }
        Ok(node)
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut TreeNode> {
        let node = self
            .nodes
            .get_mut(handle.index)
            .and_then(|slot| slot.as_mut())
            .ok_or(MarrowError::BrokenNode(handle.index))?;
        if node.kind() != handle.kind {
            return Err(MarrowError::KindMismatch {
                expected: handle.kind.name(),
                got: node.kind().name(),
            });
        }
        Ok(node)
    }

    /// Vacate a node's slot for the duration of a recursive visit. A handle
    /// that resolves to an already-vacated slot is a node re-entered during
    /// its own descent: a graph cycle.
    fn take_node(&mut self, handle: NodeHandle) -> Result<TreeNode> {
        let slot = self
            .nodes
            .get_mut(handle.index)
            .ok_or(MarrowError::BrokenNode(handle.index))?;
        let node = slot.take().ok_or(MarrowError::BrokenNode(handle.index))?;
        if node.kind() != handle.kind {
            let got = node.kind();
            self.nodes[handle.index] = Some(node);
            return Err(MarrowError::KindMismatch {
                expected: handle.kind.name(),
                got: got.name(),
            });
        }
        Ok(node)
    }

    pub(crate) fn update_node(
        &mut self,
        handle: NodeHandle,
        elapsed: f32,
        xfade: f32,
    ) -> Result<UpdateInfo> {
        let mut taken = self.take_node(handle)?;
        let result = match &mut taken {
            TreeNode::Animation(n) => self.update_animation(n, elapsed, xfade),
            TreeNode::Blend2(n) => self.update_blend2(n, elapsed, xfade),
            TreeNode::Add2(n) => self.update_add2(n, elapsed, xfade),
            TreeNode::Switch(n) => self.update_switch(n, elapsed, xfade),
            TreeNode::StateMachine(n) => self.update_state_machine(n, elapsed, xfade),
            TreeNode::Exit(n) => self.update_exit(n, elapsed, xfade),
        };
        self.nodes[handle.index] = Some(taken);
        result
    }

    pub(crate) fn eval_node(
        &mut self,
        handle: NodeHandle,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        let mut taken = self.take_node(handle)?;
        let result = match &mut taken {
            TreeNode::Animation(n) => self.eval_animation(n, bone, want_rm),
            TreeNode::Blend2(n) => self.eval_blend2(n, bone, want_rm),
            TreeNode::Add2(n) => self.eval_add2(n, bone, want_rm),
            TreeNode::Switch(n) => self.eval_switch(n, bone, want_rm),
            TreeNode::StateMachine(n) => self.eval_state_machine(n, bone, want_rm),
            TreeNode::Exit(n) => self.eval_exit(n, bone, want_rm),
        };
        self.nodes[handle.index] = Some(taken);
        result
    }

    /// Rewind a sub-tree's clocks and transient blend state
    pub(crate) fn reset_node(&mut self, handle: NodeHandle) -> Result<()> {
        let mut taken = self.take_node(handle)?;
        let result = match &mut taken {
            TreeNode::Animation(anim) => {
                let library = Arc::clone(self.player.library());
                let duration = library
                    .get(anim.clip)
                    .map(|c| c.duration_secs())
                    .unwrap_or(0.0);
                anim.state.time = if anim.state.speed < 0.0 { duration } else { 0.0 };
                anim.state.wraps = 0;
                anim.state.playing = true;
                anim.last = None;
                Ok(())
            }
            TreeNode::Blend2(blend) => {
                if let Some(main) = blend.input_main {
                    self.reset_node(main)?;
                }
                if let Some(other) = blend.input_blend {
                    self.reset_node(other)?;
                }
                Ok(())
            }
            TreeNode::Add2(add) => {
                if let Some(main) = add.input_main {
                    self.reset_node(main)?;
                }
                if let Some(other) = add.input_add {
                    self.reset_node(other)?;
                }
                Ok(())
            }
            TreeNode::Switch(switch) => {
                for (i, weight) in switch.weights.iter_mut().enumerate() {
                    *weight = if i == switch.active { 1.0 } else { 0.0 };
                }
                switch.inv_weight_sum = 1.0;
                for slot in &switch.inputs {
                    if let Some(child) = slot {
                        self.reset_node(*child)?;
                    }
                }
                Ok(())
            }
            TreeNode::StateMachine(stm) => self.reset_state_machine(stm),
            TreeNode::Exit(exit) => match exit.input {
                Some(child) => self.reset_node(child),
                None => Ok(()),
            },
        };
        self.nodes[handle.index] = Some(taken);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::machine::{EdgeMode, EdgeStatus};
    use super::*;
    use marrow_core::{Mat4, Vec3};
    use marrow_rig::{Bone, Channel, Clip, ClipLibrary, Skeleton, Track};

    fn chain_skeleton(count: usize) -> Arc<Skeleton> {
        let bones = (0..count)
            .map(|i| Bone {
                name: format!("bone{}", i),
                parent: if i == 0 { None } else { Some(i - 1) },
            })
            .collect();
        Arc::new(
            Skeleton::new(
                bones,
                vec![Mat4::IDENTITY; count],
                vec![Mat4::IDENTITY; count],
                vec![Mat4::IDENTITY; count],
                Mat4::IDENTITY,
            )
            .unwrap(),
        )
    }

    /// Clip whose listed bones hold a constant translation
    fn const_clip(name: &str, duration: f32, bones: &[(usize, Vec3)]) -> Clip {
        Clip {
            name: name.into(),
            duration,
            ticks_per_second: 1.0,
            channels: bones
                .iter()
                .map(|(bone, v)| Channel {
                    bone: *bone,
                    translation: Track::new(vec![0.0, duration], vec![*v, *v]),
                    rotation: Track::default(),
                    scale: Track::default(),
                })
                .collect(),
        }
    }

    fn build_tree(
        bones: usize,
        clips: Vec<Clip>,
        max_nodes: usize,
        root_bone: Option<usize>,
    ) -> AnimTree {
        let mut library = ClipLibrary::new();
        for clip in clips {
            library.add(clip).unwrap();
        }
        let player = Player::new(chain_skeleton(bones), Arc::new(library));
        AnimTree::new(player, max_nodes, root_bone)
    }

    fn x(v: f32) -> Vec3 {
        Vec3::new(v, 0.0, 0.0)
    }

    #[test]
    fn switch_crossfade_weights_match_schedule() {
        let mut tree = build_tree(
            1,
            vec![
                const_clip("idle", 1.0, &[(0, Vec3::ZERO)]),
                const_clip("walk", 1.0, &[(0, x(1.0))]),
            ],
            8,
            None,
        );
        let idle = tree.create_animation("idle").unwrap();
        let walk = tree.create_animation("walk").unwrap();
        tree.animation_state_mut(idle).unwrap().looping = true;
        tree.animation_state_mut(walk).unwrap().looping = true;
        let switch = tree.create_switch(2).unwrap();
        tree.add_input(switch, idle, 0).unwrap();
        tree.add_input(switch, walk, 1).unwrap();
        tree.set_switch_params(switch, 0.5, false).unwrap();
        tree.add_root(switch);

        for _ in 0..5 {
            tree.update(0.1).unwrap();
        }
        assert_eq!(tree.switch_weights(switch).unwrap(), vec![1.0, 0.0]);

        tree.set_switch_active(switch, 1).unwrap();
        for step in 1..=5 {
            tree.update(0.1).unwrap();
            let w = tree.switch_weights(switch).unwrap();
            assert!(
                (w[0] + w[1] - 1.0).abs() < 1e-5,
                "weight sum drifted at step {}: {:?}",
                step,
                w
            );
            if step == 2 {
                assert!((w[0] - 0.6).abs() < 1e-5);
                assert!((w[1] - 0.4).abs() < 1e-5);
            }
        }
        let w = tree.switch_weights(switch).unwrap();
        assert!(w[0].abs() < 1e-5);
        assert!((w[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_fade_switch_snaps_on_first_update() {
        let mut tree = build_tree(
            1,
            vec![
                const_clip("a", 1.0, &[(0, Vec3::ZERO)]),
                const_clip("b", 1.0, &[(0, x(1.0))]),
            ],
            8,
            None,
        );
        let a = tree.create_animation("a").unwrap();
        let b = tree.create_animation("b").unwrap();
        let switch = tree.create_switch(2).unwrap();
        tree.add_input(switch, a, 0).unwrap();
        tree.add_input(switch, b, 1).unwrap();
        tree.add_root(switch);
        tree.update(0.1).unwrap();
        tree.set_switch_active(switch, 1).unwrap();
        tree.update(0.1).unwrap();
        assert_eq!(tree.switch_weights(switch).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn switch_reset_rewinds_unsynced_input() {
        let mut tree = build_tree(
            1,
            vec![
                const_clip("a", 1.0, &[(0, Vec3::ZERO)]),
                const_clip("b", 1.0, &[(0, x(1.0))]),
            ],
            8,
            None,
        );
        let a = tree.create_animation("a").unwrap();
        let b = tree.create_animation("b").unwrap();
        tree.animation_state_mut(a).unwrap().looping = true;
        tree.animation_state_mut(b).unwrap().looping = true;
        let switch = tree.create_switch(2).unwrap();
        tree.add_input(switch, a, 0).unwrap();
        tree.add_input(switch, b, 1).unwrap();
        tree.add_root(switch);

        // Both inputs advance even while b's weight is zero
        tree.update(0.4).unwrap();
        assert!((tree.animation_state(b).unwrap().time - 0.4).abs() < 1e-5);

        // Unsynced activation rewinds the incoming input
        tree.set_switch_active(switch, 1).unwrap();
        assert_eq!(tree.animation_state(b).unwrap().time, 0.0);

        // Synced activation leaves the clock alone
        tree.set_switch_params(switch, 0.0, true).unwrap();
        tree.update(0.3).unwrap();
        tree.set_switch_active(switch, 0).unwrap();
        assert!((tree.animation_state(a).unwrap().time - 0.7).abs() < 1e-5);
    }

    #[test]
    fn blend_mask_gates_secondary_input() {
        let main_clip = const_clip(
            "base",
            1.0,
            &[(0, x(0.0)), (1, x(1.0)), (2, x(2.0)), (3, x(3.0))],
        );
        let over_clip = const_clip(
            "over",
            1.0,
            &[(0, x(10.0)), (1, x(11.0)), (2, x(12.0)), (3, x(13.0))],
        );
        let mut tree = build_tree(4, vec![main_clip, over_clip], 8, None);
        let base = tree.create_animation("base").unwrap();
        let over = tree.create_animation("over").unwrap();
        let blend = tree.create_blend2().unwrap();
        tree.add_input(blend, base, 0).unwrap();
        tree.add_input(blend, over, 1).unwrap();
        let mask = tree
            .player()
            .skeleton()
            .compute_bone_mask(&["bone1", "bone3"])
            .unwrap();
        tree.set_blend2_params(blend, 0.25, Some(mask)).unwrap();
        tree.add_root(blend);

        tree.update(0.1).unwrap();
        let pose = tree.player().local_pose();
        // Outside the mask the main input passes through untouched
        assert!((pose[0].translation().x - 0.0).abs() < 1e-5);
        assert!((pose[2].translation().x - 2.0).abs() < 1e-5);
        // Inside the mask: lerp(main, blend, 0.25)
        assert!((pose[1].translation().x - 3.5).abs() < 1e-4);
        assert!((pose[3].translation().x - 5.5).abs() < 1e-4);
    }

    #[test]
    fn add2_layers_weighted_delta() {
        let base = const_clip("base", 1.0, &[(0, x(1.0))]);
        let layer = const_clip("layer", 1.0, &[(0, x(4.0))]);
        let mut tree = build_tree(1, vec![base, layer], 8, None);
        let main = tree.create_animation("base").unwrap();
        let add = tree.create_animation("layer").unwrap();
        let add2 = tree.create_add2().unwrap();
        tree.add_input(add2, main, 0).unwrap();
        tree.add_input(add2, add, 1).unwrap();
        tree.set_add2_params(add2, 0.5, None).unwrap();
        tree.add_root(add2);

        tree.update(0.1).unwrap();
        // 1 + 0.5 * 4
        assert!((tree.player().local_pose()[0].translation().x - 3.0).abs() < 1e-4);
    }

    #[test]
    fn state_machine_chains_transitions_in_one_update() {
        let clips = vec![
            const_clip("a", 0.1, &[(0, x(1.0))]),
            const_clip("b", 0.1, &[(0, x(2.0))]),
            const_clip("c", 0.1, &[(0, x(3.0))]),
            const_clip("d", 0.1, &[(0, x(4.0))]),
        ];
        let mut tree = build_tree(1, clips, 16, None);
        let a = tree.create_animation("a").unwrap();
        let b = tree.create_animation("b").unwrap();
        let c = tree.create_animation("c").unwrap();
        let d = tree.create_animation("d").unwrap();
        let exit = tree.create_exit().unwrap();
        tree.add_input(exit, d, 0).unwrap();

        let stm = tree.create_state_machine(4, 4, false).unwrap();
        let sa = tree.create_state(stm, a, 2).unwrap();
        let sb = tree.create_state(stm, b, 2).unwrap();
        let sc = tree.create_state(stm, c, 2).unwrap();
        let sd = tree.create_state(stm, exit, 2).unwrap();
        let auto = |mode| EdgeParams {
            mode,
            status: EdgeStatus::Auto,
            next_status: EdgeStatus::Auto,
            xfade: 0.0,
        };
        tree.create_edge(stm, sa, sb, auto(EdgeMode::OnDone)).unwrap();
        tree.create_edge(stm, sb, sc, auto(EdgeMode::Instant)).unwrap();
        tree.create_edge(stm, sc, sd, auto(EdgeMode::OnDone)).unwrap();
        tree.add_root(stm);

        tree.update(0.35).unwrap();
        // Three transitions traversed in a single update
        assert_eq!(tree.state_machine_active(stm).unwrap(), sd);
        assert!(tree.state_machine_done(stm).unwrap());
        // The exit clip received exactly the leftover budget
        assert!((tree.animation_state(d).unwrap().time - 0.1).abs() < 1e-5);
    }

    #[test]
    fn looped_root_motion_accumulates_across_wraps() {
        let stride = Clip {
            name: "stride".into(),
            duration: 1.0,
            ticks_per_second: 1.0,
            channels: vec![Channel {
                bone: 0,
                translation: Track::new(vec![0.0, 1.0], vec![Vec3::ZERO, x(1.0)]),
                rotation: Track::default(),
                scale: Track::default(),
            }],
        };
        let mut tree = build_tree(1, vec![stride], 4, Some(0));
        let anim = tree.create_animation("stride").unwrap();
        tree.animation_state_mut(anim).unwrap().looping = true;
        tree.add_root(anim);

        let rm = tree.update_with_root_motion(2.5).unwrap();
        assert!((rm.motion.translation.x - 2.5).abs() < 1e-4);
        assert!((rm.distance.translation.x - 0.5).abs() < 1e-4);
        // The rig stays at the origin; the caller moves the avatar
        assert!(tree.player().local_pose()[0].translation().x.abs() < 1e-4);
    }

    #[test]
    fn single_loop_motion_is_stride_independent_of_phase() {
        let stride = Clip {
            name: "stride".into(),
            duration: 1.0,
            ticks_per_second: 1.0,
            channels: vec![Channel {
                bone: 0,
                translation: Track::new(vec![0.0, 1.0], vec![Vec3::ZERO, x(1.0)]),
                rotation: Track::default(),
                scale: Track::default(),
            }],
        };
        let mut tree = build_tree(1, vec![stride], 4, Some(0));
        let anim = tree.create_animation("stride").unwrap();
        tree.animation_state_mut(anim).unwrap().looping = true;
        tree.add_root(anim);

        // Move to an arbitrary phase, then span exactly one loop
        tree.update_with_root_motion(0.3).unwrap();
        let rm = tree.update_with_root_motion(1.0).unwrap();
        assert!((rm.motion.translation.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn self_edge_cycle_fails_update_and_restores_bind() {
        let mut tree = build_tree(2, vec![const_clip("a", 0.1, &[(0, x(5.0))])], 8, None);
        let a = tree.create_animation("a").unwrap();
        let stm = tree.create_state_machine(2, 2, false).unwrap();
        let sa = tree.create_state(stm, a, 1).unwrap();
        tree.create_edge(stm, sa, sa, EdgeParams::default()).unwrap();
        tree.add_root(stm);

        let err = tree.update(0.016).unwrap_err();
        assert!(matches!(err, MarrowError::StateMachineCycle(_)));
        // Pose and skin fall back to bind (identity here)
        assert_eq!(tree.player().local_pose()[0], Mat4::IDENTITY);
        assert_eq!(tree.player().skin_matrices()[0], Mat4::IDENTITY);

        // The next update starts fresh and fails the same way, not worse
        assert!(tree.update(0.016).is_err());
    }

    #[test]
    fn travel_with_no_admissible_path_snaps() {
        let clips = vec![
            const_clip("a", 0.1, &[(0, x(1.0))]),
            const_clip("b", 0.1, &[(0, x(2.0))]),
            const_clip("c", 0.1, &[(0, x(3.0))]),
        ];
        let mut tree = build_tree(1, clips, 8, None);
        let a = tree.create_animation("a").unwrap();
        let b = tree.create_animation("b").unwrap();
        let c = tree.create_animation("c").unwrap();
        let stm = tree.create_state_machine(3, 3, true).unwrap();
        let sa = tree.create_state(stm, a, 1).unwrap();
        let _sb = tree.create_state(stm, b, 1).unwrap();
        let sc = tree.create_state(stm, c, 1).unwrap();
        tree.create_edge(
            stm,
            sa,
            sc,
            EdgeParams {
                status: EdgeStatus::Off,
                ..Default::default()
            },
        )
        .unwrap();
        tree.add_root(stm);
        tree.update(0.05).unwrap();

        // The only edge toward the target is off: force-snap, no error
        tree.travel_to(stm, sc).unwrap();
        assert_eq!(tree.state_machine_active(stm).unwrap(), sc);
        assert_eq!(tree.animation_state(c).unwrap().time, 0.0);

        // Runs from the target with no cross-fade
        tree.update(0.05).unwrap();
        assert!((tree.animation_state(c).unwrap().time - 0.05).abs() < 1e-6);
        assert!((tree.player().local_pose()[0].translation().x - 3.0).abs() < 1e-4);
    }

    #[test]
    fn travel_to_active_state_is_noop() {
        let mut tree = build_tree(1, vec![const_clip("a", 0.1, &[(0, x(1.0))])], 8, None);
        let a = tree.create_animation("a").unwrap();
        let stm = tree.create_state_machine(2, 2, true).unwrap();
        let sa = tree.create_state(stm, a, 1).unwrap();
        tree.add_root(stm);
        tree.travel_to(stm, sa).unwrap();
        assert_eq!(tree.state_machine_active(stm).unwrap(), sa);
    }

    #[test]
    fn pool_exhaustion_fails_creation() {
        let mut tree = build_tree(1, vec![const_clip("a", 1.0, &[(0, x(1.0))])], 2, None);
        tree.create_animation("a").unwrap();
        tree.create_animation("a").unwrap();
        let err = tree.create_animation("a").unwrap_err();
        assert!(matches!(err, MarrowError::PoolExhausted(2)));
    }

    #[test]
    fn unknown_clip_name_fails_creation() {
        let mut tree = build_tree(1, vec![const_clip("a", 1.0, &[(0, x(1.0))])], 4, None);
        assert!(matches!(
            tree.create_animation("missing"),
            Err(MarrowError::ClipNotFound(_))
        ));
    }

    #[test]
    fn add_input_validates_parent_and_index() {
        let mut tree = build_tree(1, vec![const_clip("a", 1.0, &[(0, x(1.0))])], 8, None);
        let a = tree.create_animation("a").unwrap();
        let b = tree.create_animation("a").unwrap();
        let blend = tree.create_blend2().unwrap();
        assert!(matches!(
            tree.add_input(blend, a, 2),
            Err(MarrowError::InputOutOfRange { .. })
        ));
        assert!(matches!(
            tree.add_input(a, b, 0),
            Err(MarrowError::NotAParent(_))
        ));
    }

    #[test]
    fn negative_dt_is_rejected() {
        let mut tree = build_tree(1, vec![const_clip("a", 1.0, &[(0, x(1.0))])], 4, None);
        let a = tree.create_animation("a").unwrap();
        tree.add_root(a);
        assert!(matches!(
            tree.update(-0.1),
            Err(MarrowError::NegativeDelta(_))
        ));
    }

    #[test]
    fn post_eval_callback_overrides_pose() {
        let mut tree = build_tree(1, vec![const_clip("a", 1.0, &[(0, x(1.0))])], 4, None);
        let a = tree.create_animation("a").unwrap();
        tree.add_root(a);
        tree.set_post_eval_callback(|_bone, tr| {
            tr.translation.y = 7.0;
        });
        tree.update(0.1).unwrap();
        assert!((tree.player().local_pose()[0].translation().y - 7.0).abs() < 1e-5);
    }

    #[test]
    fn animation_eval_callback_overrides_sample() {
        let mut tree = build_tree(1, vec![const_clip("a", 1.0, &[(0, x(1.0))])], 4, None);
        let a = tree.create_animation("a").unwrap();
        tree.set_animation_callback(a, |_bone, tr| {
            tr.translation.x = 9.0;
        })
        .unwrap();
        tree.add_root(a);
        tree.update(0.1).unwrap();
        assert!((tree.player().local_pose()[0].translation().x - 9.0).abs() < 1e-5);
    }
}
