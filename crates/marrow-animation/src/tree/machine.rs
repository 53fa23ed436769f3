//! State-machine node: states, directed edges, transition cascades and
//! travel-by-path-finding
//!
//! Each state wraps a child node; edges carry a cross-fade window and a
//! trigger mode. One `update` may traverse several edges when the elapsed
//! budget outlives each transition; a state re-entered with an unchanged
//! budget is a cycle and fails the whole update.

use crate::tree::node::{NodeHandle, NodeKind, UpdateInfo};
use crate::tree::{AnimTree, EvalOut, RootMotion};
use marrow_core::{approx_eq, MarrowError, Result, Transform, EPSILON};
use serde::{Deserialize, Serialize};

/// When a pending edge actually fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeMode {
    /// As soon as the active state's incoming cross-fade has completed
    Instant,
    /// Once the begin state's child also reports itself done
    OnDone,
}

/// Whether an edge may be traversed, and by whom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeStatus {
    /// Only traversable as part of an explicit travel path
    On,
    /// Traversable automatically and by travel
    Auto,
    /// As `Auto`, but the status decays to `next_status` after one traversal
    Once,
    /// Never traversable
    Off,
}

/// Construction parameters for an edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeParams {
    pub mode: EdgeMode,
    pub status: EdgeStatus,
    /// Status installed after a `Once` edge is traversed
    pub next_status: EdgeStatus,
    /// Cross-fade window in seconds; zero snaps on the next update
    pub xfade: f32,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            mode: EdgeMode::Instant,
            status: EdgeStatus::Auto,
            next_status: EdgeStatus::Off,
            xfade: 0.0,
        }
    }
}

/// A directed transition between two states
pub struct StmEdge {
    pub begin: usize,
    pub end: usize,
    /// Cross-fade progress into the end state, monotone 0 → 1
    pub end_weight: f32,
    pub mode: EdgeMode,
    pub status: EdgeStatus,
    pub next_status: EdgeStatus,
    pub xfade: f32,
}

/// One state: a wrapped child node plus its outgoing edges
pub struct StmState {
    pub child: NodeHandle,
    pub(crate) out_edges: Vec<usize>,
    pub(crate) out_capacity: usize,
    /// Edge currently fading this state in, if any
    pub(crate) active_in: Option<usize>,
}

/// The state-machine node body
pub struct StateMachineNode {
    pub(crate) states: Vec<StmState>,
    pub(crate) edges: Vec<StmEdge>,
    pub(crate) active: usize,
    pub(crate) done: bool,
    max_states: usize,
    max_edges: usize,
    /// Per-update scratch: remaining budget at first visit of each state
    visited: Vec<Option<f32>>,
    /// Installed travel plan: ordered edge list and a cursor into it
    path_edges: Vec<usize>,
    path_idx: usize,
    travel_enabled: bool,
    // Travel scratch, allocated once at construction
    bfs_queue: Vec<usize>,
    bfs_prev: Vec<Option<usize>>,
    bfs_seen: Vec<bool>,
}

impl StateMachineNode {
    pub(crate) fn new(max_states: usize, max_edges: usize, travel_enabled: bool) -> Self {
        Self {
            states: Vec::with_capacity(max_states),
            edges: Vec::with_capacity(max_edges),
            active: 0,
            done: false,
            max_states,
            max_edges,
            visited: vec![None; max_states],
            path_edges: Vec::with_capacity(max_states),
            path_idx: 0,
            travel_enabled,
            bfs_queue: if travel_enabled {
                Vec::with_capacity(max_states)
            } else {
                Vec::new()
            },
            bfs_prev: if travel_enabled {
                vec![None; max_states]
            } else {
                Vec::new()
            },
            bfs_seen: if travel_enabled {
                vec![false; max_states]
            } else {
                Vec::new()
            },
        }
    }

    pub fn active_state(&self) -> usize {
        self.active
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, index: usize) -> Option<&StmEdge> {
        self.edges.get(index)
    }

    pub(crate) fn add_state(&mut self, child: NodeHandle, max_out_edges: usize) -> Result<usize> {
        if self.states.len() >= self.max_states {
            log::warn!("state machine state list full (capacity {})", self.max_states);
            return Err(MarrowError::StateListFull(self.max_states));
        }
        let index = self.states.len();
        self.states.push(StmState {
            child,
            out_edges: Vec::with_capacity(max_out_edges),
            out_capacity: max_out_edges,
            active_in: None,
        });
        Ok(index)
    }

    pub(crate) fn add_edge(&mut self, begin: usize, end: usize, params: EdgeParams) -> Result<usize> {
        if self.edges.len() >= self.max_edges {
            log::warn!("state machine edge list full (capacity {})", self.max_edges);
            return Err(MarrowError::EdgeListFull(self.max_edges));
        }
        if begin >= self.states.len() || end >= self.states.len() {
            return Err(MarrowError::StateMachine(format!(
                "edge endpoints {} -> {} out of range ({} states)",
                begin,
                end,
                self.states.len()
            )));
        }
        let state = &mut self.states[begin];
        if state.out_edges.len() >= state.out_capacity {
            log::warn!(
                "state {} out-edge list full (capacity {})",
                begin,
                state.out_capacity
            );
            return Err(MarrowError::EdgeListFull(state.out_capacity));
        }
        let index = self.edges.len();
        self.edges.push(StmEdge {
            begin,
            end,
            end_weight: 0.0,
            mode: params.mode,
            status: params.status,
            next_status: params.next_status,
            xfade: params.xfade,
        });
        state.out_edges.push(index);
        Ok(index)
    }

    pub(crate) fn clear_path(&mut self) {
        self.path_edges.clear();
        self.path_idx = 0;
    }

    /// The candidate edge for leaving the active state: the next planned
    /// edge when a travel path is installed, otherwise the first outgoing
    /// edge that traverses automatically.
    fn next_edge(&mut self) -> Option<usize> {
        if self.path_idx < self.path_edges.len() {
            let edge = self.path_edges[self.path_idx];
            if self.edges[edge].begin == self.active {
                return Some(edge);
            }
            // The machine left the planned route; drop the plan
            self.clear_path();
        }
        self.states[self.active]
            .out_edges
            .iter()
            .copied()
            .find(|&e| matches!(self.edges[e].status, EdgeStatus::Auto | EdgeStatus::Once))
    }

    /// Breadth-first search from the active state over non-`Off` edges.
    /// On success the shortest edge path is installed as the travel plan.
    fn find_path(&mut self, target: usize) -> bool {
        let StateMachineNode {
            states,
            edges,
            active,
            path_edges,
            path_idx,
            bfs_queue,
            bfs_prev,
            bfs_seen,
            ..
        } = self;

        for seen in bfs_seen.iter_mut() {
            *seen = false;
        }
        for prev in bfs_prev.iter_mut() {
            *prev = None;
        }
        bfs_queue.clear();
        bfs_queue.push(*active);
        bfs_seen[*active] = true;

        let mut head = 0;
        let mut found = false;
        while head < bfs_queue.len() {
            let state = bfs_queue[head];
            head += 1;
            if state == target {
                found = true;
                break;
            }
            for &edge in &states[state].out_edges {
                if matches!(edges[edge].status, EdgeStatus::Off) {
                    continue;
                }
                let end = edges[edge].end;
                if !bfs_seen[end] {
                    bfs_seen[end] = true;
                    bfs_prev[end] = Some(edge);
                    bfs_queue.push(end);
                }
            }
        }
        if !found {
            return false;
        }

        // Walk predecessor edges back from the target, then reverse
        path_edges.clear();
        let mut cursor = target;
        while cursor != *active {
            let Some(edge) = bfs_prev[cursor] else {
                path_edges.clear();
                return false;
            };
            path_edges.push(edge);
            cursor = edges[edge].begin;
        }
        path_edges.reverse();
        *path_idx = 0;
        true
    }
}

impl AnimTree {
    pub(crate) fn update_state_machine(
        &mut self,
        stm: &mut StateMachineNode,
        elapsed: f32,
        _xfade: f32,
    ) -> Result<UpdateInfo> {
        for visit in stm.visited.iter_mut() {
            *visit = None;
        }
        if stm.states.is_empty() {
            return Ok(UpdateInfo {
                done: false,
                consumed: elapsed,
            });
        }

        let mut remaining = elapsed;
        loop {
            let active = stm.active;

            // Re-entering a state with the same remaining budget means no
            // transition can ever consume time: a zero-cost loop
            if let Some(prior) = stm.visited[active] {
                if approx_eq(prior, remaining) {
                    return Err(MarrowError::StateMachineCycle(active));
                }
            }
            stm.visited[active] = Some(remaining);

            // Advance the incoming cross-fade, if one is in flight
            let mut fade_consumed = 0.0_f32;
            let mut edge_done = true;
            if let Some(edge_idx) = stm.states[active].active_in {
                let edge = &mut stm.edges[edge_idx];
                if edge.xfade <= 0.0 {
                    // Zero cross-fade snaps on the first update that sees it
                    edge.end_weight = 1.0;
                    stm.states[active].active_in = None;
                } else {
                    let increment = remaining / edge.xfade;
                    let advanced = edge.end_weight + increment;
                    if advanced + EPSILON >= 1.0 {
                        // Completed this frame; the overshoot is budget the
                        // next transition may still use
                        let overshoot = advanced - 1.0;
                        fade_consumed = if increment > 0.0 {
                            remaining * (1.0 - overshoot / increment)
                        } else {
                            0.0
                        };
                        edge.end_weight = 1.0;
                        stm.states[active].active_in = None;
                    } else {
                        edge.end_weight = advanced;
                        fade_consumed = remaining;
                        edge_done = false;
                    }
                }
            }

            // Candidate edge out of this state; its window is what the child
            // measures "done" against
            let candidate = stm.next_edge();
            let child_xfade = candidate.map_or(0.0, |e| stm.edges[e].xfade);

            let child = stm.states[active].child;
            let child_info = self.update_node(child, remaining, child_xfade)?;
            let node_done = edge_done && child_info.done;

            let mut consumed = remaining;
            let mut transitioned = false;
            if let Some(edge_idx) = candidate {
                let fired = match stm.edges[edge_idx].mode {
                    EdgeMode::Instant => edge_done,
                    EdgeMode::OnDone => node_done,
                };
                if fired {
                    consumed = match stm.edges[edge_idx].mode {
                        EdgeMode::Instant => fade_consumed,
                        EdgeMode::OnDone => fade_consumed.max(child_info.consumed),
                    };

                    let edge = &mut stm.edges[edge_idx];
                    let end = edge.end;
                    edge.end_weight = 0.0;
                    if edge.status == EdgeStatus::Once {
                        edge.status = edge.next_status;
                    }
                    stm.states[end].active_in = Some(edge_idx);
                    stm.active = end;
                    stm.done = stm.states[end].child.kind == NodeKind::Exit;
                    transitioned = true;

                    // Keep the travel plan in step when we walked its edge
                    if stm.path_idx < stm.path_edges.len()
                        && stm.path_edges[stm.path_idx] == edge_idx
                    {
                        stm.path_idx += 1;
                        if stm.path_idx >= stm.path_edges.len() {
                            stm.clear_path();
                        }
                    }

                    let end_child = stm.states[end].child;
                    self.reset_node(end_child)?;
                }
            }

            remaining -= consumed;
            if !transitioned || remaining <= EPSILON {
                return Ok(UpdateInfo {
                    done: stm.done,
                    consumed: elapsed,
                });
            }
        }
    }

    pub(crate) fn eval_state_machine(
        &mut self,
        stm: &mut StateMachineNode,
        bone: usize,
        want_rm: bool,
    ) -> Result<EvalOut> {
        if stm.states.is_empty() {
            let rm = want_rm.then(RootMotion::default);
            return Ok((Transform::IDENTITY, rm));
        }
        let active = stm.active;
        let (active_tr, active_rm) = self.eval_node(stm.states[active].child, bone, want_rm)?;

        let Some(edge_idx) = stm.states[active].active_in else {
            return Ok((active_tr, active_rm));
        };
        let edge = &stm.edges[edge_idx];
        let w = edge.end_weight;
        let begin_child = stm.states[edge.begin].child;
        let (begin_tr, begin_rm) = self.eval_node(begin_child, bone, want_rm)?;

        let tr = Transform::lerp(&begin_tr, &active_tr, w);
        let rm = match (begin_rm, active_rm) {
            (Some(a), Some(b)) => Some(RootMotion {
                motion: Transform::lerp_components(&a.motion, &b.motion, w),
                distance: Transform::lerp_components(&a.distance, &b.distance, w),
            }),
            (a, b) => a.or(b),
        };
        Ok((tr, rm))
    }

    pub(crate) fn travel_state_machine(
        &mut self,
        stm: &mut StateMachineNode,
        target: usize,
    ) -> Result<()> {
        if target >= stm.states.len() {
            return Err(MarrowError::StateMachine(format!(
                "travel target {} out of range ({} states)",
                target,
                stm.states.len()
            )));
        }
        if target == stm.active {
            stm.clear_path();
            return Ok(());
        }
        if !stm.travel_enabled {
            log::warn!("travel requested on a state machine built without travel support");
            return Err(MarrowError::StateMachine(
                "travel not enabled at construction".into(),
            ));
        }

        if stm.find_path(target) {
            return Ok(());
        }

        // No admissible path: snap to the target with no cross-fade
        log::warn!(
            "no path from state {} to state {}; snapping",
            stm.active,
            target
        );
        let old = stm.active;
        stm.states[old].active_in = None;
        stm.active = target;
        stm.states[target].active_in = None;
        stm.clear_path();
        stm.done = stm.states[target].child.kind == NodeKind::Exit;
        let child = stm.states[target].child;
        self.reset_node(child)?;
        Ok(())
    }

    pub(crate) fn reset_state_machine(&mut self, stm: &mut StateMachineNode) -> Result<()> {
        stm.active = 0;
        stm.done = false;
        stm.clear_path();
        for state in &mut stm.states {
            state.active_in = None;
        }
        for edge in &mut stm.edges {
            edge.end_weight = 0.0;
        }
        if let Some(first) = stm.states.first() {
            let child = first.child;
            self.reset_node(child)?;
        }
        Ok(())
    }
}
