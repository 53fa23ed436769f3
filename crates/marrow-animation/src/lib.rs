//! Runtime animation-graph evaluator for skeletal characters
//!
//! Given a [`marrow_rig::ClipLibrary`] bound to a [`marrow_rig::Skeleton`]
//! and a user-built graph of composition nodes, the tree produces per-bone
//! local transforms every frame and, optionally, the root-motion delta the
//! application can drive locomotion from.
//!
//! The layers, leaves first:
//! - [`sampler`] - keyframe evaluation for one channel at one tick time
//! - [`player`] - per-clip playback state and the pose/skin pipeline
//! - [`tree`] - the node arena, the two-pass traversal, state machines and
//!   root-motion extraction

pub mod player;
pub mod sampler;
pub mod tree;

pub use player::{PlayState, Player, PlayerEvent};
pub use tree::machine::{EdgeMode, EdgeParams, EdgeStatus};
pub use tree::{AnimTree, NodeHandle, NodeKind, RootMotion};
