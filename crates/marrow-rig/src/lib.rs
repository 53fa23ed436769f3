//! Rig data contracts consumed by the Marrow animation runtime
//!
//! Importers produce these types; the runtime treats them as immutable:
//! - `Clip` / `Channel` / `Track` - keyframed animation data, times in ticks
//! - `ClipLibrary` - clip collection with name lookup
//! - `Skeleton` / `Bone` - bone hierarchy with bind matrices

mod clip;
mod skeleton;

pub use clip::{Channel, Clip, ClipLibrary, Track};
pub use skeleton::{Bone, Skeleton};
