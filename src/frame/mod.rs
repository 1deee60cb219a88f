//! Reference frames
//!
//! A reference frame carries a position, velocity, attitude and angular rate
//! relative to its parent, plus a record of which of those four components
//! currently hold meaningful values.
//!
//! # Architecture
//!
//! - **FrameItems**: bitmask over {Position, Velocity, Attitude, Rate}
//! - **RefFrameState**: translational + rotational state with composition rules
//! - **FrameTree**: arena owning every frame, the parent/child edges and the
//!   name registry used to look frames up

mod items;
mod state;
mod tree;

pub use items::{FrameItems, StateItem};
pub use state::{RefFrameRot, RefFrameState, RefFrameTrans};
pub use tree::{FrameId, FrameTree, RefFrame};
