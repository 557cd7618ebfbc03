//! Every third-party crate the workspace uses, re-exported so modules only need
//! `use deps::*;`. The plain `pub use <crate>;` lines are generated from the manifest.

include!(concat!(env!("OUT_DIR"), "/deps.rs"));

// bevy's derives refer to the ecs crate by this name
pub use bevy::ecs as bevy_ecs;
pub use color_eyre::eyre;
pub use smallvec::SmallVec as SVec;
pub use tracing_unwrap::{OptionExt, ResultExt};
