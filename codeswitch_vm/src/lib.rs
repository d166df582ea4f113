//! Function-load-time services for the CodeSwitch VM.
//!
//! The centerpiece is the stack pointer map builder: an abstract
//! interpreter that walks a function's basic-block graph at load time,
//! simulating the operand stack as a stack of types, and records a
//! bitmap snapshot at every safe point - every instruction at which a
//! garbage collection may start. The collector later queries the
//! resulting [`StackPointerMap`] by pc-offset to find the reference
//! slots of a suspended frame.
//!
//! # Entry points
//!
//! - [`build_stack_pointer_map`] - run the abstract interpreter over
//!   one function and produce its map
//! - [`attach_pointer_map`] - the loader's wrapper: build and attach
//!   the map for a non-native function with non-empty bytecode
//!
//! [`StackPointerMap`]: codeswitch_gc::StackPointerMap

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod frame_state;
mod map_builder;

pub use config::BuildConfig;
pub use frame_state::FrameState;
pub use map_builder::{
    attach_pointer_map, build_stack_pointer_map, BuildError, BuildResult,
};
