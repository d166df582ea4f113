//! Stack pointer maps consulted by the CodeSwitch garbage collector.
//!
//! A precise moving collector must find every live pointer on every
//! activation frame at any instant where a collection may start. This
//! crate provides the compact, read-only structure the collector queries
//! on that hot path:
//!
//! - [`StackPointerMap`] - per-function map from safe-point pc-offset to
//!   a bitmap of reference slots
//! - [`Bitmap`] / [`BitmapMut`] - word-packed bit views
//!
//! # Layout
//!
//! A `StackPointerMap` is a single word array packed in three sections:
//!
//! ```text
//! [bitmap_length, entry_count]            header (2 words)
//! [pc_offset, map_offset, map_count] ...  entry table (3 words each,
//!                                         sorted ascending by pc_offset)
//! [bitmap words ...]                      word-aligned bitmap
//! ```
//!
//! The first `map_offset(0)` bits of the bitmap form the parameters
//! region (fixed per function); the rest are concatenated locals regions,
//! one per entry.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bitmap;
mod pointer_map;

pub use bitmap::{Bitmap, BitmapMut, SetBits};
pub use pointer_map::{BitRegion, StackPointerMap, StackPointerMapBuilder};

/// Number of bits in a machine word.
pub const WORD_BITS: usize = usize::BITS as usize;
