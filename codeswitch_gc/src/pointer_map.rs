//! Per-function stack pointer maps.
//!
//! Built once at function-load time, then immutable. The collector,
//! given a frame's pc-offset, reads the parameters region and the
//! matching locals region and walks the corresponding frame slots as
//! candidate pointers.

use crate::bitmap::{Bitmap, BitmapMut};
use crate::WORD_BITS;

/// Words in the fixed header (`bitmap_length`, `entry_count`).
const HEADER_LEN: usize = 2;
/// Words per entry (`pc_offset`, `map_offset`, `map_count`).
const ENTRY_LEN: usize = 3;

/// A contiguous region of the packed bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRegion {
    /// First bit index of the region.
    pub offset: usize,
    /// Number of bits in the region.
    pub count: usize,
}

/// Compact map from safe-point pc-offsets to reference-slot bitmaps.
///
/// All sections live in one boxed word array; see the crate-level
/// documentation for the layout. Entries are sorted ascending by
/// pc-offset, so lookup is a binary search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackPointerMap {
    words: Box<[usize]>,
}

impl StackPointerMap {
    /// Total number of bits in the bitmap section.
    #[inline]
    pub fn bitmap_length(&self) -> usize {
        self.words[0]
    }

    /// Number of safe-point entries.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.words[1]
    }

    #[inline]
    fn entry_base(&self, index: usize) -> usize {
        debug_assert!(index < self.entry_count());
        HEADER_LEN + index * ENTRY_LEN
    }

    /// Pc-offset of entry `index`.
    #[inline]
    pub fn pc_offset(&self, index: usize) -> u32 {
        self.words[self.entry_base(index)] as u32
    }

    /// First bitmap bit of entry `index`'s locals region.
    #[inline]
    pub fn map_offset(&self, index: usize) -> usize {
        self.words[self.entry_base(index) + 1]
    }

    /// Number of bits in entry `index`'s locals region.
    #[inline]
    pub fn map_count(&self, index: usize) -> usize {
        self.words[self.entry_base(index) + 2]
    }

    /// View of the packed bitmap section.
    #[inline]
    pub fn bitmap(&self) -> Bitmap<'_> {
        let base = HEADER_LEN + self.entry_count() * ENTRY_LEN;
        Bitmap::new(&self.words[base..], self.bitmap_length())
    }

    /// The parameters region.
    ///
    /// It occupies the front of the bitmap, up to the first locals
    /// region; with no entries it spans the whole bitmap.
    pub fn parameters_region(&self) -> BitRegion {
        let count = if self.entry_count() == 0 {
            self.bitmap_length()
        } else {
            self.map_offset(0)
        };
        BitRegion { offset: 0, count }
    }

    /// Binary-search the entry table for an exact pc-offset match.
    pub fn search_locals_region(&self, pc_offset: u32) -> Option<usize> {
        let count = self.entry_count();
        let mut begin = 0;
        let mut end = count;
        while begin < end {
            let middle = begin + (end - begin) / 2;
            let probe = self.pc_offset(middle);
            if probe == pc_offset {
                return Some(middle);
            }
            if pc_offset < probe {
                end = middle;
            } else {
                begin = middle + 1;
            }
        }
        None
    }

    /// Check whether `pc_offset` is a recorded safe point.
    #[inline]
    pub fn has_locals_region(&self, pc_offset: u32) -> bool {
        self.search_locals_region(pc_offset).is_some()
    }

    /// Locals region for an exact pc-offset match.
    pub fn locals_region(&self, pc_offset: u32) -> Option<BitRegion> {
        self.search_locals_region(pc_offset).map(|index| BitRegion {
            offset: self.map_offset(index),
            count: self.map_count(index),
        })
    }

    /// Iterate over the parameter slots that hold references.
    pub fn parameter_pointer_slots(&self) -> impl Iterator<Item = usize> + '_ {
        let region = self.parameters_region();
        self.bitmap().iter_set_in(region.offset, region.count)
    }

    /// Iterate over the locals slots that hold references at `pc_offset`.
    ///
    /// Returns `None` if `pc_offset` is not a recorded safe point.
    pub fn local_pointer_slots(&self, pc_offset: u32) -> Option<impl Iterator<Item = usize> + '_> {
        self.locals_region(pc_offset)
            .map(|region| self.bitmap().iter_set_in(region.offset, region.count))
    }
}

/// Builder for [`StackPointerMap`].
///
/// The map builder feeds in the parameters region once and one locals
/// snapshot per safe point; `finish` sorts entries, assigns bitmap
/// offsets, and packs everything into the final word array.
#[derive(Debug, Default)]
pub struct StackPointerMapBuilder {
    parameter_bits: Vec<bool>,
    entries: Vec<EntryBits>,
}

#[derive(Debug)]
struct EntryBits {
    pc_offset: u32,
    slots: Vec<bool>,
}

impl StackPointerMapBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one parameter bit (set ⇔ the parameter holds a reference).
    pub fn push_parameter(&mut self, is_pointer: bool) {
        self.parameter_bits.push(is_pointer);
    }

    /// Record a safe-point entry with its locals snapshot, front to top.
    pub fn add_entry(&mut self, pc_offset: u32, slots: impl IntoIterator<Item = bool>) {
        self.entries.push(EntryBits {
            pc_offset,
            slots: slots.into_iter().collect(),
        });
    }

    /// Number of entries recorded so far.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Pack the final map.
    ///
    /// Entries are sorted by pc-offset (stable, so equal keys keep their
    /// insertion order); map offsets are assigned ascending starting
    /// after the parameters region.
    pub fn finish(mut self) -> StackPointerMap {
        self.entries.sort_by_key(|entry| entry.pc_offset);
        debug_assert!(
            self.entries
                .windows(2)
                .all(|pair| pair[0].pc_offset < pair[1].pc_offset),
            "duplicate safe-point pc-offsets"
        );

        let parameter_count = self.parameter_bits.len();
        let bitmap_length = parameter_count
            + self
                .entries
                .iter()
                .map(|entry| entry.slots.len())
                .sum::<usize>();
        let bitmap_words = bitmap_length.div_ceil(WORD_BITS);
        let total_words = HEADER_LEN + self.entries.len() * ENTRY_LEN + bitmap_words;

        let mut words = vec![0usize; total_words];
        words[0] = bitmap_length;
        words[1] = self.entries.len();

        let mut map_offset = parameter_count;
        for (index, entry) in self.entries.iter().enumerate() {
            let base = HEADER_LEN + index * ENTRY_LEN;
            words[base] = entry.pc_offset as usize;
            words[base + 1] = map_offset;
            words[base + 2] = entry.slots.len();
            map_offset += entry.slots.len();
        }

        let bitmap_base = HEADER_LEN + self.entries.len() * ENTRY_LEN;
        let mut bitmap = BitmapMut::new(&mut words[bitmap_base..], bitmap_length);
        let mut bit_offset = 0;
        for &is_pointer in &self.parameter_bits {
            bitmap.set(bit_offset, is_pointer);
            bit_offset += 1;
        }
        for entry in &self.entries {
            for &is_pointer in &entry.slots {
                bitmap.set(bit_offset, is_pointer);
                bit_offset += 1;
            }
        }

        StackPointerMap {
            words: words.into_boxed_slice(),
        }
    }
}
