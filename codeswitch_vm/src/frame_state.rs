//! Build-time shadow of an activation frame.
//!
//! A `FrameState` tracks the *types* of the operand stack and locals at
//! one program point, not their values. Locals occupy the lowest slots
//! of the type map and are addressed with negative slot numbers (slot
//! `s < 0` is index `-s - 1`); non-negative slots name parameters,
//! whose reference kind is fixed by declaration and tracked separately.
//!
//! Frame states live only while the map builder runs; they never reach
//! the managed heap.

use codeswitch_runtime::{substitute, Function, TypeBindings, TypeRef};
use smallvec::SmallVec;

/// Abstract frame contents at one program point.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// Types of locals (bottom) and operand stack (top).
    type_map: Vec<TypeRef>,
    /// Pending type arguments for the next generic operation.
    type_args: SmallVec<[TypeRef; 4]>,
    /// Pc-offset this state holds at.
    pc_offset: u32,
}

impl FrameState {
    /// Seed a frame state: `locals_slots` copies of `default_type`
    /// (no local holds a reference before the first store).
    pub fn new(locals_slots: usize, default_type: TypeRef) -> FrameState {
        FrameState {
            type_map: vec![default_type; locals_slots],
            type_args: SmallVec::new(),
            pc_offset: 0,
        }
    }

    /// Pc-offset this state holds at.
    #[inline]
    pub fn pc_offset(&self) -> u32 {
        self.pc_offset
    }

    /// Move the cursor.
    #[inline]
    pub fn set_pc_offset(&mut self, pc_offset: u32) {
        self.pc_offset = pc_offset;
    }

    /// Number of tracked slots (locals plus operand stack).
    #[inline]
    pub fn size(&self) -> usize {
        self.type_map.len()
    }

    /// The full slot list, locals first.
    #[inline]
    pub fn type_map(&self) -> &[TypeRef] {
        &self.type_map
    }

    // =========================================================================
    // Operand stack
    // =========================================================================

    /// Push a type.
    #[inline]
    pub fn push(&mut self, ty: TypeRef) {
        self.type_map.push(ty);
    }

    /// Pop the top type.
    pub fn pop(&mut self) -> Option<TypeRef> {
        self.type_map.pop()
    }

    /// Pop `count` types; fails without mutating if fewer are present.
    pub fn pop_n(&mut self, count: usize) -> bool {
        if count > self.type_map.len() {
            return false;
        }
        self.type_map.truncate(self.type_map.len() - count);
        true
    }

    /// The top type.
    pub fn top(&self) -> Option<&TypeRef> {
        self.type_map.last()
    }

    /// The type `depth` slots below the top (`depth` 0 is the top).
    pub fn slot_from_top(&self, depth: usize) -> Option<&TypeRef> {
        self.type_map.len().checked_sub(depth + 1).map(|index| &self.type_map[index])
    }

    /// Swap the top with the slot `depth` below it.
    pub fn swap_with_top(&mut self, depth: usize) -> bool {
        let len = self.type_map.len();
        match len.checked_sub(depth + 1) {
            Some(index) if depth > 0 => {
                self.type_map.swap(index, len - 1);
                true
            }
            Some(_) => true, // depth 0 is a no-op
            None => false,
        }
    }

    // =========================================================================
    // Locals
    // =========================================================================

    /// Store into a local. `slot` must be negative; returns false when
    /// it indexes past the tracked slots.
    pub fn set_local(&mut self, slot: i64, ty: TypeRef) -> bool {
        debug_assert!(slot < 0);
        let index = (-slot - 1) as usize;
        if index >= self.type_map.len() {
            return false;
        }
        self.type_map[index] = ty;
        true
    }

    /// Read a local. `slot` must be negative.
    pub fn local(&self, slot: i64) -> Option<&TypeRef> {
        debug_assert!(slot < 0);
        self.type_map.get((-slot - 1) as usize)
    }

    // =========================================================================
    // Type arguments
    // =========================================================================

    /// Push a pending type argument. Only reference types are tracked
    /// here; pushing a primitive fails (primitive instantiation
    /// arguments are encoded in the instantiation pool instead).
    pub fn push_type_arg(&mut self, ty: TypeRef) -> bool {
        if !ty.is_object() {
            return false;
        }
        self.type_args.push(ty);
        true
    }

    /// Pop the most recent pending type argument.
    pub fn pop_type_arg(&mut self) -> Option<TypeRef> {
        self.type_args.pop()
    }

    /// Take the `count` most recent pending type arguments, in push
    /// order; fails without mutating if fewer are pending.
    pub fn take_type_args(&mut self, count: usize) -> Option<SmallVec<[TypeRef; 4]>> {
        if count > self.type_args.len() {
            return None;
        }
        let split = self.type_args.len() - count;
        let taken = self.type_args.drain(split..).collect();
        Some(taken)
    }

    /// Number of pending type arguments.
    #[inline]
    pub fn type_args_len(&self) -> usize {
        self.type_args.len()
    }

    /// Discard all pending type arguments.
    #[inline]
    pub fn clear_type_args(&mut self) {
        self.type_args.clear();
    }

    /// Bind the pending type arguments to `callee`'s type parameters in
    /// order and substitute into its return type.
    ///
    /// Fails when the pending count does not match the callee's type
    /// parameter count.
    pub fn substitute_return_type(&self, callee: &Function) -> Option<TypeRef> {
        let parameters = callee.type_parameters();
        if self.type_args.len() != parameters.len() {
            return None;
        }
        if parameters.is_empty() {
            return Some(callee.return_type().clone());
        }
        let bindings: TypeBindings = parameters
            .iter()
            .cloned()
            .zip(self.type_args.iter().cloned())
            .collect();
        Some(substitute(callee.return_type(), &bindings))
    }
}
