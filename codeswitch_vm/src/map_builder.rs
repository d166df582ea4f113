//! The stack pointer map builder.
//!
//! At function-load time the builder abstractly interprets the
//! function's bytecode: it walks the basic-block graph depth first,
//! simulating the effect of every opcode on a [`FrameState`] (the
//! operand stack as a stack of types), and snapshots the frame at every
//! safe point - each allocation, each call, and each try entry. The
//! snapshots are then packed into the [`StackPointerMap`] the collector
//! queries at run time.
//!
//! Each block is interpreted at most once: the first frame state to
//! reach a block wins and later arrivals are dropped. That is sound
//! because the input bytecode is assumed verified, so every predecessor
//! of a block produces the same stack shape; [`BuildConfig::verify_joins`]
//! re-checks that assumption on second arrivals.

use crate::config::BuildConfig;
use crate::frame_state::FrameState;
use codeswitch_bytecode::{BytecodeReader, DecodeError, Opcode};
use codeswitch_gc::{StackPointerMap, StackPointerMapBuilder};
use codeswitch_runtime::{
    substitute, substitute_for_inheritance, BuiltinId, Class, ClassId, ClassRegistry, Function,
    FunctionError, Name, Package, PackageDependency, Roots, Type, TypeRef, WORD_SIZE,
};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

// =============================================================================
// Errors
// =============================================================================

/// Errors from building a stack pointer map.
///
/// All of these mean the function is malformed (or ran into a broken
/// link); the enclosing package load aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The instruction stream could not be decoded.
    Decode(DecodeError),
    /// The function has no bytecode; there is nothing to map.
    EmptyFunction,
    /// A control-flow opcode named a block index outside the table.
    InvalidBlockIndex {
        /// The rejected index.
        index: i64,
    },
    /// A `branchl` immediate declared no successors.
    MalformedBranchTable {
        /// Offset of the opcode.
        pc_offset: u32,
    },
    /// An opcode popped more values than the stack holds.
    StackUnderflow {
        /// Offset just past the opcode's immediates.
        pc_offset: u32,
    },
    /// A local slot was out of range for the frame.
    InvalidLocalSlot {
        /// Offset just past the opcode's immediates.
        pc_offset: u32,
        /// The rejected slot.
        slot: i64,
    },
    /// A generic operation consumed more pending type arguments than
    /// were pushed.
    TypeArgumentUnderflow {
        /// Offset just past the opcode's immediates.
        pc_offset: u32,
    },
    /// The pending type arguments did not match the callee's type
    /// parameter count.
    TypeArgumentMismatch {
        /// Offset just past the opcode's immediates.
        pc_offset: u32,
    },
    /// `tys`/`tyd` pushed a primitive instantiation type.
    PrimitiveTypeArgument {
        /// Offset just past the opcode's immediates.
        pc_offset: u32,
    },
    /// A wire-format index did not resolve to a definition.
    UnresolvedReference {
        /// What kind of definition was looked up.
        kind: &'static str,
        /// The rejected index.
        index: i64,
    },
    /// A field name was not declared by the named class.
    UnknownField {
        /// The looked-up field name.
        name: Name,
    },
    /// A receiver type has no backing class.
    MissingReceiverClass {
        /// Offset just past the opcode's immediates.
        pc_offset: u32,
    },
    /// An element access on a class with no element type.
    MissingElementType {
        /// The offending class.
        class: ClassId,
    },
    /// A field's declaring class is not among the receiver's
    /// supertypes.
    MissingSupertype {
        /// The receiver's class.
        derived: ClassId,
        /// The declaring class.
        base: ClassId,
    },
    /// Two predecessors disagreed on a block's stack shape
    /// (reported only with [`BuildConfig::verify_joins`]).
    JoinMismatch {
        /// Entry offset of the block.
        pc_offset: u32,
    },
    /// Attaching the finished map to the function failed.
    Function(FunctionError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{}", e),
            Self::EmptyFunction => f.write_str("function has no bytecode"),
            Self::InvalidBlockIndex { index } => {
                write!(f, "block index {} out of range", index)
            }
            Self::MalformedBranchTable { pc_offset } => {
                write!(f, "branchl with no successors at offset {}", pc_offset)
            }
            Self::StackUnderflow { pc_offset } => {
                write!(f, "operand stack underflow at offset {}", pc_offset)
            }
            Self::InvalidLocalSlot { pc_offset, slot } => {
                write!(f, "local slot {} out of range at offset {}", slot, pc_offset)
            }
            Self::TypeArgumentUnderflow { pc_offset } => {
                write!(f, "type argument stack underflow at offset {}", pc_offset)
            }
            Self::TypeArgumentMismatch { pc_offset } => {
                write!(
                    f,
                    "pending type arguments do not match callee at offset {}",
                    pc_offset
                )
            }
            Self::PrimitiveTypeArgument { pc_offset } => {
                write!(f, "primitive type argument at offset {}", pc_offset)
            }
            Self::UnresolvedReference { kind, index } => {
                write!(f, "unresolved {} reference {}", kind, index)
            }
            Self::UnknownField { name } => write!(f, "unknown field {}", name),
            Self::MissingReceiverClass { pc_offset } => {
                write!(f, "receiver has no class at offset {}", pc_offset)
            }
            Self::MissingElementType { class } => {
                write!(f, "{} has no element type", class)
            }
            Self::MissingSupertype { derived, base } => {
                write!(f, "{} does not inherit from {}", derived, base)
            }
            Self::JoinMismatch { pc_offset } => {
                write!(f, "predecessors disagree at block offset {}", pc_offset)
            }
            Self::Function(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<DecodeError> for BuildError {
    fn from(e: DecodeError) -> BuildError {
        BuildError::Decode(e)
    }
}

impl From<FunctionError> for BuildError {
    fn from(e: FunctionError) -> BuildError {
        BuildError::Function(e)
    }
}

/// Result type for map building.
pub type BuildResult<T> = Result<T, BuildError>;

// =============================================================================
// Entry points
// =============================================================================

/// Build the stack pointer map for `function`.
///
/// The function must have non-empty bytecode. The map is returned, not
/// attached; [`attach_pointer_map`] is the loader-facing wrapper.
pub fn build_stack_pointer_map(
    function: &Function,
    package: &Package,
    roots: &Roots,
    registry: &ClassRegistry,
    config: &BuildConfig,
) -> BuildResult<StackPointerMap> {
    if function.instructions_size() == 0 {
        return Err(BuildError::EmptyFunction);
    }
    let builder = MapBuilder {
        function,
        package,
        roots,
        registry,
        config,
        maps: Vec::new(),
        visited: FxHashMap::default(),
        worklist: Vec::new(),
    };
    builder.run()
}

/// Build and attach the pointer map for a freshly loaded function.
///
/// Native functions and functions without bytecode carry no map;
/// returns `Ok(false)` for those, `Ok(true)` once a map is attached.
pub fn attach_pointer_map(
    function: &Function,
    package: &Package,
    roots: &Roots,
    registry: &ClassRegistry,
    config: &BuildConfig,
) -> BuildResult<bool> {
    if function.is_native() || function.instructions_size() == 0 {
        return Ok(false);
    }
    let map = build_stack_pointer_map(function, package, roots, registry, config)?;
    function.attach_stack_pointer_map(Arc::new(map))?;
    Ok(true)
}

// =============================================================================
// The abstract interpreter
// =============================================================================

struct MapBuilder<'a> {
    function: &'a Function,
    package: &'a Package,
    roots: &'a Roots,
    registry: &'a ClassRegistry,
    config: &'a BuildConfig,
    /// Safe-point snapshots collected so far.
    maps: Vec<FrameState>,
    /// Block entry offsets already interpreted, with the entry state
    /// kept for join re-checks when configured.
    visited: FxHashMap<u32, Option<FrameState>>,
    /// Frame states waiting to be interpreted, keyed by their entry
    /// pc-offset.
    worklist: Vec<FrameState>,
}

impl<'a> MapBuilder<'a> {
    fn run(mut self) -> BuildResult<StackPointerMap> {
        let locals_slots = self.function.locals_size() / WORD_SIZE;
        let parameters_map: Vec<TypeRef> = self.function.parameter_types().to_vec();

        let entry = FrameState::new(locals_slots, self.roots.unit_type());
        self.worklist.push(entry);

        while let Some(state) = self.worklist.pop() {
            let entry_offset = state.pc_offset();
            if let Some(seen) = self.visited.get(&entry_offset) {
                if self.config.verify_joins {
                    check_join(seen.as_ref(), &state, entry_offset)?;
                }
                continue;
            }
            let snapshot = self.config.verify_joins.then(|| state.clone());
            self.visited.insert(entry_offset, snapshot);
            self.interpret_block(state, &parameters_map)?;
        }

        // Pack the final structure: parameters region first, then one
        // locals region per safe point, sorted by pc-offset.
        let mut packed = StackPointerMapBuilder::new();
        for ty in &parameters_map {
            packed.push_parameter(ty.is_object());
        }
        for state in &self.maps {
            packed.add_entry(
                state.pc_offset(),
                state.type_map().iter().map(|ty| ty.is_object()),
            );
        }
        let map = packed.finish();
        trace!(
            function = %self.function.name(),
            entries = map.entry_count(),
            bits = map.bitmap_length(),
            "built stack pointer map"
        );
        Ok(map)
    }

    /// Interpret one basic block from `state`'s pc-offset until a
    /// terminator, pushing successor states onto the worklist.
    fn interpret_block(
        &mut self,
        mut state: FrameState,
        parameters_map: &[TypeRef],
    ) -> BuildResult<()> {
        let mut reader = BytecodeReader::new(self.function.instructions());
        reader.seek(state.pc_offset() as usize);

        loop {
            let opcode = reader.read_opcode()?;
            match opcode {
                Opcode::Nop => {}

                Opcode::Ret => {
                    pop(&mut state, &reader)?;
                    return Ok(());
                }

                Opcode::Branch => {
                    let block = reader.read_vbn()?;
                    self.branch_to(state, block)?;
                    return Ok(());
                }

                Opcode::BranchIf => {
                    pop(&mut state, &reader)?;
                    let true_block = reader.read_vbn()?;
                    let false_block = reader.read_vbn()?;
                    self.branch_to(state.clone(), true_block)?;
                    self.branch_to(state, false_block)?;
                    return Ok(());
                }

                Opcode::Label => {
                    reader.read_vbn()?;
                    state.push(self.roots.label_type());
                }

                Opcode::BranchL => {
                    pop(&mut state, &reader)?;
                    let count = reader.read_vbn()?;
                    if count < 1 {
                        return Err(BuildError::MalformedBranchTable {
                            pc_offset: reader.offset() as u32,
                        });
                    }
                    for _ in 0..count - 1 {
                        let block = reader.read_vbn()?;
                        self.branch_to(state.clone(), block)?;
                    }
                    let block = reader.read_vbn()?;
                    self.branch_to(state, block)?;
                    return Ok(());
                }

                Opcode::PushTry => {
                    let try_block = reader.read_vbn()?;
                    let catch_block = reader.read_vbn()?;
                    self.branch_to(state.clone(), try_block)?;
                    // The catch successor sees the exception value on
                    // top; the snapshot taken here is the map the
                    // collector reads while the exception is live.
                    let catch_offset = self.block_offset(catch_block)?;
                    state.set_pc_offset(catch_offset);
                    state.push(self.builtin_type(BuiltinId::EXCEPTION_CLASS)?);
                    self.maps.push(state.clone());
                    self.worklist.push(state);
                    return Ok(());
                }

                Opcode::PopTry => {
                    let done_block = reader.read_vbn()?;
                    self.branch_to(state, done_block)?;
                    return Ok(());
                }

                Opcode::Throw => {
                    pop(&mut state, &reader)?;
                    return Ok(());
                }

                Opcode::CastClassBranch => {
                    let true_block = reader.read_vbn()?;
                    let false_block = reader.read_vbn()?;
                    let refined = state.pop_type_arg().ok_or(BuildError::TypeArgumentUnderflow {
                        pc_offset: reader.offset() as u32,
                    })?;
                    pop(&mut state, &reader)?; // class operand
                    self.branch_to(state.clone(), false_block)?;
                    // The true successor sees the checked value with
                    // its refined type.
                    pop(&mut state, &reader)?;
                    state.push(refined);
                    self.branch_to(state, true_block)?;
                    return Ok(());
                }

                Opcode::Drop => {
                    pop(&mut state, &reader)?;
                }

                Opcode::DropI => {
                    let count = reader.read_vbn()?;
                    let count = usize::try_from(count).map_err(|_| BuildError::StackUnderflow {
                        pc_offset: reader.offset() as u32,
                    })?;
                    if !state.pop_n(count) {
                        return Err(BuildError::StackUnderflow {
                            pc_offset: reader.offset() as u32,
                        });
                    }
                }

                Opcode::Dup => {
                    let top = state.top().cloned().ok_or(BuildError::StackUnderflow {
                        pc_offset: reader.offset() as u32,
                    })?;
                    state.push(top);
                }

                Opcode::DupI => {
                    let depth = reader.read_vbn()?;
                    let ty = usize::try_from(depth)
                        .ok()
                        .and_then(|d| state.slot_from_top(d))
                        .cloned()
                        .ok_or(BuildError::StackUnderflow {
                            pc_offset: reader.offset() as u32,
                        })?;
                    state.push(ty);
                }

                Opcode::Swap => {
                    if !state.swap_with_top(1) {
                        return Err(BuildError::StackUnderflow {
                            pc_offset: reader.offset() as u32,
                        });
                    }
                }

                Opcode::Swap2 => {
                    if !state.swap_with_top(2) {
                        return Err(BuildError::StackUnderflow {
                            pc_offset: reader.offset() as u32,
                        });
                    }
                }

                Opcode::Unit => state.push(self.roots.unit_type()),
                Opcode::True | Opcode::False => state.push(self.roots.boolean_type()),
                Opcode::Null | Opcode::Uninitialized => state.push(self.roots.null_type()),

                Opcode::I8 => {
                    reader.read_vbn()?;
                    state.push(self.roots.i8_type());
                }
                Opcode::I16 => {
                    reader.read_vbn()?;
                    state.push(self.roots.i16_type());
                }
                Opcode::I32 => {
                    reader.read_vbn()?;
                    state.push(self.roots.i32_type());
                }
                Opcode::I64 => {
                    reader.read_vbn()?;
                    state.push(self.roots.i64_type());
                }
                Opcode::F32 => {
                    reader.skip(4)?;
                    state.push(self.roots.f32_type());
                }
                Opcode::F64 => {
                    reader.skip(8)?;
                    state.push(self.roots.f64_type());
                }
                Opcode::String => {
                    reader.read_vbn()?;
                    state.push(self.builtin_type(BuiltinId::STRING_CLASS)?);
                }

                Opcode::LdLocal => {
                    let slot = reader.read_vbn()?;
                    let ty = if slot >= 0 {
                        parameters_map.get(slot as usize).cloned()
                    } else {
                        state.local(slot).cloned()
                    };
                    let ty = ty.ok_or(BuildError::InvalidLocalSlot {
                        pc_offset: reader.offset() as u32,
                        slot,
                    })?;
                    state.push(ty);
                }

                Opcode::StLocal => {
                    let slot = reader.read_vbn()?;
                    let ty = pop(&mut state, &reader)?;
                    if slot < 0 {
                        if !state.set_local(slot, ty) {
                            return Err(BuildError::InvalidLocalSlot {
                                pc_offset: reader.offset() as u32,
                                slot,
                            });
                        }
                    } else if (slot as usize) >= parameters_map.len() {
                        return Err(BuildError::InvalidLocalSlot {
                            pc_offset: reader.offset() as u32,
                            slot,
                        });
                    }
                    // Stores to parameters are dropped: a parameter's
                    // reference kind is fixed by its declared type.
                }

                Opcode::LdGlobal => {
                    let index = reader.read_vbn()?;
                    let global = self.package.global(index).ok_or(
                        BuildError::UnresolvedReference {
                            kind: "global",
                            index,
                        },
                    )?;
                    state.push(global.ty().clone());
                }

                Opcode::LdGlobalForeign => {
                    let dep_index = reader.read_vbn()?;
                    let extern_index = reader.read_vbn()?;
                    let global = self
                        .dependency(dep_index)?
                        .linked_global(extern_index)
                        .ok_or(BuildError::UnresolvedReference {
                            kind: "dependency global",
                            index: extern_index,
                        })?;
                    state.push(global.ty().clone());
                }

                Opcode::StGlobal => {
                    reader.read_vbn()?;
                    pop(&mut state, &reader)?;
                }

                Opcode::StGlobalForeign => {
                    reader.read_vbn()?;
                    reader.read_vbn()?;
                    pop(&mut state, &reader)?;
                }

                Opcode::LdField => {
                    let class_id = reader.read_vbn()?;
                    let name_index = reader.read_vbn()?;
                    let field_class = self.resolve_class(class_id)?;
                    self.load_field(&mut state, &reader, field_class, name_index)?;
                }

                Opcode::LdFieldForeign => {
                    let dep_index = reader.read_vbn()?;
                    let extern_index = reader.read_vbn()?;
                    let name_index = reader.read_vbn()?;
                    let field_class = self
                        .dependency(dep_index)?
                        .linked_class(extern_index)
                        .ok_or(BuildError::UnresolvedReference {
                            kind: "dependency class",
                            index: extern_index,
                        })?;
                    self.load_field(&mut state, &reader, field_class, name_index)?;
                }

                Opcode::StField => {
                    reader.read_vbn()?;
                    reader.read_vbn()?;
                    pop(&mut state, &reader)?;
                    pop(&mut state, &reader)?;
                }

                Opcode::StFieldForeign => {
                    reader.read_vbn()?;
                    reader.read_vbn()?;
                    reader.read_vbn()?;
                    pop(&mut state, &reader)?;
                    pop(&mut state, &reader)?;
                }

                Opcode::LdElement => {
                    let receiver = pop(&mut state, &reader)?;
                    pop(&mut state, &reader)?; // index
                    let class = receiver.effective_class().ok_or(
                        BuildError::MissingReceiverClass {
                            pc_offset: reader.offset() as u32,
                        },
                    )?;
                    let element = self
                        .class_handle(class)?
                        .element_type()
                        .ok_or(BuildError::MissingElementType { class })?;
                    state.push(element);
                }

                Opcode::StElement => {
                    pop(&mut state, &reader)?;
                    pop(&mut state, &reader)?;
                    pop(&mut state, &reader)?;
                }

                Opcode::AllocObj | Opcode::AllocArr => {
                    if opcode == Opcode::AllocArr {
                        pop(&mut state, &reader)?; // length
                    }
                    let class_id = reader.read_vbn()?;
                    self.record_safe_point(&mut state, &reader);
                    let ty = if let Some(builtin) = BuiltinId::from_raw(class_id) {
                        self.builtin_type_for(builtin, class_id)?
                    } else {
                        let class = self.package.class(class_id).ok_or(
                            BuildError::UnresolvedReference {
                                kind: "class",
                                index: class_id,
                            },
                        )?;
                        self.instantiate(&mut state, &reader, class)?
                    };
                    state.push(ty);
                }

                Opcode::AllocObjForeign | Opcode::AllocArrForeign => {
                    if opcode == Opcode::AllocArrForeign {
                        pop(&mut state, &reader)?; // length
                    }
                    let dep_index = reader.read_vbn()?;
                    let extern_index = reader.read_vbn()?;
                    self.record_safe_point(&mut state, &reader);
                    let class = self
                        .dependency(dep_index)?
                        .linked_class(extern_index)
                        .ok_or(BuildError::UnresolvedReference {
                            kind: "dependency class",
                            index: extern_index,
                        })?;
                    let ty = self.instantiate(&mut state, &reader, class)?;
                    state.push(ty);
                }

                Opcode::TypeStatic => {
                    let index = reader.read_vbn()?;
                    self.push_inst_type(&mut state, &reader, index)?;
                }

                Opcode::TypeDynamic => {
                    let index = reader.read_vbn()?;
                    self.push_inst_type(&mut state, &reader, index)?;
                    state.push(self.builtin_type(BuiltinId::TYPE_CLASS)?);
                }

                Opcode::Cast => {
                    let ty = state.pop_type_arg().ok_or(BuildError::TypeArgumentUnderflow {
                        pc_offset: reader.offset() as u32,
                    })?;
                    pop(&mut state, &reader)?;
                    state.push(ty);
                }

                Opcode::CastClass => {
                    let ty = state.pop_type_arg().ok_or(BuildError::TypeArgumentUnderflow {
                        pc_offset: reader.offset() as u32,
                    })?;
                    pop(&mut state, &reader)?;
                    pop(&mut state, &reader)?;
                    state.push(ty);
                }

                Opcode::CallFunction | Opcode::CallVirtual => {
                    let function_id = reader.read_vbn()?;
                    self.record_safe_point(&mut state, &reader);
                    let callee = if let Some(builtin) = BuiltinId::from_raw(function_id) {
                        self.roots.builtin_function(builtin).ok_or(
                            BuildError::UnresolvedReference {
                                kind: "builtin function",
                                index: function_id,
                            },
                        )?
                    } else {
                        self.package.function(function_id).ok_or(
                            BuildError::UnresolvedReference {
                                kind: "function",
                                index: function_id,
                            },
                        )?
                    };
                    self.apply_call(&mut state, &reader, &callee)?;
                }

                Opcode::CallFunctionForeign | Opcode::CallVirtualForeign => {
                    let dep_index = reader.read_vbn()?;
                    let extern_index = reader.read_vbn()?;
                    self.record_safe_point(&mut state, &reader);
                    let callee = self
                        .dependency(dep_index)?
                        .linked_function(extern_index)
                        .ok_or(BuildError::UnresolvedReference {
                            kind: "dependency function",
                            index: extern_index,
                        })?;
                    self.apply_call(&mut state, &reader, &callee)?;
                }

                Opcode::Pkg => {
                    reader.read_vbn()?;
                    state.push(self.builtin_type(BuiltinId::PACKAGE_CLASS)?);
                }

                // Binary integer arithmetic and bitwise operations.
                Opcode::AddI8
                | Opcode::SubI8
                | Opcode::MulI8
                | Opcode::DivI8
                | Opcode::ModI8
                | Opcode::LslI8
                | Opcode::LsrI8
                | Opcode::AsrI8
                | Opcode::AndI8
                | Opcode::OrI8
                | Opcode::XorI8 => {
                    self.binary(&mut state, &reader, self.roots.i8_type())?;
                }
                Opcode::AddI16
                | Opcode::SubI16
                | Opcode::MulI16
                | Opcode::DivI16
                | Opcode::ModI16
                | Opcode::LslI16
                | Opcode::LsrI16
                | Opcode::AsrI16
                | Opcode::AndI16
                | Opcode::OrI16
                | Opcode::XorI16 => {
                    self.binary(&mut state, &reader, self.roots.i16_type())?;
                }
                Opcode::AddI32
                | Opcode::SubI32
                | Opcode::MulI32
                | Opcode::DivI32
                | Opcode::ModI32
                | Opcode::LslI32
                | Opcode::LsrI32
                | Opcode::AsrI32
                | Opcode::AndI32
                | Opcode::OrI32
                | Opcode::XorI32 => {
                    self.binary(&mut state, &reader, self.roots.i32_type())?;
                }
                Opcode::AddI64
                | Opcode::SubI64
                | Opcode::MulI64
                | Opcode::DivI64
                | Opcode::ModI64
                | Opcode::LslI64
                | Opcode::LsrI64
                | Opcode::AsrI64
                | Opcode::AndI64
                | Opcode::OrI64
                | Opcode::XorI64 => {
                    self.binary(&mut state, &reader, self.roots.i64_type())?;
                }
                Opcode::AddF32 | Opcode::SubF32 | Opcode::MulF32 | Opcode::DivF32 => {
                    self.binary(&mut state, &reader, self.roots.f32_type())?;
                }
                Opcode::AddF64 | Opcode::SubF64 | Opcode::MulF64 | Opcode::DivF64 => {
                    self.binary(&mut state, &reader, self.roots.f64_type())?;
                }

                // Comparisons pop two operands and push a boolean.
                Opcode::EqI8
                | Opcode::EqI16
                | Opcode::EqI32
                | Opcode::EqI64
                | Opcode::EqF32
                | Opcode::EqF64
                | Opcode::EqP
                | Opcode::NeI8
                | Opcode::NeI16
                | Opcode::NeI32
                | Opcode::NeI64
                | Opcode::NeF32
                | Opcode::NeF64
                | Opcode::NeP
                | Opcode::LtI8
                | Opcode::LtI16
                | Opcode::LtI32
                | Opcode::LtI64
                | Opcode::LtF32
                | Opcode::LtF64
                | Opcode::LeI8
                | Opcode::LeI16
                | Opcode::LeI32
                | Opcode::LeI64
                | Opcode::LeF32
                | Opcode::LeF64
                | Opcode::GtI8
                | Opcode::GtI16
                | Opcode::GtI32
                | Opcode::GtI64
                | Opcode::GtF32
                | Opcode::GtF64
                | Opcode::GeI8
                | Opcode::GeI16
                | Opcode::GeI32
                | Opcode::GeI64
                | Opcode::GeF32
                | Opcode::GeF64 => {
                    self.binary(&mut state, &reader, self.roots.boolean_type())?;
                }

                // Unary operations replace the top with the stated
                // width.
                Opcode::NegI8 | Opcode::InvI8 => {
                    self.unary(&mut state, &reader, self.roots.i8_type())?;
                }
                Opcode::NegI16 | Opcode::InvI16 => {
                    self.unary(&mut state, &reader, self.roots.i16_type())?;
                }
                Opcode::NegI32 | Opcode::InvI32 => {
                    self.unary(&mut state, &reader, self.roots.i32_type())?;
                }
                Opcode::NegI64 | Opcode::InvI64 => {
                    self.unary(&mut state, &reader, self.roots.i64_type())?;
                }
                Opcode::NegF32 => self.unary(&mut state, &reader, self.roots.f32_type())?,
                Opcode::NegF64 => self.unary(&mut state, &reader, self.roots.f64_type())?,
                Opcode::NotB => self.unary(&mut state, &reader, self.roots.boolean_type())?,

                // Conversions replace the top with the target width.
                Opcode::TruncI8 => self.unary(&mut state, &reader, self.roots.i8_type())?,
                Opcode::TruncI16 | Opcode::SextI16From8 | Opcode::ZextI16 => {
                    self.unary(&mut state, &reader, self.roots.i16_type())?;
                }
                Opcode::TruncI32
                | Opcode::SextI32From8
                | Opcode::SextI32From16
                | Opcode::ZextI32
                | Opcode::FcvtI32
                | Opcode::FtoI32 => {
                    self.unary(&mut state, &reader, self.roots.i32_type())?;
                }
                Opcode::SextI64From8
                | Opcode::SextI64From16
                | Opcode::SextI64From32
                | Opcode::ZextI64
                | Opcode::FcvtI64
                | Opcode::FtoI64 => {
                    self.unary(&mut state, &reader, self.roots.i64_type())?;
                }
                Opcode::TruncF32 | Opcode::IcvtF32 | Opcode::ItoF32 => {
                    self.unary(&mut state, &reader, self.roots.f32_type())?;
                }
                Opcode::ExtF64 | Opcode::IcvtF64 | Opcode::ItoF64 => {
                    self.unary(&mut state, &reader, self.roots.f64_type())?;
                }
            }
        }
    }

    // =========================================================================
    // Opcode helpers
    // =========================================================================

    /// Retarget `state` at a block entry and queue it.
    fn branch_to(&mut self, mut state: FrameState, block_index: i64) -> BuildResult<()> {
        let offset = self.block_offset(block_index)?;
        state.set_pc_offset(offset);
        self.worklist.push(state);
        Ok(())
    }

    fn block_offset(&self, block_index: i64) -> BuildResult<u32> {
        self.function
            .block_offset(block_index)
            .ok_or(BuildError::InvalidBlockIndex { index: block_index })
    }

    /// Snapshot the frame for the safe point just past the opcode's
    /// immediates: the pc the collector observes while the callee or
    /// allocator runs.
    fn record_safe_point(&mut self, state: &mut FrameState, reader: &BytecodeReader<'_>) {
        state.set_pc_offset(reader.offset() as u32);
        self.maps.push(state.clone());
    }

    fn binary(
        &self,
        state: &mut FrameState,
        reader: &BytecodeReader<'_>,
        result: TypeRef,
    ) -> BuildResult<()> {
        pop(state, reader)?;
        pop(state, reader)?;
        state.push(result);
        Ok(())
    }

    fn unary(
        &self,
        state: &mut FrameState,
        reader: &BytecodeReader<'_>,
        result: TypeRef,
    ) -> BuildResult<()> {
        pop(state, reader)?;
        state.push(result);
        Ok(())
    }

    /// Pop the callee's value arguments, substitute its return type
    /// against the pending type arguments, and push the result.
    fn apply_call(
        &self,
        state: &mut FrameState,
        reader: &BytecodeReader<'_>,
        callee: &Function,
    ) -> BuildResult<()> {
        if !state.pop_n(callee.parameter_types().len()) {
            return Err(BuildError::StackUnderflow {
                pc_offset: reader.offset() as u32,
            });
        }
        let return_type =
            state
                .substitute_return_type(callee)
                .ok_or(BuildError::TypeArgumentMismatch {
                    pc_offset: reader.offset() as u32,
                })?;
        state.clear_type_args();
        state.push(return_type);
        Ok(())
    }

    /// Pop the class's type arguments and build the instantiated type
    /// an allocation pushes.
    fn instantiate(
        &self,
        state: &mut FrameState,
        reader: &BytecodeReader<'_>,
        class: ClassId,
    ) -> BuildResult<TypeRef> {
        let count = self.class_handle(class)?.type_parameter_count();
        let type_args = state
            .take_type_args(count)
            .ok_or(BuildError::TypeArgumentUnderflow {
                pc_offset: reader.offset() as u32,
            })?;
        Ok(Type::object(class, type_args))
    }

    /// Push an instantiation-pool type onto the type-argument stack.
    fn push_inst_type(
        &self,
        state: &mut FrameState,
        reader: &BytecodeReader<'_>,
        index: i64,
    ) -> BuildResult<()> {
        let ty = self
            .function
            .inst_type(index)
            .ok_or(BuildError::UnresolvedReference {
                kind: "instantiation type",
                index,
            })?;
        if !state.push_type_arg(ty) {
            return Err(BuildError::PrimitiveTypeArgument {
                pc_offset: reader.offset() as u32,
            });
        }
        Ok(())
    }

    /// Shared body of the field loads: pop the receiver and push the
    /// field's type, substituted for the receiver's instantiation when
    /// the declared type is a reference.
    fn load_field(
        &self,
        state: &mut FrameState,
        reader: &BytecodeReader<'_>,
        field_class: ClassId,
        name_index: i64,
    ) -> BuildResult<()> {
        let name = self
            .package
            .name_at(name_index)
            .ok_or(BuildError::UnresolvedReference {
                kind: "name",
                index: name_index,
            })?;
        let class = self.class_handle(field_class)?;
        let field_ty = class
            .find_field(&name)
            .map(|field| field.ty.clone())
            .ok_or(BuildError::UnknownField { name })?;
        let receiver = pop(state, reader)?;
        let ty = if field_ty.is_object() {
            let receiver_class =
                receiver
                    .effective_class()
                    .ok_or(BuildError::MissingReceiverClass {
                        pc_offset: reader.offset() as u32,
                    })?;
            let in_receiver =
                substitute_for_inheritance(&field_ty, receiver_class, field_class, self.registry)
                    .ok_or(BuildError::MissingSupertype {
                        derived: receiver_class,
                        base: field_class,
                    })?;
            substitute(&in_receiver, &receiver.type_argument_bindings(self.registry))
        } else {
            field_ty
        };
        state.push(ty);
        Ok(())
    }

    // =========================================================================
    // Resolution helpers
    // =========================================================================

    fn resolve_class(&self, class_id: i64) -> BuildResult<ClassId> {
        if let Some(builtin) = BuiltinId::from_raw(class_id) {
            self.roots
                .builtin_class(builtin)
                .ok_or(BuildError::UnresolvedReference {
                    kind: "builtin class",
                    index: class_id,
                })
        } else {
            self.package
                .class(class_id)
                .ok_or(BuildError::UnresolvedReference {
                    kind: "class",
                    index: class_id,
                })
        }
    }

    fn class_handle(&self, class: ClassId) -> BuildResult<Arc<Class>> {
        self.registry
            .get(class)
            .ok_or(BuildError::UnresolvedReference {
                kind: "class",
                index: class.index() as i64,
            })
    }

    fn dependency(&self, index: i64) -> BuildResult<Arc<PackageDependency>> {
        self.package
            .dependency(index)
            .ok_or(BuildError::UnresolvedReference {
                kind: "dependency",
                index,
            })
    }

    fn builtin_type(&self, id: BuiltinId) -> BuildResult<TypeRef> {
        self.builtin_type_for(id, id.raw())
    }

    fn builtin_type_for(&self, id: BuiltinId, raw: i64) -> BuildResult<TypeRef> {
        self.roots
            .builtin_type(id)
            .ok_or(BuildError::UnresolvedReference {
                kind: "builtin class",
                index: raw,
            })
    }
}

fn pop(state: &mut FrameState, reader: &BytecodeReader<'_>) -> BuildResult<TypeRef> {
    state.pop().ok_or(BuildError::StackUnderflow {
        pc_offset: reader.offset() as u32,
    })
}

/// Compare a block's recorded entry state against a later arrival.
fn check_join(
    seen: Option<&FrameState>,
    arrived: &FrameState,
    pc_offset: u32,
) -> BuildResult<()> {
    let Some(seen) = seen else {
        return Ok(());
    };
    let same_shape = seen.size() == arrived.size()
        && seen
            .type_map()
            .iter()
            .zip(arrived.type_map())
            .all(|(a, b)| a.is_object() == b.is_object());
    if !same_shape {
        return Err(BuildError::JoinMismatch { pc_offset });
    }
    Ok(())
}
