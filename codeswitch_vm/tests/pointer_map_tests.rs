//! End-to-end tests for the stack pointer map builder over hand-assembled
//! functions.

use codeswitch_bytecode::{BytecodeWriter, Opcode};
use codeswitch_gc::StackPointerMap;
use codeswitch_runtime::{
    BuiltinId, ClassBody, ClassId, ClassRegistry, DefnId, Field, Function, FunctionInit, Name,
    Package, Roots, Type, TypeRef, WORD_SIZE,
};
use codeswitch_vm::{build_stack_pointer_map, BuildConfig, BuildError};
use std::sync::Arc;

// =============================================================================
// Harness
// =============================================================================

struct Vm {
    registry: ClassRegistry,
    roots: Roots,
    package: Arc<Package>,
}

impl Vm {
    fn new() -> Vm {
        let registry = ClassRegistry::new();
        let roots = Roots::new(&registry);
        let package = Package::new(Name::simple("test"));
        Vm {
            registry,
            roots,
            package,
        }
    }

    fn function(&self, configure: impl FnOnce(&mut FunctionInit)) -> Function {
        let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), self.roots.unit_type());
        configure(&mut init);
        Function::new(init).unwrap()
    }

    /// Install a package function and return its wire index.
    fn install(&self, configure: impl FnOnce(&mut FunctionInit)) -> i64 {
        let function = self.function(configure);
        self.package.add_function(function);
        (self.package.function_count() - 1) as i64
    }

    fn build(&self, function: &Function) -> StackPointerMap {
        build_stack_pointer_map(
            function,
            &self.package,
            &self.roots,
            &self.registry,
            &BuildConfig { verify_joins: true },
        )
        .unwrap()
    }

    fn string_type(&self) -> TypeRef {
        self.roots.builtin_type(BuiltinId::STRING_CLASS).unwrap()
    }
}

/// Collect a locals region as booleans, front to top.
fn region_bits(map: &StackPointerMap, pc_offset: u32) -> Vec<bool> {
    let region = map.locals_region(pc_offset).expect("safe point");
    let bitmap = map.bitmap();
    (region.offset..region.offset + region.count)
        .map(|bit| bitmap.get(bit))
        .collect()
}

fn parameter_bits(map: &StackPointerMap) -> Vec<bool> {
    let region = map.parameters_region();
    let bitmap = map.bitmap();
    (region.offset..region.offset + region.count)
        .map(|bit| bitmap.get(bit))
        .collect()
}

// =============================================================================
// Straight-line scenarios
// =============================================================================

#[test]
fn empty_return_yields_empty_map() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Unit).op(Opcode::Ret);
    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 0);
    assert_eq!(map.bitmap_length(), 0);
}

#[test]
fn allocation_records_safe_point_before_push() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);
    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 1);
    assert_eq!(map.pc_offset(0), safe_pc);
    // No locals and the result is not yet pushed: the region is empty.
    assert_eq!(map.map_count(0), 0);
    assert_eq!(map.bitmap_length(), 0);
    assert!(map.has_locals_region(safe_pc));
    assert!(!map.has_locals_region(0));
}

#[test]
fn reference_parameter_sets_parameters_region() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::LdLocal).vbn(0);
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);
    let string = vm.string_type();
    let function = vm.function(|init| {
        init.parameter_types = vec![string];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 0);
    assert_eq!(parameter_bits(&map), vec![true]);
}

#[test]
fn mixed_parameters_region_tracks_declared_types() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Unit).op(Opcode::Ret);
    let string = vm.string_type();
    let i64_ty = vm.roots.i64_type();
    let null_ty = vm.roots.null_type();
    let function = vm.function(|init| {
        init.parameter_types = vec![i64_ty, string, null_ty];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(parameter_bits(&map), vec![false, true, true]);
    assert_eq!(map.bitmap_length(), 3);
    let slots: Vec<usize> = map.parameter_pointer_slots().collect();
    assert_eq!(slots, vec![1, 2]);
}

#[test]
fn call_snapshots_locals_holding_references() {
    let vm = Vm::new();
    let string = vm.string_type();
    let callee = vm.install(|init| {
        init.return_type = string;
    });

    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Null);
    asm.op(Opcode::StLocal).vbn(-1);
    asm.op(Opcode::CallFunction).vbn(callee);
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);
    let function = vm.function(|init| {
        init.locals_size = WORD_SIZE;
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 1);
    assert_eq!(map.pc_offset(0), safe_pc);
    // One local, holding the stored null reference.
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
    assert_eq!(parameter_bits(&map), Vec::<bool>::new());
}

#[test]
fn call_return_type_is_tracked_after_the_call() {
    let vm = Vm::new();
    let string = vm.string_type();
    let callee = vm.install(|init| {
        init.return_type = string;
    });

    // Call, then allocate: the second safe point sees the callee's
    // returned reference on the stack.
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::CallFunction).vbn(callee);
    let call_pc = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let alloc_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);
    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 2);
    assert_eq!(region_bits(&map, call_pc), Vec::<bool>::new());
    assert_eq!(region_bits(&map, alloc_pc), vec![true]);
}

#[test]
fn primitive_operands_stay_clear_in_snapshots() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::I64).vbn(5);
    asm.op(Opcode::Null);
    asm.op(Opcode::True);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(4);
    asm.op(Opcode::Unit).op(Opcode::Ret);
    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![false, true, false]);
}

// =============================================================================
// Control flow
// =============================================================================

#[test]
fn branch_merge_is_visited_once() {
    let vm = Vm::new();

    // block0: true, branchif 1 2
    // block1: nul, branch 3
    // block2: nul, branch 3
    // block3: allocobj String; drop; drop; unit; ret
    let mut asm = BytecodeWriter::new();
    let b0 = asm.offset() as u32;
    asm.op(Opcode::True);
    asm.op(Opcode::BranchIf).vbn(1).vbn(2);
    let b1 = asm.offset() as u32;
    asm.op(Opcode::Null);
    asm.op(Opcode::Branch).vbn(3);
    let b2 = asm.offset() as u32;
    asm.op(Opcode::Null);
    asm.op(Opcode::Branch).vbn(3);
    let b3 = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![b0, b1, b2, b3];
    });

    let map = vm.build(&function);
    // The merged block emits its safe point exactly once.
    assert_eq!(map.entry_count(), 1);
    assert_eq!(map.pc_offset(0), safe_pc);
    assert_eq!(region_bits(&map, safe_pc), vec![true]);

    // Rebuilding yields a bitwise-equal map.
    assert_eq!(vm.build(&function), map);
}

#[test]
fn join_mismatch_is_detected_when_verifying() {
    let vm = Vm::new();

    // block1 arrives with a reference on the stack, block2 with an i64.
    let mut asm = BytecodeWriter::new();
    let b0 = asm.offset() as u32;
    asm.op(Opcode::True);
    asm.op(Opcode::BranchIf).vbn(1).vbn(2);
    let b1 = asm.offset() as u32;
    asm.op(Opcode::Null);
    asm.op(Opcode::Branch).vbn(3);
    let b2 = asm.offset() as u32;
    asm.op(Opcode::I64).vbn(0);
    asm.op(Opcode::Branch).vbn(3);
    let b3 = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![b0, b1, b2, b3];
    });

    let result = build_stack_pointer_map(
        &function,
        &vm.package,
        &vm.roots,
        &vm.registry,
        &BuildConfig { verify_joins: true },
    );
    assert!(matches!(
        result.unwrap_err(),
        BuildError::JoinMismatch { .. }
    ));
}

#[test]
fn try_entry_snapshots_the_pushed_exception() {
    let vm = Vm::new();

    // block0: nul; stlocal -1; pushtry 1 2
    // block1 (try): unit; ret
    // block2 (catch): drop; unit; ret
    let mut asm = BytecodeWriter::new();
    let b0 = asm.offset() as u32;
    asm.op(Opcode::Null);
    asm.op(Opcode::StLocal).vbn(-1);
    asm.op(Opcode::PushTry).vbn(1).vbn(2);
    let b1 = asm.offset() as u32;
    asm.op(Opcode::Unit).op(Opcode::Ret);
    let b2 = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.locals_size = WORD_SIZE;
        init.instructions = asm.finish();
        init.block_offsets = vec![b0, b1, b2];
    });

    let map = vm.build(&function);
    // The entry holds at the catch block's entry offset, with the
    // exception reference on top of the local.
    assert_eq!(map.entry_count(), 1);
    assert_eq!(map.pc_offset(0), b2);
    assert_eq!(region_bits(&map, b2), vec![true, true]);
}

#[test]
fn branchl_fans_out_to_every_successor() {
    let vm = Vm::new();

    // block0: label 1; branchl 2 [1, 2]
    // block1: allocobj; drop; unit; ret
    // block2: allocobj; drop; unit; ret
    let mut asm = BytecodeWriter::new();
    let b0 = asm.offset() as u32;
    asm.op(Opcode::Label).vbn(1);
    asm.op(Opcode::BranchL).vbn(2).vbn(1).vbn(2);
    let b1 = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe1 = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);
    let b2 = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe2 = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![b0, b1, b2];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 2);
    assert!(map.has_locals_region(safe1));
    assert!(map.has_locals_region(safe2));
}

#[test]
fn cast_class_branch_refines_only_the_true_successor() {
    let vm = Vm::new();
    let string = vm.string_type();

    // Pending type arg String; the checked value is a reference either
    // way, so both successors snapshot one set bit.
    // block0: ldlocal 0; label's class operand stand-in: dup; castcbr 1 2
    // block1: allocobj; dropi 2; unit; ret
    // block2: allocobj; dropi 2; unit; ret
    let mut asm = BytecodeWriter::new();
    let b0 = asm.offset() as u32;
    asm.op(Opcode::LdLocal).vbn(0);
    asm.op(Opcode::Dup);
    asm.op(Opcode::TypeStatic).vbn(0);
    asm.op(Opcode::CastClassBranch).vbn(1).vbn(2);
    let b1 = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe1 = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(2);
    asm.op(Opcode::Unit).op(Opcode::Ret);
    let b2 = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe2 = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(2);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let object_param = vm.roots.builtin_type(BuiltinId::OBJECT_CLASS).unwrap();
    let function = vm.function(|init| {
        init.parameter_types = vec![object_param];
        init.inst_types = vec![string];
        init.instructions = asm.finish();
        init.block_offsets = vec![b0, b1, b2];
    });

    let map = vm.build(&function);
    assert_eq!(map.entry_count(), 2);
    assert_eq!(region_bits(&map, safe1), vec![true]);
    assert_eq!(region_bits(&map, safe2), vec![true]);
}

// =============================================================================
// Builtins and type operands
// =============================================================================

#[test]
fn builtin_call_resolves_through_roots() {
    let vm = Vm::new();
    let string = vm.string_type();
    let builtin_id = BuiltinId::from_raw(-42).unwrap();
    let callee = vm.function(|init| {
        init.return_type = string;
        init.builtin_id = Some(builtin_id);
    });
    vm.roots.define_builtin_function(builtin_id, Arc::new(callee));

    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::CallFunction).vbn(builtin_id.raw());
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    // The builtin's returned reference is live at the allocation.
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
}

#[test]
fn tyd_pushes_a_reified_type_and_cast_consumes_the_pending_arg() {
    let vm = Vm::new();
    let string = vm.string_type();

    // tyd leaves a Type reference on the stack and the pending arg for
    // the cast, which retypes that value.
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::TypeDynamic).vbn(0);
    asm.op(Opcode::Cast);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(2);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.inst_types = vec![string];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
}

#[test]
fn pkg_pushes_a_package_reference() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Pkg).vbn(0);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(2);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
}

// =============================================================================
// Generics and fields
// =============================================================================

#[test]
fn generic_call_substitutes_the_return_type() {
    let vm = Vm::new();
    let string = vm.string_type();

    // callee: [T] () -> T
    let parameter = Arc::new(codeswitch_runtime::TypeParameter::new(
        DefnId::next(),
        Name::simple("T"),
        None,
    ));
    let callee = vm.install(|init| {
        init.return_type = Type::variable(parameter.clone());
        init.type_parameters = vec![parameter.clone()];
    });

    // tys String; callg callee; allocobj -> snapshot sees the returned
    // String as a reference.
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::TypeStatic).vbn(0);
    asm.op(Opcode::CallFunction).vbn(callee);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.inst_types = vec![string];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
}

#[test]
fn generic_allocation_consumes_pending_type_args() {
    let vm = Vm::new();
    let string = vm.string_type();

    // class Box[T]
    let t = Arc::new(codeswitch_runtime::TypeParameter::new(
        DefnId::next(),
        Name::simple("T"),
        None,
    ));
    let box_class = vm.registry.allocate(DefnId::next(), Name::simple("Box"));
    vm.registry
        .get(box_class)
        .unwrap()
        .define(ClassBody {
            type_parameters: vec![t],
            ..ClassBody::default()
        })
        .unwrap();
    vm.package.add_class(box_class);

    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::TypeStatic).vbn(0);
    asm.op(Opcode::AllocObj).vbn(0);
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.inst_types = vec![string];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    // Snapshot is taken before the instantiated Box[String] is pushed.
    assert_eq!(region_bits(&map, safe_pc), Vec::<bool>::new());
}

#[test]
fn field_load_substitutes_reference_fields_only() {
    let vm = Vm::new();
    let string = vm.string_type();

    // class Box[T] { value: T; count: i64 }
    let t = Arc::new(codeswitch_runtime::TypeParameter::new(
        DefnId::next(),
        Name::simple("T"),
        None,
    ));
    let box_class = vm.registry.allocate(DefnId::next(), Name::simple("Box"));
    vm.registry
        .get(box_class)
        .unwrap()
        .define(ClassBody {
            type_parameters: vec![t.clone()],
            fields: vec![
                Field {
                    name: Name::simple("value"),
                    flags: 0,
                    ty: Type::variable(t),
                },
                Field {
                    name: Name::simple("count"),
                    flags: 0,
                    ty: vm.roots.i64_type(),
                },
            ],
            ..ClassBody::default()
        })
        .unwrap();
    vm.package.add_class(box_class);
    vm.package.add_name(Name::simple("value"));
    vm.package.add_name(Name::simple("count"));

    // Parameter: Box[String]. Load both fields, then snapshot.
    let receiver = Type::object(box_class, [string]);

    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::LdLocal).vbn(0);
    asm.op(Opcode::LdField).vbn(0).vbn(0); // value: T -> String
    asm.op(Opcode::LdLocal).vbn(0);
    asm.op(Opcode::LdField).vbn(0).vbn(1); // count: i64
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(3);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.parameter_types = vec![receiver];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(parameter_bits(&map), vec![true]);
    // Stack at the allocation: substituted String field, then i64 field.
    assert_eq!(region_bits(&map, safe_pc), vec![true, false]);
}

#[test]
fn element_load_uses_the_class_element_type() {
    let vm = Vm::new();
    let string = vm.string_type();

    // An array class whose elements are strings.
    let array_class = vm
        .registry
        .allocate(DefnId::next(), Name::simple("StringArray"));
    vm.registry
        .get(array_class)
        .unwrap()
        .define(ClassBody {
            element_type: Some(string),
            ..ClassBody::default()
        })
        .unwrap();
    vm.package.add_class(array_class);

    // The receiver is on top, above the index.
    let receiver = Type::object(array_class, []);
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::I32).vbn(0);
    asm.op(Opcode::LdLocal).vbn(0);
    asm.op(Opcode::LdElement);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(2);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.parameter_types = vec![receiver];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
}

#[test]
fn array_allocation_pops_the_length_first() {
    let vm = Vm::new();
    let string = vm.string_type();

    let t = Arc::new(codeswitch_runtime::TypeParameter::new(
        DefnId::next(),
        Name::simple("T"),
        None,
    ));
    let array_class = vm.registry.allocate(DefnId::next(), Name::simple("Array"));
    vm.registry
        .get(array_class)
        .unwrap()
        .define(ClassBody {
            type_parameters: vec![t.clone()],
            element_type: Some(Type::variable(t)),
            ..ClassBody::default()
        })
        .unwrap();
    vm.package.add_class(array_class);

    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::TypeStatic).vbn(0);
    asm.op(Opcode::I32).vbn(16); // length
    asm.op(Opcode::AllocArr).vbn(0);
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::Drop).op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.inst_types = vec![string];
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    // The length was consumed before the snapshot.
    assert_eq!(region_bits(&map, safe_pc), Vec::<bool>::new());
}

// =============================================================================
// Edge-case opcode semantics
// =============================================================================

#[test]
fn foreign_global_store_pops_exactly_one_value() {
    let vm = Vm::new();
    // stgf only consumes its immediates and one stack value; the
    // following snapshot proves the stack height.
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Null);
    asm.op(Opcode::Null);
    asm.op(Opcode::StGlobalForeign).vbn(0).vbn(0);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(2);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![true]);
}

#[test]
fn swap2_exchanges_top_with_depth_two() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Null);
    asm.op(Opcode::Unit);
    asm.op(Opcode::Unit);
    asm.op(Opcode::Swap2);
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(4);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    // [null, unit, unit] became [unit, unit, null].
    assert_eq!(region_bits(&map, safe_pc), vec![false, false, true]);
}

#[test]
fn dupi_duplicates_a_deep_slot() {
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Null);
    asm.op(Opcode::Unit);
    asm.op(Opcode::DupI).vbn(1); // duplicate the null below the unit
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(3);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(region_bits(&map, safe_pc), vec![true, false, true]);
}

// =============================================================================
// Quantified properties
// =============================================================================

/// A branchy function touching most opcode families, with the expected
/// safe-point offsets collected during assembly.
fn build_property_subject(vm: &Vm) -> (Function, Vec<u32>) {
    let string = vm.string_type();
    let callee = vm.install(|init| {
        init.return_type = vm.roots.builtin_type(BuiltinId::OBJECT_CLASS).unwrap();
    });

    let mut safe_points = Vec::new();
    let mut asm = BytecodeWriter::new();

    // block0: set up a reference local, branch on a comparison.
    let b0 = asm.offset() as u32;
    asm.op(Opcode::Null);
    asm.op(Opcode::StLocal).vbn(-1);
    asm.op(Opcode::I32).vbn(1);
    asm.op(Opcode::I32).vbn(2);
    asm.op(Opcode::LtI32);
    asm.op(Opcode::BranchIf).vbn(1).vbn(2);

    // block1: allocate, stash it, branch to the join.
    let b1 = asm.offset() as u32;
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    safe_points.push(asm.offset() as u32);
    asm.op(Opcode::StLocal).vbn(-2);
    asm.op(Opcode::Branch).vbn(3);

    // block2: call instead, dropping the result.
    let b2 = asm.offset() as u32;
    asm.op(Opcode::CallFunction).vbn(callee);
    safe_points.push(asm.offset() as u32);
    asm.op(Opcode::StLocal).vbn(-2);
    asm.op(Opcode::Branch).vbn(3);

    // block3: one more call at the join, then return.
    let b3 = asm.offset() as u32;
    asm.op(Opcode::CallFunction).vbn(callee);
    safe_points.push(asm.offset() as u32);
    asm.op(Opcode::Drop);
    asm.op(Opcode::Unit);
    asm.op(Opcode::Ret);

    let function = vm.function(|init| {
        init.parameter_types = vec![string, vm.roots.i64_type()];
        init.locals_size = 2 * WORD_SIZE;
        init.instructions = asm.finish();
        init.block_offsets = vec![b0, b1, b2, b3];
    });
    (function, safe_points)
}

#[test]
fn properties_hold_for_a_branchy_function() {
    let vm = Vm::new();
    let (function, mut expected_safe_points) = build_property_subject(&vm);
    let map = vm.build(&function);
    let locals_slots = function.locals_size() / WORD_SIZE;
    let parameter_count = function.parameter_types().len();

    // 1. One entry per reachable allocation/call/pushtry.
    assert_eq!(map.entry_count(), expected_safe_points.len());

    // 2. Entries strictly increase in pc-offset.
    for i in 1..map.entry_count() {
        assert!(map.pc_offset(i - 1) < map.pc_offset(i));
    }

    // 3. Offsets tile the bitmap: parameters first, then each region.
    assert_eq!(map.map_offset(0), parameter_count);
    for i in 1..map.entry_count() {
        assert_eq!(map.map_offset(i), map.map_offset(i - 1) + map.map_count(i - 1));
    }
    let last = map.entry_count() - 1;
    assert_eq!(
        map.map_offset(last) + map.map_count(last),
        map.bitmap_length()
    );

    // 4. Locals are always present in every region.
    for i in 0..map.entry_count() {
        assert!(map.map_count(i) >= locals_slots);
    }

    // 6. Parameters region mirrors the declared types.
    let expected: Vec<bool> = function
        .parameter_types()
        .iter()
        .map(|ty| ty.is_object())
        .collect();
    assert_eq!(parameter_bits(&map), expected);

    // 7. has_locals_region is true exactly at safe points.
    expected_safe_points.sort_unstable();
    for pc in 0..=function.instructions_size() as u32 {
        assert_eq!(
            map.has_locals_region(pc),
            expected_safe_points.binary_search(&pc).is_ok(),
            "pc {}",
            pc
        );
    }

    // The function-level query agrees once the map is attached.
    function
        .attach_stack_pointer_map(Arc::new(map))
        .unwrap();
    assert!(function.has_pointer_map_at(expected_safe_points[0]));
    assert!(!function.has_pointer_map_at(0));
}

#[test]
fn snapshot_bits_match_reference_kinds() {
    // Property 5, spot-checked: every set bit corresponds to an
    // object-kind slot and vice versa, via a snapshot with a known
    // mixed shape.
    let vm = Vm::new();
    let mut asm = BytecodeWriter::new();
    asm.op(Opcode::Null); // local -1 value
    asm.op(Opcode::StLocal).vbn(-1);
    asm.op(Opcode::I64).vbn(0); // primitive operand
    asm.op(Opcode::String).vbn(0); // reference operand
    asm.op(Opcode::F64).f64(0.5); // primitive operand
    asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
    let safe_pc = asm.offset() as u32;
    asm.op(Opcode::DropI).vbn(4);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let function = vm.function(|init| {
        init.locals_size = WORD_SIZE;
        init.instructions = asm.finish();
        init.block_offsets = vec![0];
    });

    let map = vm.build(&function);
    assert_eq!(
        region_bits(&map, safe_pc),
        vec![true, false, true, false]
    );
    let slots: Vec<usize> = map.local_pointer_slots(safe_pc).unwrap().collect();
    assert_eq!(slots, vec![0, 2]);
}

// =============================================================================
// ClassId re-export sanity
// =============================================================================

#[test]
fn class_ids_flow_through_package_tables() {
    let vm = Vm::new();
    let class: ClassId = vm.registry.allocate(DefnId::next(), Name::simple("C"));
    vm.package.add_class(class);
    assert_eq!(vm.package.class(0), Some(class));
    assert_eq!(vm.package.class(1), None);
}
