//! Opcode catalogue.
//!
//! Byte values are assigned in catalogue order, starting at zero. The
//! operand shape of each opcode is fixed and noted in its doc comment
//! (`vbn` = variable-byte signed integer immediate).

use std::fmt;

macro_rules! opcodes {
    ($($(#[$meta:meta])* $name:ident => $mnemonic:literal,)*) => {
        /// A bytecode operation.
        ///
        /// The discriminant is the opcode's encoded byte value.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($(#[$meta])* $name,)*
        }

        const ALL_OPCODES: &[Opcode] = &[$(Opcode::$name,)*];

        impl Opcode {
            /// Number of opcodes in the catalogue.
            pub const COUNT: usize = ALL_OPCODES.len();

            /// Decode an opcode from its byte value.
            #[inline]
            pub fn from_u8(byte: u8) -> Option<Opcode> {
                ALL_OPCODES.get(byte as usize).copied()
            }

            /// Assembler mnemonic for this opcode.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    // ---- Stack manipulation ----
    /// No operation.
    Nop => "nop",
    /// Pop the top value.
    Drop => "drop",
    /// `dropi n`: pop the top `n` values.
    DropI => "dropi",
    /// Duplicate the top value.
    Dup => "dup",
    /// `dupi n`: duplicate the value at depth `n` onto the top.
    DupI => "dupi",
    /// Swap the top two values.
    Swap => "swap",
    /// Swap the top value with the value at depth 2.
    Swap2 => "swap2",

    // ---- Constants ----
    /// Push the unit value.
    Unit => "unit",
    /// Push boolean true.
    True => "true",
    /// Push boolean false.
    False => "false",
    /// Push the null reference.
    Null => "nul",
    /// Push an uninitialized reference slot (behaves as null).
    Uninitialized => "uninitialized",
    /// `i8 vbn`: push an 8-bit integer constant.
    I8 => "i8",
    /// `i16 vbn`: push a 16-bit integer constant.
    I16 => "i16",
    /// `i32 vbn`: push a 32-bit integer constant.
    I32 => "i32",
    /// `i64 vbn`: push a 64-bit integer constant.
    I64 => "i64",
    /// `f32 <4 bytes>`: push a 32-bit float constant.
    F32 => "f32",
    /// `f64 <8 bytes>`: push a 64-bit float constant.
    F64 => "f64",
    /// `string vbn`: push a string constant from the package string pool.
    String => "string",

    // ---- Locals and globals ----
    /// `ldlocal vbn`: push a local (negative slot) or parameter
    /// (non-negative slot).
    LdLocal => "ldlocal",
    /// `stlocal vbn`: pop into a local or parameter slot.
    StLocal => "stlocal",
    /// `ldg vbn`: push a global from the owning package.
    LdGlobal => "ldg",
    /// `ldgf vbn vbn`: push a global from a package dependency.
    LdGlobalForeign => "ldgf",
    /// `stg vbn`: pop into a global.
    StGlobal => "stg",
    /// `stgf vbn vbn`: pop into a dependency global.
    StGlobalForeign => "stgf",

    // ---- Fields ----
    /// `ldf vbn vbn`: pop a receiver, push the named field
    /// (class id, name index).
    LdField => "ldf",
    /// `ldff vbn vbn vbn`: foreign-class field load
    /// (dependency, extern class, name index).
    LdFieldForeign => "ldff",
    /// `stf vbn vbn`: pop a value and a receiver, store the named field.
    StField => "stf",
    /// `stff vbn vbn vbn`: foreign-class field store.
    StFieldForeign => "stff",

    // ---- Elements ----
    /// Pop a receiver (on top) and an index, push the element.
    LdElement => "lde",
    /// Pop a value, an index, and a receiver.
    StElement => "ste",

    // ---- Allocation ----
    /// `allocobj vbn`: allocate an object of the named class.
    AllocObj => "allocobj",
    /// `allocobjf vbn vbn`: allocate an object of a dependency class.
    AllocObjForeign => "allocobjf",
    /// `allocarr vbn`: pop a length, allocate an array of the named class.
    AllocArr => "allocarr",
    /// `allocarrf vbn vbn`: pop a length, allocate a dependency-class array.
    AllocArrForeign => "allocarrf",

    // ---- Type operations ----
    /// `tys vbn`: push an instantiation type onto the type-argument stack.
    TypeStatic => "tys",
    /// `tyd vbn`: like `tys`, and also push the reified `Type` value.
    TypeDynamic => "tyd",
    /// Replace the top value's static type with the pending type argument.
    Cast => "cast",
    /// Like `cast`, with an additional class operand popped.
    CastClass => "castc",
    /// `castcbr vbn vbn`: class-check branch; the true successor sees the
    /// refined type.
    CastClassBranch => "castcbr",

    // ---- Control flow ----
    /// `branch vbn`: unconditional branch to a block.
    Branch => "branch",
    /// `branchif vbn vbn`: pop a condition, branch to the true or false
    /// block.
    BranchIf => "branchif",
    /// `branchl vbn vbn...`: pop a label, branch to one of `n` blocks.
    BranchL => "branchl",
    /// `label vbn`: push a label value naming a block.
    Label => "label",
    /// `pushtry vbn vbn`: enter a try region (try block, catch block).
    PushTry => "pushtry",
    /// `poptry vbn`: leave a try region, continue at the done block.
    PopTry => "poptry",
    /// Pop an exception and unwind.
    Throw => "throw",
    /// Pop the return value and return.
    Ret => "ret",

    // ---- Calls ----
    /// `callg vbn`: call a function by id.
    CallFunction => "callg",
    /// `callv vbn`: call a method virtually by id.
    CallVirtual => "callv",
    /// `callgf vbn vbn`: call a dependency function.
    CallFunctionForeign => "callgf",
    /// `callvf vbn vbn`: call a dependency method virtually.
    CallVirtualForeign => "callvf",

    // ---- Package access ----
    /// `pkg vbn`: push a package reference.
    Pkg => "pkg",

    // ---- i8 arithmetic and bitwise ----
    /// i8 addition.
    AddI8 => "addi8",
    /// i8 subtraction.
    SubI8 => "subi8",
    /// i8 multiplication.
    MulI8 => "muli8",
    /// i8 division.
    DivI8 => "divi8",
    /// i8 remainder.
    ModI8 => "modi8",
    /// i8 shift left.
    LslI8 => "lsli8",
    /// i8 logical shift right.
    LsrI8 => "lsri8",
    /// i8 arithmetic shift right.
    AsrI8 => "asri8",
    /// i8 bitwise and.
    AndI8 => "andi8",
    /// i8 bitwise or.
    OrI8 => "ori8",
    /// i8 bitwise xor.
    XorI8 => "xori8",

    // ---- i16 arithmetic and bitwise ----
    /// i16 addition.
    AddI16 => "addi16",
    /// i16 subtraction.
    SubI16 => "subi16",
    /// i16 multiplication.
    MulI16 => "muli16",
    /// i16 division.
    DivI16 => "divi16",
    /// i16 remainder.
    ModI16 => "modi16",
    /// i16 shift left.
    LslI16 => "lsli16",
    /// i16 logical shift right.
    LsrI16 => "lsri16",
    /// i16 arithmetic shift right.
    AsrI16 => "asri16",
    /// i16 bitwise and.
    AndI16 => "andi16",
    /// i16 bitwise or.
    OrI16 => "ori16",
    /// i16 bitwise xor.
    XorI16 => "xori16",

    // ---- i32 arithmetic and bitwise ----
    /// i32 addition.
    AddI32 => "addi32",
    /// i32 subtraction.
    SubI32 => "subi32",
    /// i32 multiplication.
    MulI32 => "muli32",
    /// i32 division.
    DivI32 => "divi32",
    /// i32 remainder.
    ModI32 => "modi32",
    /// i32 shift left.
    LslI32 => "lsli32",
    /// i32 logical shift right.
    LsrI32 => "lsri32",
    /// i32 arithmetic shift right.
    AsrI32 => "asri32",
    /// i32 bitwise and.
    AndI32 => "andi32",
    /// i32 bitwise or.
    OrI32 => "ori32",
    /// i32 bitwise xor.
    XorI32 => "xori32",

    // ---- i64 arithmetic and bitwise ----
    /// i64 addition.
    AddI64 => "addi64",
    /// i64 subtraction.
    SubI64 => "subi64",
    /// i64 multiplication.
    MulI64 => "muli64",
    /// i64 division.
    DivI64 => "divi64",
    /// i64 remainder.
    ModI64 => "modi64",
    /// i64 shift left.
    LslI64 => "lsli64",
    /// i64 logical shift right.
    LsrI64 => "lsri64",
    /// i64 arithmetic shift right.
    AsrI64 => "asri64",
    /// i64 bitwise and.
    AndI64 => "andi64",
    /// i64 bitwise or.
    OrI64 => "ori64",
    /// i64 bitwise xor.
    XorI64 => "xori64",

    // ---- Float arithmetic ----
    /// f32 addition.
    AddF32 => "addf32",
    /// f32 subtraction.
    SubF32 => "subf32",
    /// f32 multiplication.
    MulF32 => "mulf32",
    /// f32 division.
    DivF32 => "divf32",
    /// f64 addition.
    AddF64 => "addf64",
    /// f64 subtraction.
    SubF64 => "subf64",
    /// f64 multiplication.
    MulF64 => "mulf64",
    /// f64 division.
    DivF64 => "divf64",

    // ---- Comparisons (push boolean) ----
    /// i8 equality.
    EqI8 => "eqi8",
    /// i16 equality.
    EqI16 => "eqi16",
    /// i32 equality.
    EqI32 => "eqi32",
    /// i64 equality.
    EqI64 => "eqi64",
    /// f32 equality.
    EqF32 => "eqf32",
    /// f64 equality.
    EqF64 => "eqf64",
    /// Reference equality.
    EqP => "eqp",
    /// i8 inequality.
    NeI8 => "nei8",
    /// i16 inequality.
    NeI16 => "nei16",
    /// i32 inequality.
    NeI32 => "nei32",
    /// i64 inequality.
    NeI64 => "nei64",
    /// f32 inequality.
    NeF32 => "nef32",
    /// f64 inequality.
    NeF64 => "nef64",
    /// Reference inequality.
    NeP => "nep",
    /// i8 less-than.
    LtI8 => "lti8",
    /// i16 less-than.
    LtI16 => "lti16",
    /// i32 less-than.
    LtI32 => "lti32",
    /// i64 less-than.
    LtI64 => "lti64",
    /// f32 less-than.
    LtF32 => "ltf32",
    /// f64 less-than.
    LtF64 => "ltf64",
    /// i8 less-or-equal.
    LeI8 => "lei8",
    /// i16 less-or-equal.
    LeI16 => "lei16",
    /// i32 less-or-equal.
    LeI32 => "lei32",
    /// i64 less-or-equal.
    LeI64 => "lei64",
    /// f32 less-or-equal.
    LeF32 => "lef32",
    /// f64 less-or-equal.
    LeF64 => "lef64",
    /// i8 greater-than.
    GtI8 => "gti8",
    /// i16 greater-than.
    GtI16 => "gti16",
    /// i32 greater-than.
    GtI32 => "gti32",
    /// i64 greater-than.
    GtI64 => "gti64",
    /// f32 greater-than.
    GtF32 => "gtf32",
    /// f64 greater-than.
    GtF64 => "gtf64",
    /// i8 greater-or-equal.
    GeI8 => "gei8",
    /// i16 greater-or-equal.
    GeI16 => "gei16",
    /// i32 greater-or-equal.
    GeI32 => "gei32",
    /// i64 greater-or-equal.
    GeI64 => "gei64",
    /// f32 greater-or-equal.
    GeF32 => "gef32",
    /// f64 greater-or-equal.
    GeF64 => "gef64",

    // ---- Unary ----
    /// i8 negation.
    NegI8 => "negi8",
    /// i8 bitwise inversion.
    InvI8 => "invi8",
    /// i16 negation.
    NegI16 => "negi16",
    /// i16 bitwise inversion.
    InvI16 => "invi16",
    /// i32 negation.
    NegI32 => "negi32",
    /// i32 bitwise inversion.
    InvI32 => "invi32",
    /// i64 negation.
    NegI64 => "negi64",
    /// i64 bitwise inversion.
    InvI64 => "invi64",
    /// f32 negation.
    NegF32 => "negf32",
    /// f64 negation.
    NegF64 => "negf64",
    /// Boolean not.
    NotB => "notb",

    // ---- Conversions ----
    /// Truncate to i8.
    TruncI8 => "trunci8",
    /// Truncate to i16.
    TruncI16 => "trunci16",
    /// Sign-extend i8 to i16.
    SextI16From8 => "sexti16_8",
    /// Zero-extend to i16.
    ZextI16 => "zexti16",
    /// Truncate to i32.
    TruncI32 => "trunci32",
    /// Sign-extend i8 to i32.
    SextI32From8 => "sexti32_8",
    /// Sign-extend i16 to i32.
    SextI32From16 => "sexti32_16",
    /// Zero-extend to i32.
    ZextI32 => "zexti32",
    /// Convert float to i32.
    FcvtI32 => "fcvti32",
    /// Reinterpret f32 bits as i32.
    FtoI32 => "ftoi32",
    /// Sign-extend i8 to i64.
    SextI64From8 => "sexti64_8",
    /// Sign-extend i16 to i64.
    SextI64From16 => "sexti64_16",
    /// Sign-extend i32 to i64.
    SextI64From32 => "sexti64_32",
    /// Zero-extend to i64.
    ZextI64 => "zexti64",
    /// Convert float to i64.
    FcvtI64 => "fcvti64",
    /// Reinterpret f64 bits as i64.
    FtoI64 => "ftoi64",
    /// Truncate f64 to f32.
    TruncF32 => "truncf32",
    /// Convert integer to f32.
    IcvtF32 => "icvtf32",
    /// Reinterpret i32 bits as f32.
    ItoF32 => "itof32",
    /// Extend f32 to f64.
    ExtF64 => "extf64",
    /// Convert integer to f64.
    IcvtF64 => "icvtf64",
    /// Reinterpret i64 bits as f64.
    ItoF64 => "itof64",
}

impl Opcode {
    /// Check whether this opcode always terminates a basic block.
    ///
    /// Calls do not terminate blocks; control continues at the next
    /// instruction after the callee returns.
    #[inline]
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Opcode::Branch
                | Opcode::BranchIf
                | Opcode::BranchL
                | Opcode::PushTry
                | Opcode::PopTry
                | Opcode::CastClassBranch
                | Opcode::Throw
                | Opcode::Ret
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
