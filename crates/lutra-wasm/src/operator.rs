//! Decoded bytecode operators.

use crate::operand::{BranchDepth, LocalIndex};
use crate::types::ValueType;

/// Result type of a block-like control region.
///
/// The single-value form of the binary format; multi-value block types are
/// not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    /// The region yields no value.
    Empty,
    /// The region yields exactly one value of the given type.
    Value(ValueType),
}

impl BlockType {
    /// The region's result type, if any.
    #[inline]
    pub const fn result(self) -> Option<ValueType> {
        match self {
            BlockType::Empty => None,
            BlockType::Value(ty) => Some(ty),
        }
    }

    /// Declared result arity of the region.
    #[inline]
    pub const fn result_arity(self) -> usize {
        match self {
            BlockType::Empty => 0,
            BlockType::Value(_) => 1,
        }
    }
}

/// One decoded stack-machine operator.
///
/// The external container decoder produces these one at a time; the
/// compiler's translation loop consumes them in order. Every operation the
/// decoder can emit is an explicit variant here — consumers dispatch over
/// the full set and map anything outside their implemented subset to a
/// single "unsupported" failure rather than silently ignoring it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operator {
    /// Do nothing.
    Nop,
    /// Trap unconditionally.
    Unreachable,
    /// Open a block region with the given result type.
    Block {
        /// Declared result type of the block.
        ty: BlockType,
    },
    /// Open a loop region with the given result type.
    Loop {
        /// Declared result type of the loop.
        ty: BlockType,
    },
    /// Open a conditional region, consuming an `i32` condition.
    If {
        /// Declared result type of the conditional.
        ty: BlockType,
    },
    /// Switch to the alternative arm of the innermost `if` region.
    Else,
    /// Close the innermost open control region.
    End,
    /// Branch to the region at the given relative depth.
    Br {
        /// Target region depth; 0 is the innermost open region.
        depth: BranchDepth,
    },
    /// Conditionally branch to the region at the given relative depth.
    BrIf {
        /// Target region depth; 0 is the innermost open region.
        depth: BranchDepth,
    },
    /// Return from the function.
    Return {
        /// Number of ignored trailing stack values to drop before the
        /// return values are taken.
        drop_count: u32,
    },
    /// Discard the top stack value.
    Drop,
    /// Push the current value of a local.
    LocalGet {
        /// Which local to read.
        local: LocalIndex,
    },
    /// Pop a value into a local.
    LocalSet {
        /// Which local to write.
        local: LocalIndex,
    },
    /// Write the top stack value into a local without popping it.
    LocalTee {
        /// Which local to write.
        local: LocalIndex,
    },
    /// Push a 32-bit integer constant.
    I32Const {
        /// The constant value.
        value: i32,
    },
    /// Push a 64-bit integer constant.
    I64Const {
        /// The constant value.
        value: i64,
    },
    /// Push a 32-bit float constant.
    F32Const {
        /// The constant value.
        value: f32,
    },
    /// Push a 64-bit float constant.
    F64Const {
        /// The constant value.
        value: f64,
    },
    /// 32-bit integer addition (wrapping).
    I32Add,
    /// 32-bit integer subtraction (wrapping).
    I32Sub,
    /// 32-bit integer multiplication (wrapping).
    I32Mul,
}

impl Operator {
    /// Canonical text-format name of this operator.
    pub const fn name(&self) -> &'static str {
        match self {
            Operator::Nop => "nop",
            Operator::Unreachable => "unreachable",
            Operator::Block { .. } => "block",
            Operator::Loop { .. } => "loop",
            Operator::If { .. } => "if",
            Operator::Else => "else",
            Operator::End => "end",
            Operator::Br { .. } => "br",
            Operator::BrIf { .. } => "br_if",
            Operator::Return { .. } => "return",
            Operator::Drop => "drop",
            Operator::LocalGet { .. } => "local.get",
            Operator::LocalSet { .. } => "local.set",
            Operator::LocalTee { .. } => "local.tee",
            Operator::I32Const { .. } => "i32.const",
            Operator::I64Const { .. } => "i64.const",
            Operator::F32Const { .. } => "f32.const",
            Operator::F64Const { .. } => "f64.const",
            Operator::I32Add => "i32.add",
            Operator::I32Sub => "i32.sub",
            Operator::I32Mul => "i32.mul",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_names() {
        assert_eq!(Operator::I32Add.name(), "i32.add");
        assert_eq!(
            Operator::LocalGet {
                local: LocalIndex(0)
            }
            .name(),
            "local.get"
        );
        assert_eq!(Operator::Return { drop_count: 0 }.name(), "return");
    }

    #[test]
    fn block_type_arity() {
        assert_eq!(BlockType::Empty.result_arity(), 0);
        assert_eq!(BlockType::Value(ValueType::I32).result_arity(), 1);
        assert_eq!(
            BlockType::Value(ValueType::I32).result(),
            Some(ValueType::I32)
        );
        assert_eq!(BlockType::Empty.result(), None);
    }
}
