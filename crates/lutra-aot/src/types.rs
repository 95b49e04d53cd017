//! Mapping from wasm value types to Cranelift IR types.

use cranelift_codegen::ir;
use lutra_wasm::{FuncType, ValueType};

use crate::compiler::CompileError;

/// Map one wasm value type to its Cranelift IR type.
///
/// Total over the supported set {i32, i64, f32, f64}. Any other kind is an
/// unsupported-type failure: adding a value type is a compile-time extension
/// of this function, not a runtime condition.
pub fn value_type(ty: ValueType) -> Result<ir::Type, CompileError> {
    match ty {
        ValueType::I32 => Ok(ir::types::I32),
        ValueType::I64 => Ok(ir::types::I64),
        ValueType::F32 => Ok(ir::types::F32),
        ValueType::F64 => Ok(ir::types::F64),
        ValueType::Void => Err(CompileError::UnsupportedType { ty }),
    }
}

/// Map a signature's result list to the native return type.
///
/// `None` means a void return. Multi-value returns are explicitly
/// unsupported and fail fast.
pub fn return_type(func_type: &FuncType) -> Result<Option<ir::Type>, CompileError> {
    match func_type.results() {
        [] => Ok(None),
        [ty] => Ok(Some(value_type(*ty)?)),
        results => Err(CompileError::MultiValueReturn {
            count: results.len(),
        }),
    }
}

/// Map a signature's parameter list to native parameter types,
/// order-preserving.
pub fn param_types(func_type: &FuncType) -> Result<Vec<ir::Type>, CompileError> {
    func_type.params().iter().map(|ty| value_type(*ty)).collect()
}
