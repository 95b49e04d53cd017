//! Value types and function signatures.

use std::fmt;

/// A WebAssembly value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value. Only meaningful as an (absent) result, never in value
    /// position.
    Void,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit IEEE float
    F32,
    /// 64-bit IEEE float
    F64,
}

impl ValueType {
    /// Canonical text-format name of this type.
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Void => "void",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A function signature: ordered parameter types and ordered result types.
///
/// Owned by the function being compiled and read-only for the duration of a
/// compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    params: Box<[ValueType]>,
    results: Box<[ValueType]>,
}

impl FuncType {
    /// Create a signature from parameter and result type lists.
    pub fn new(
        params: impl Into<Box<[ValueType]>>,
        results: impl Into<Box<[ValueType]>>,
    ) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    /// Parameter types, in declaration order.
    #[inline]
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Result types, in declaration order.
    #[inline]
    pub fn results(&self) -> &[ValueType] {
        &self.results
    }

    /// Number of parameters.
    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Number of results.
    #[inline]
    pub fn result_count(&self) -> usize {
        self.results.len()
    }
}

impl Default for FuncType {
    fn default() -> Self {
        Self::new([], [])
    }
}
