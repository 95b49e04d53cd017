//! Function bodies

use crate::operator::Operator;
use crate::types::{FuncType, ValueType};

/// One decoded function body: signature, explicit local types, and the
/// operator sequence, as produced by the external container decoder.
///
/// Immutable for the duration of a compilation. Local index space is
/// parameters first (in signature order), then explicit locals.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    name: Option<String>,
    func_type: FuncType,
    locals: Vec<ValueType>,
    operators: Vec<Operator>,
}

impl FunctionBody {
    /// Create a function body builder
    pub fn builder() -> FunctionBodyBuilder {
        FunctionBodyBuilder::new()
    }

    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// The function's signature.
    #[inline]
    pub fn func_type(&self) -> &FuncType {
        &self.func_type
    }

    /// The decoded operator sequence.
    #[inline]
    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// Explicit (non-parameter) local types, in declaration order.
    #[inline]
    pub fn explicit_locals(&self) -> &[ValueType] {
        &self.locals
    }

    /// Number of parameters.
    #[inline]
    pub fn param_count(&self) -> usize {
        self.func_type.param_count()
    }

    /// Total number of locals: parameters plus explicit locals.
    #[inline]
    pub fn num_locals(&self) -> usize {
        self.func_type.param_count() + self.locals.len()
    }

    /// Static type of the local at `index`, or `None` if out of range.
    ///
    /// Parameters occupy the low indices, explicit locals follow.
    pub fn local_type(&self, index: u32) -> Option<ValueType> {
        let index = index as usize;
        let param_count = self.func_type.param_count();
        if index < param_count {
            Some(self.func_type.params()[index])
        } else {
            self.locals.get(index - param_count).copied()
        }
    }
}

/// Builder for [`FunctionBody`]
#[derive(Debug, Default)]
pub struct FunctionBodyBuilder {
    name: Option<String>,
    func_type: FuncType,
    locals: Vec<ValueType>,
    operators: Vec<Operator>,
}

impl FunctionBodyBuilder {
    /// Create a new function body builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the function signature
    pub fn func_type(mut self, func_type: FuncType) -> Self {
        self.func_type = func_type;
        self
    }

    /// Declare one explicit local
    pub fn local(mut self, ty: ValueType) -> Self {
        self.locals.push(ty);
        self
    }

    /// Append one operator
    pub fn operator(mut self, op: Operator) -> Self {
        self.operators.push(op);
        self
    }

    /// Build the function body
    pub fn build(self) -> FunctionBody {
        FunctionBody {
            name: self.name,
            func_type: self.func_type,
            locals: self.locals,
            operators: self.operators,
        }
    }
}
