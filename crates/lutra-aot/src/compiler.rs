//! Function compilation driver.
//!
//! [`Compiler`] carries the per-thread state for turning one decoded
//! function body at a time into a relocatable code buffer: translate to IR,
//! verify, hand the function to Cranelift's optimizer and emitter as a
//! black box, then read the resulting object image back out. Each
//! compilation produces its own object module so buffers stay independent.

use std::sync::Arc;

use cranelift_codegen::Context;
use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::{AbiParam, Function, UserFuncName};
use cranelift_codegen::isa::TargetIsa;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{Linkage, Module, default_libcall_names};
use cranelift_object::{ObjectBuilder, ObjectModule};
use lutra_wasm::{FunctionBody, ValueType};
use thiserror::Error;

use crate::object::{self, CodeBuffer};
use crate::{backend, translator, types};

/// Reasons a function compilation can fail.
///
/// Input defects (bad operators, type errors) carry the operator offset so
/// callers can point at the offending position in the body.
#[derive(Debug, Error)]
pub enum CompileError {
    /// [`backend::initialize`] has not been called in this process.
    #[error("code generation backend is not initialized")]
    BackendNotInitialized,
    /// The host processor family has no code generation support.
    #[error("unsupported host processor: {0}")]
    UnsupportedHost(String),
    /// Backend flag or ISA construction failed.
    #[error("backend configuration failed: {0}")]
    Backend(String),
    /// The body uses an operator outside the supported subset.
    #[error("unsupported operator {operator} at offset {offset}")]
    UnsupportedOperator {
        /// Position of the operator in the body.
        offset: usize,
        /// Wasm text name of the operator.
        operator: &'static str,
    },
    /// A type with no native value representation was used as a value.
    #[error("type {ty} is not a usable value type")]
    UnsupportedType {
        /// The offending type.
        ty: ValueType,
    },
    /// The signature declares more than one result.
    #[error("multi-value returns are not supported ({count} results)")]
    MultiValueReturn {
        /// Declared result count.
        count: usize,
    },
    /// A local access named an index past the declared local space.
    #[error("local index {local} out of range at offset {offset} ({num_locals} locals)")]
    InvalidLocalIndex {
        /// Position of the access in the body.
        offset: usize,
        /// The out-of-range index.
        local: u32,
        /// Size of the function's local index space.
        num_locals: usize,
    },
    /// An operator consumed more values than the stack held.
    #[error("operand stack underflow for {operator} at offset {offset}")]
    OperandStackUnderflow {
        /// Position of the operator in the body.
        offset: usize,
        /// Wasm text name of the operator.
        operator: &'static str,
    },
    /// An operand or merge value had the wrong static type.
    #[error("type mismatch for {operator} at offset {offset}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Position of the operator in the body.
        offset: usize,
        /// Wasm text name of the operator.
        operator: &'static str,
        /// Type the operator required.
        expected: ValueType,
        /// Type actually found on the stack.
        found: ValueType,
    },
    /// `return` appeared inside a nested control region.
    #[error("return inside a nested control region at offset {offset}")]
    ReturnInNestedRegion {
        /// Position of the return in the body.
        offset: usize,
    },
    /// An `end` had no open region to close.
    #[error("control stack underflow at offset {offset}")]
    ControlStackUnderflow {
        /// Position of the `end` in the body.
        offset: usize,
    },
    /// The body ended with control regions still open.
    #[error("function body left {depth} control regions open")]
    UnbalancedControl {
        /// Number of regions left open.
        depth: usize,
    },
    /// Declaring or defining the function in its module failed.
    #[error("module error: {0}")]
    Module(Box<cranelift_module::ModuleError>),
    /// The translated IR did not pass structural verification.
    #[error("IR verification failed: {0}")]
    Verifier(String),
    /// The optimizer or instruction selector rejected the function.
    #[error("code generation failed: {0}")]
    Codegen(String),
    /// Serializing the object image failed.
    #[error("object emission failed: {0}")]
    Emit(String),
    /// The emitted object image could not be parsed back.
    #[error("malformed object image: {0}")]
    ObjectFormat(String),
    /// The emitted object image contained no code section.
    #[error("object image has no code section")]
    MissingCodeSection,
}

impl From<cranelift_module::ModuleError> for CompileError {
    fn from(err: cranelift_module::ModuleError) -> Self {
        CompileError::Module(Box::new(err))
    }
}

/// Pipeline stage an IR dump was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStage {
    /// Right after translation and verification, before optimization.
    Translated,
    /// After the optimization pipeline ran.
    Optimized,
}

/// Receives textual IR dumps when installed on a [`Compiler`].
pub type DumpSink = Box<dyn FnMut(DumpStage, &str) + Send>;

/// How the produced code is expected to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionTier {
    /// Directly interpreted, no native code.
    Interpreted,
    /// Fast unoptimized native code.
    Baseline,
    /// Fully optimized native code.
    Optimized,
}

/// Outcome of one successful function compilation.
#[derive(Debug)]
pub struct CompilationResult {
    /// The extracted contiguous code buffer.
    pub buffer: CodeBuffer,
    /// Tier the buffer was compiled at. Always [`ExecutionTier::Optimized`]
    /// for this pipeline.
    pub tier: ExecutionTier,
}

/// Compiles decoded function bodies to native code buffers.
///
/// Not shareable across threads; parallel compilation uses one `Compiler`
/// per worker.
pub struct Compiler {
    isa: Arc<dyn TargetIsa>,
    context: Context,
    function_builder_ctx: FunctionBuilderContext,
    next_function_id: u32,
    dump: Option<DumpSink>,
}

impl Compiler {
    /// Create a compiler for the initialized host backend.
    pub fn new() -> Result<Self, CompileError> {
        Ok(Self {
            isa: backend::host_isa()?,
            context: Context::new(),
            function_builder_ctx: FunctionBuilderContext::new(),
            next_function_id: 0,
            dump: None,
        })
    }

    /// Install a sink that receives the IR text before and after
    /// optimization. Intended for debugging and tests.
    pub fn with_dump_sink(mut self, sink: DumpSink) -> Self {
        self.dump = Some(sink);
        self
    }

    /// Compile one function body to a relocatable code buffer.
    pub fn compile_function(
        &mut self,
        body: &FunctionBody,
    ) -> Result<CompilationResult, CompileError> {
        let symbol = symbol_name(body.display_name(), self.next_function_id);
        self.next_function_id += 1;

        let builder = ObjectBuilder::new(self.isa.clone(), symbol.clone(), default_libcall_names())?;
        let mut module = ObjectModule::new(builder);

        let mut sig = module.make_signature();
        for ty in types::param_types(body.func_type())? {
            sig.params.push(AbiParam::new(ty));
        }
        if let Some(ty) = types::return_type(body.func_type())? {
            sig.returns.push(AbiParam::new(ty));
        }
        let func_id = module.declare_function(&symbol, Linkage::Export, &sig)?;

        self.context.clear();
        self.context.func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);
        let mut builder = FunctionBuilder::new(&mut self.context.func, &mut self.function_builder_ctx);
        translator::translate_function(&mut builder, body)?;
        builder.finalize();

        // A verification failure past translation is an internal defect,
        // not an input defect; surface the full verifier report.
        cranelift_codegen::verify_function(&self.context.func, self.isa.as_ref())
            .map_err(|e| CompileError::Verifier(e.to_string()))?;

        if let Some(sink) = self.dump.as_mut() {
            sink(DumpStage::Translated, &self.context.func.display().to_string());
        }

        self.context
            .optimize(self.isa.as_ref(), &mut ControlPlane::default())
            .map_err(|e| CompileError::Codegen(e.to_string()))?;

        if let Some(sink) = self.dump.as_mut() {
            sink(DumpStage::Optimized, &self.context.func.display().to_string());
        }

        module.define_function(func_id, &mut self.context)?;
        let image = module
            .finish()
            .emit()
            .map_err(|e| CompileError::Emit(e.to_string()))?;

        let buffer = object::read_object(&image)?;
        tracing::debug!(
            function = %body.display_name(),
            symbol = %symbol,
            instruction_size = buffer.layout().instruction_size,
            buffer_size = buffer.layout().buffer_size,
            "compiled function"
        );

        Ok(CompilationResult {
            buffer,
            tier: ExecutionTier::Optimized,
        })
    }
}

/// Object symbol for a compiled function: the display name with shell- and
/// assembler-hostile angle brackets flattened, made unique per compiler.
fn symbol_name(display_name: &str, id: u32) -> String {
    format!("lutra_aot_{}_{}", display_name.replace(['<', '>'], "_"), id)
}
