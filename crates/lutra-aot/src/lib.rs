//! # Lutra AOT
//!
//! Ahead-of-time compilation pipeline for decoded wasm function bodies,
//! backed by Cranelift.
//!
//! One compilation takes a [`lutra_wasm::FunctionBody`] through four stages:
//! translation of the structured stack-machine operators into Cranelift IR
//! ([`translator`]), structural verification, the external optimizer/emitter
//! ([`compiler`]), and extraction of the resulting relocatable object image
//! into a single contiguous code buffer ([`object`]).
//!
//! The host backend must be set up once per process with
//! [`backend::initialize`] before any [`Compiler`] is constructed.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod backend;
pub mod compiler;
pub mod object;
pub mod translator;
pub mod types;
pub mod validate;

pub use compiler::{CompilationResult, CompileError, Compiler, DumpStage, ExecutionTier};
pub use object::{CodeBuffer, CodeLayout, SectionSizes};
pub use validate::{ValidationError, ValidationErrorKind, validate_functions};
