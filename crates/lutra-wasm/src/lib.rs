//! # Lutra Wasm
//!
//! This crate defines the decoded WebAssembly function-body model consumed
//! by the Lutra ahead-of-time compiler.
//!
//! ## Design Principles
//!
//! - **Pre-decoded**: The binary container format (section framing, varint
//!   decoding, name sections) is handled by an external decoder; this crate
//!   only models what the compiler needs — signatures, local types, and the
//!   operator sequence of one function body
//! - **Explicit operators**: Every bytecode operation the compiler may see
//!   is one variant of a tagged enum, so the supported subset of any
//!   consumer is auditable at a glance
//! - **Immutable during compilation**: A `FunctionBody` is read-only once
//!   handed to a compiler

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod function;
pub mod operand;
pub mod operator;
pub mod types;

pub use function::{FunctionBody, FunctionBodyBuilder};
pub use operand::{BranchDepth, LocalIndex};
pub use operator::{BlockType, Operator};
pub use types::{FuncType, ValueType};
