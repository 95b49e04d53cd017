//! Structured stack-machine operators to Cranelift IR translation.
//!
//! The translator is driven one decoded operator at a time by the host
//! compilation loop. It keeps a stack of open control regions, each owning
//! a merge block whose block parameters stand in for the region's merge
//! nodes (one per declared result). Closing any region goes through the
//! single generic [`Translator::pop_control`] path: every reachable
//! predecessor supplies one incoming edge per merge node as jump arguments.
//!
//! Value discipline is strict SSA: an operator consumes previously produced
//! values off the operand stack and produces new ones; values that must
//! vary across control paths only ever exist as merge-block parameters.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{Block, InstBuilder, StackSlot, StackSlotData, StackSlotKind, Value};
use cranelift_frontend::FunctionBuilder;
use lutra_wasm::{BlockType, FunctionBody, LocalIndex, Operator, ValueType};

use crate::compiler::CompileError;
use crate::types;

/// What kind of control region a frame represents.
///
/// Each kind carries only the auxiliary blocks its kind needs. `Loop` and
/// `If` are extension points: they become constructible once branch
/// operators are implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// The function body itself; its merge block is the return block.
    Function,
    /// A `block` region.
    Block,
    /// A `loop` region; branches to it re-enter at the header.
    Loop {
        /// Loop header block, the target of back-edges.
        header: Block,
    },
    /// An `if` region.
    If {
        /// Block for the alternative arm, entered at `else`.
        else_block: Block,
    },
}

/// One open control region.
struct ControlFrame {
    kind: ControlKind,
    /// The code location every path through the region eventually reaches.
    /// Its block parameters are the region's merge nodes, one per result.
    merge_block: Block,
    results: Vec<ValueType>,
    /// Operand stack height at region entry.
    height: usize,
    /// Incoming edges supplied to the merge block so far.
    merge_edges: u32,
}

/// An operand-stack entry: an SSA value plus its static type.
#[derive(Clone, Copy)]
struct StackValue {
    value: Value,
    ty: ValueType,
}

/// One mutable storage cell per declared local.
#[derive(Clone, Copy)]
struct LocalSlot {
    slot: StackSlot,
    ty: ValueType,
}

/// Translate one decoded function body into the builder's IR function.
///
/// The caller provides a builder positioned on a fresh function whose
/// signature matches `body.func_type()` (see [`crate::types`]); on success
/// all blocks are sealed and the caller finalizes the builder.
pub fn translate_function(
    builder: &mut FunctionBuilder<'_>,
    body: &FunctionBody,
) -> Result<(), CompileError> {
    let mut translator = Translator::new(builder, body)?;
    for (offset, op) in body.operators().iter().enumerate() {
        translator.translate_operator(offset, op)?;
    }
    translator.finish()
}

struct Translator<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    locals: Vec<LocalSlot>,
    stack: Vec<StackValue>,
    control: Vec<ControlFrame>,
    /// Whether the current position can be reached. Cleared by an explicit
    /// return; restored when a region exit opens a new merge block.
    reachable: bool,
    /// Nesting depth of control regions opened inside dead code.
    dead_depth: u32,
}

impl<'a, 'b> Translator<'a, 'b> {
    /// Set up function entry: declare locals, pre-build the exit block, and
    /// open the function control region.
    fn new(
        builder: &'a mut FunctionBuilder<'b>,
        body: &FunctionBody,
    ) -> Result<Self, CompileError> {
        // Entry setup lives in its own block so it can be revisited later
        // without perturbing instruction translation.
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let param_values: Vec<Value> = builder.block_params(entry).to_vec();
        let param_count = body.param_count();
        let mut locals = Vec::with_capacity(body.num_locals());
        for index in 0..body.num_locals() {
            let ty = body
                .local_type(index as u32)
                .ok_or(CompileError::InvalidLocalIndex {
                    offset: 0,
                    local: index as u32,
                    num_locals: body.num_locals(),
                })?;
            let slot = builder.create_sized_stack_slot(slot_data(ty)?);
            let init = if index < param_count {
                param_values[index]
            } else {
                zero_value(builder, ty)?
            };
            builder.ins().stack_store(init, slot, 0);
            locals.push(LocalSlot { slot, ty });
        }

        let start = builder.create_block();
        builder.ins().jump(start, &[]);

        // The exit block and its merge nodes must exist before any operator
        // is translated: intervening code may branch straight to the exit
        // with a value.
        let results = body.func_type().results().to_vec();
        let exit = builder.create_block();
        for ty in &results {
            builder.append_block_param(exit, types::value_type(*ty)?);
        }
        builder.switch_to_block(exit);
        match results.len() {
            0 => {
                builder.ins().return_(&[]);
            }
            1 => {
                let merged = builder.block_params(exit)[0];
                builder.ins().return_(&[merged]);
            }
            count => return Err(CompileError::MultiValueReturn { count }),
        }
        builder.switch_to_block(start);

        let control = vec![ControlFrame {
            kind: ControlKind::Function,
            merge_block: exit,
            results,
            height: 0,
            merge_edges: 0,
        }];

        Ok(Self {
            builder,
            locals,
            stack: Vec::new(),
            control,
            reachable: true,
            dead_depth: 0,
        })
    }

    fn translate_operator(&mut self, offset: usize, op: &Operator) -> Result<(), CompileError> {
        // Code between an explicit return and the close of its region is
        // dead: it contributes no edges and emits no instructions, but
        // region open/close pairing must still be tracked.
        if !self.reachable {
            match op {
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => {
                    self.dead_depth += 1;
                    return Ok(());
                }
                Operator::End if self.dead_depth > 0 => {
                    self.dead_depth -= 1;
                    return Ok(());
                }
                Operator::End => {}
                _ => return Ok(()),
            }
        }

        match *op {
            Operator::Nop => {}
            Operator::I32Const { value } => {
                let v = self
                    .builder
                    .ins()
                    .iconst(cranelift_codegen::ir::types::I32, i64::from(value));
                self.push(v, ValueType::I32);
            }
            Operator::LocalGet { local } => self.local_get(offset, local)?,
            Operator::I32Add => {
                let (lhs, rhs) = self.pop_i32_pair(offset, op.name())?;
                let v = self.builder.ins().iadd(lhs, rhs);
                self.push(v, ValueType::I32);
            }
            Operator::I32Mul => {
                let (lhs, rhs) = self.pop_i32_pair(offset, op.name())?;
                let v = self.builder.ins().imul(lhs, rhs);
                self.push(v, ValueType::I32);
            }
            Operator::Block { ty } => self.push_block(ty)?,
            Operator::End => self.pop_control(offset)?,
            Operator::Return { drop_count } => self.do_return(offset, drop_count)?,
            _ => {
                return Err(CompileError::UnsupportedOperator {
                    offset,
                    operator: op.name(),
                });
            }
        }
        Ok(())
    }

    /// Read the current value of a local by issuing a typed load from its
    /// slot. The produced type is the slot's static type by construction.
    fn local_get(&mut self, offset: usize, local: LocalIndex) -> Result<(), CompileError> {
        let slot = self.locals.get(local.index() as usize).copied().ok_or(
            CompileError::InvalidLocalIndex {
                offset,
                local: local.index(),
                num_locals: self.locals.len(),
            },
        )?;
        let ir_ty = types::value_type(slot.ty)?;
        let v = self.builder.ins().stack_load(ir_ty, slot.slot, 0);
        self.push(v, slot.ty);
        Ok(())
    }

    /// Open a block region: create its merge block with one parameter per
    /// declared result.
    fn push_block(&mut self, ty: BlockType) -> Result<(), CompileError> {
        let merge_block = self.builder.create_block();
        let results: Vec<ValueType> = ty.result().into_iter().collect();
        for rty in &results {
            self.builder
                .append_block_param(merge_block, types::value_type(*rty)?);
        }
        self.control.push(ControlFrame {
            kind: ControlKind::Block,
            merge_block,
            results,
            height: self.stack.len(),
            merge_edges: 0,
        });
        Ok(())
    }

    /// Close the innermost region: supply one incoming edge per merge node
    /// from the current position (if reachable), then resume building at
    /// the merge location.
    ///
    /// This is the single mechanism by which any structured region
    /// reconciles its incoming control edges into one exit value per
    /// declared result, at arbitrary nesting depth.
    fn pop_control(&mut self, offset: usize) -> Result<(), CompileError> {
        let mut frame = self
            .control
            .pop()
            .ok_or(CompileError::ControlStackUnderflow { offset })?;

        if self.reachable {
            let args = self.merge_args(offset, &frame.results, frame.height)?;
            self.builder.ins().jump(frame.merge_block, &args);
            frame.merge_edges += 1;
        }
        self.stack.truncate(frame.height);

        tracing::trace!(
            kind = ?frame.kind,
            results = frame.results.len(),
            edges = frame.merge_edges,
            "closed control region"
        );

        match frame.kind {
            ControlKind::Function => {
                // The exit block already returns its merged values; nothing
                // left to build.
                self.reachable = false;
            }
            ControlKind::Block => {
                self.builder.switch_to_block(frame.merge_block);
                for (i, rty) in frame.results.iter().enumerate() {
                    let merged = self.builder.block_params(frame.merge_block)[i];
                    self.stack.push(StackValue {
                        value: merged,
                        ty: *rty,
                    });
                }
                self.reachable = true;
            }
            ControlKind::Loop { .. } | ControlKind::If { .. } => {
                // Unconstructible until branch operators land.
                return Err(CompileError::UnsupportedOperator {
                    offset,
                    operator: "end",
                });
            }
        }
        Ok(())
    }

    /// Explicit return: only legal at function-body nesting level. Drops
    /// the ignored trailing values, then routes the return values to the
    /// exit merge nodes.
    fn do_return(&mut self, offset: usize, drop_count: u32) -> Result<(), CompileError> {
        if self.control.len() != 1 {
            return Err(CompileError::ReturnInNestedRegion { offset });
        }
        for _ in 0..drop_count {
            self.pop(offset, "return")?;
        }

        let merge_block = self.control[0].merge_block;
        let results = self.control[0].results.clone();
        let height = self.control[0].height;
        let args = self.merge_args(offset, &results, height)?;
        self.builder.ins().jump(merge_block, &args);
        self.control[0].merge_edges += 1;
        self.reachable = false;
        Ok(())
    }

    /// Take a region's result values off the operand stack, in order, as
    /// jump arguments for its merge block.
    fn merge_args(
        &mut self,
        offset: usize,
        results: &[ValueType],
        height: usize,
    ) -> Result<Vec<BlockArg>, CompileError> {
        let arity = results.len();
        if self.stack.len() < height + arity {
            return Err(CompileError::OperandStackUnderflow {
                offset,
                operator: "end",
            });
        }
        let taken = self.stack.split_off(self.stack.len() - arity);
        let mut args = Vec::with_capacity(arity);
        for (sv, expected) in taken.iter().zip(results.iter()) {
            if sv.ty != *expected {
                return Err(CompileError::TypeMismatch {
                    offset,
                    operator: "end",
                    expected: *expected,
                    found: sv.ty,
                });
            }
            args.push(BlockArg::Value(sv.value));
        }
        Ok(args)
    }

    fn pop_i32_pair(
        &mut self,
        offset: usize,
        operator: &'static str,
    ) -> Result<(Value, Value), CompileError> {
        let rhs = self.pop(offset, operator)?;
        let lhs = self.pop(offset, operator)?;
        for sv in [&lhs, &rhs] {
            if sv.ty != ValueType::I32 {
                return Err(CompileError::TypeMismatch {
                    offset,
                    operator,
                    expected: ValueType::I32,
                    found: sv.ty,
                });
            }
        }
        Ok((lhs.value, rhs.value))
    }

    fn push(&mut self, value: Value, ty: ValueType) {
        self.stack.push(StackValue { value, ty });
    }

    fn pop(&mut self, offset: usize, operator: &'static str) -> Result<StackValue, CompileError> {
        self.stack
            .pop()
            .ok_or(CompileError::OperandStackUnderflow { offset, operator })
    }

    /// All regions must be closed; seal every block so the builder can
    /// finalize. Local slot bookkeeping is discarded with the translator.
    fn finish(self) -> Result<(), CompileError> {
        if !self.control.is_empty() {
            return Err(CompileError::UnbalancedControl {
                depth: self.control.len(),
            });
        }
        self.builder.seal_all_blocks();
        Ok(())
    }
}

/// Stack-slot size and alignment for one local of the given type.
fn slot_data(ty: ValueType) -> Result<StackSlotData, CompileError> {
    let (size, align_shift) = match ty {
        ValueType::I32 | ValueType::F32 => (4, 2),
        ValueType::I64 | ValueType::F64 => (8, 3),
        ValueType::Void => return Err(CompileError::UnsupportedType { ty }),
    };
    Ok(StackSlotData::new(
        StackSlotKind::ExplicitSlot,
        size,
        align_shift,
    ))
}

/// Type-appropriate zero used to initialize non-parameter locals.
fn zero_value(builder: &mut FunctionBuilder<'_>, ty: ValueType) -> Result<Value, CompileError> {
    let v = match ty {
        ValueType::I32 => builder.ins().iconst(cranelift_codegen::ir::types::I32, 0),
        ValueType::I64 => builder.ins().iconst(cranelift_codegen::ir::types::I64, 0),
        ValueType::F32 => builder.ins().f32const(0.0_f32),
        ValueType::F64 => builder.ins().f64const(0.0_f64),
        ValueType::Void => return Err(CompileError::UnsupportedType { ty }),
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_codegen::ir::{AbiParam, Function, Signature, UserFuncName};
    use cranelift_codegen::isa::CallConv;
    use cranelift_codegen::settings;
    use cranelift_frontend::FunctionBuilderContext;
    use lutra_wasm::{FuncType, FunctionBody};

    /// Translate a body into a standalone IR function (no backend needed).
    fn translate(body: &FunctionBody) -> Result<Function, CompileError> {
        let mut sig = Signature::new(CallConv::Fast);
        for ty in crate::types::param_types(body.func_type())? {
            sig.params.push(AbiParam::new(ty));
        }
        if let Some(ty) = crate::types::return_type(body.func_type())? {
            sig.returns.push(AbiParam::new(ty));
        }
        let mut func = Function::with_name_signature(UserFuncName::default(), sig);
        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut builder_ctx);
        translate_function(&mut builder, body)?;
        builder.finalize();
        Ok(func)
    }

    fn verify(func: &Function) {
        let flags = settings::Flags::new(settings::builder());
        cranelift_codegen::verify_function(func, &flags).expect("translated IR should verify");
    }

    /// Incoming edges of the function exit block. Block creation order is
    /// fixed: entry, start, exit — so the exit is always `block2`.
    fn exit_edge_count(func: &Function) -> usize {
        func.display().to_string().matches("jump block2").count()
    }

    fn i32_result_type() -> FuncType {
        FuncType::new([], [ValueType::I32])
    }

    #[test]
    fn straight_line_has_single_exit_edge() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::I32Const { value: 5 })
            .operator(Operator::I32Const { value: 7 })
            .operator(Operator::I32Add)
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::End)
            .build();

        let func = translate(&body).expect("translation should succeed");
        verify(&func);
        assert_eq!(exit_edge_count(&func), 1);
    }

    #[test]
    fn fallthrough_exit_also_has_single_edge() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::I32Const { value: 3 })
            .operator(Operator::End)
            .build();

        let func = translate(&body).expect("translation should succeed");
        verify(&func);
        assert_eq!(exit_edge_count(&func), 1);
    }

    #[test]
    fn void_function_translates() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], []))
            .operator(Operator::Nop)
            .operator(Operator::End)
            .build();

        let func = translate(&body).expect("translation should succeed");
        verify(&func);
        assert_eq!(exit_edge_count(&func), 1);
    }

    #[test]
    fn nested_blocks_merge_through_block_params() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::Block {
                ty: BlockType::Value(ValueType::I32),
            })
            .operator(Operator::Block {
                ty: BlockType::Value(ValueType::I32),
            })
            .operator(Operator::I32Const { value: 3 })
            .operator(Operator::End)
            .operator(Operator::I32Const { value: 4 })
            .operator(Operator::I32Add)
            .operator(Operator::End)
            .operator(Operator::End)
            .build();

        let func = translate(&body).expect("translation should succeed");
        verify(&func);
        assert_eq!(exit_edge_count(&func), 1);
    }

    #[test]
    fn locals_are_typed_loads() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([ValueType::I32], [ValueType::I32]))
            .local(ValueType::F64)
            .operator(Operator::LocalGet {
                local: LocalIndex(0),
            })
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::End)
            .build();

        let func = translate(&body).expect("translation should succeed");
        verify(&func);
    }

    #[test]
    fn unsupported_operator_is_rejected() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::I32Const { value: 1 })
            .operator(Operator::I32Const { value: 2 })
            .operator(Operator::I32Sub)
            .operator(Operator::End)
            .build();

        match translate(&body) {
            Err(CompileError::UnsupportedOperator { offset, operator }) => {
                assert_eq!(offset, 2);
                assert_eq!(operator, "i32.sub");
            }
            other => panic!("expected unsupported-operator error, got {other:?}"),
        }
    }

    #[test]
    fn return_inside_nested_region_is_rejected() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], []))
            .operator(Operator::Block {
                ty: BlockType::Empty,
            })
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::End)
            .operator(Operator::End)
            .build();

        assert!(matches!(
            translate(&body),
            Err(CompileError::ReturnInNestedRegion { offset: 1 })
        ));
    }

    #[test]
    fn operand_type_mismatch_is_rejected() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .local(ValueType::I64)
            .operator(Operator::LocalGet {
                local: LocalIndex(0),
            })
            .operator(Operator::I32Const { value: 1 })
            .operator(Operator::I32Add)
            .operator(Operator::End)
            .build();

        assert!(matches!(
            translate(&body),
            Err(CompileError::TypeMismatch {
                expected: ValueType::I32,
                found: ValueType::I64,
                ..
            })
        ));
    }

    #[test]
    fn operand_stack_underflow_is_rejected() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::I32Const { value: 1 })
            .operator(Operator::I32Add)
            .operator(Operator::End)
            .build();

        assert!(matches!(
            translate(&body),
            Err(CompileError::OperandStackUnderflow { offset: 1, .. })
        ));
    }

    #[test]
    fn invalid_local_index_is_rejected() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::LocalGet {
                local: LocalIndex(3),
            })
            .operator(Operator::End)
            .build();

        assert!(matches!(
            translate(&body),
            Err(CompileError::InvalidLocalIndex { local: 3, .. })
        ));
    }

    #[test]
    fn code_after_return_is_dead() {
        let body = FunctionBody::builder()
            .func_type(i32_result_type())
            .operator(Operator::I32Const { value: 9 })
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::I32Const { value: 1 })
            .operator(Operator::End)
            .build();

        let func = translate(&body).expect("translation should succeed");
        verify(&func);
        assert_eq!(exit_edge_count(&func), 1);
    }

    #[test]
    fn unbalanced_body_is_rejected() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], []))
            .operator(Operator::Block {
                ty: BlockType::Empty,
            })
            .operator(Operator::End)
            .build();

        assert!(matches!(
            translate(&body),
            Err(CompileError::UnbalancedControl { depth: 1 })
        ));
    }
}
