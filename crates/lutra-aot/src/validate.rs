//! Batch validation of decoded function bodies.
//!
//! Validation simulates the operand and control stacks abstractly, with
//! types instead of SSA values, enforcing the same rules translation does.
//! It builds no IR and touches no backend state, so a batch can be checked
//! across all cores with [`validate_functions`].
//!
//! Parallel runs are deterministic: when several bodies are invalid, the
//! reported error is always the one smallest by `(function index, operator
//! offset)`, independent of worker scheduling.

use std::sync::Mutex;

use lutra_wasm::{FunctionBody, Operator, ValueType};
use rayon::prelude::*;
use thiserror::Error;

/// What a body did wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    /// Operator outside the supported subset.
    #[error("unsupported operator {0}")]
    UnsupportedOperator(&'static str),
    /// Not a usable value type.
    #[error("type {0} is not a usable value type")]
    UnsupportedType(ValueType),
    /// Signature declares more than one result.
    #[error("multi-value returns are not supported ({0} results)")]
    MultiValueReturn(usize),
    /// Local access past the declared local space.
    #[error("local index {local} out of range ({num_locals} locals)")]
    InvalidLocalIndex {
        /// The out-of-range index.
        local: u32,
        /// Size of the function's local index space.
        num_locals: usize,
    },
    /// Operator consumed more values than the stack held.
    #[error("operand stack underflow for {0}")]
    OperandStackUnderflow(&'static str),
    /// Operand or merge value of the wrong static type.
    #[error("type mismatch for {operator}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Wasm text name of the operator.
        operator: &'static str,
        /// Type the operator required.
        expected: ValueType,
        /// Type actually found on the stack.
        found: ValueType,
    },
    /// `return` inside a nested control region.
    #[error("return inside a nested control region")]
    ReturnInNestedRegion,
    /// `end` with no open region to close.
    #[error("control stack underflow")]
    ControlStackUnderflow,
    /// Body ended with regions still open.
    #[error("{0} control regions left open")]
    UnbalancedControl(usize),
}

/// A defect in one body of a validated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("function {func_index}, offset {offset}: {kind}")]
pub struct ValidationError {
    /// Index of the body in the batch.
    pub func_index: usize,
    /// Operator offset the defect was detected at; 0 for signature defects.
    pub offset: usize,
    /// What went wrong.
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    fn position(&self) -> (usize, usize) {
        (self.func_index, self.offset)
    }
}

/// Validate a whole batch in parallel.
///
/// Returns the error smallest by `(function index, operator offset)` when
/// any body is invalid, so results are stable across runs and worker
/// counts.
pub fn validate_functions(bodies: &[FunctionBody]) -> Result<(), ValidationError> {
    let first: Mutex<Option<ValidationError>> = Mutex::new(None);

    bodies.par_iter().enumerate().for_each(|(index, body)| {
        if let Err(err) = validate_function(index, body) {
            let mut slot = first.lock().expect("validation mutex poisoned");
            match &*slot {
                Some(existing) if existing.position() <= err.position() => {}
                _ => *slot = Some(err),
            }
        }
    });

    match first.into_inner().expect("validation mutex poisoned") {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a single body.
pub fn validate_function(func_index: usize, body: &FunctionBody) -> Result<(), ValidationError> {
    Checker::new(func_index, body)?.run()
}

struct Frame {
    is_function: bool,
    results: Vec<ValueType>,
    height: usize,
}

/// Abstract interpreter over value types.
struct Checker<'a> {
    func_index: usize,
    body: &'a FunctionBody,
    stack: Vec<ValueType>,
    control: Vec<Frame>,
    reachable: bool,
    dead_depth: u32,
}

impl<'a> Checker<'a> {
    fn new(func_index: usize, body: &'a FunctionBody) -> Result<Self, ValidationError> {
        let results = body.func_type().results();
        if results.len() > 1 {
            return Err(ValidationError {
                func_index,
                offset: 0,
                kind: ValidationErrorKind::MultiValueReturn(results.len()),
            });
        }
        for ty in body.func_type().params().iter().chain(results.iter()) {
            if *ty == ValueType::Void {
                return Err(ValidationError {
                    func_index,
                    offset: 0,
                    kind: ValidationErrorKind::UnsupportedType(*ty),
                });
            }
        }

        Ok(Self {
            func_index,
            body,
            stack: Vec::new(),
            control: vec![Frame {
                is_function: true,
                results: results.to_vec(),
                height: 0,
            }],
            reachable: true,
            dead_depth: 0,
        })
    }

    fn run(mut self) -> Result<(), ValidationError> {
        for (offset, op) in self.body.operators().iter().enumerate() {
            self.check_operator(offset, op)?;
        }
        if !self.control.is_empty() {
            return Err(self.error(
                self.body.operators().len(),
                ValidationErrorKind::UnbalancedControl(self.control.len()),
            ));
        }
        Ok(())
    }

    fn error(&self, offset: usize, kind: ValidationErrorKind) -> ValidationError {
        ValidationError {
            func_index: self.func_index,
            offset,
            kind,
        }
    }

    fn check_operator(&mut self, offset: usize, op: &Operator) -> Result<(), ValidationError> {
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
            Operator::I32Const { .. } => self.stack.push(ValueType::I32),
            Operator::LocalGet { local } => {
                let num_locals = self.body.num_locals();
                let ty = self.body.local_type(local.index()).ok_or_else(|| {
                    self.error(
                        offset,
                        ValidationErrorKind::InvalidLocalIndex {
                            local: local.index(),
                            num_locals,
                        },
                    )
                })?;
                self.stack.push(ty);
            }
            Operator::I32Add | Operator::I32Mul => {
                self.pop_expecting(offset, op.name(), ValueType::I32)?;
                self.pop_expecting(offset, op.name(), ValueType::I32)?;
                self.stack.push(ValueType::I32);
            }
            Operator::Block { ty } => {
                if ty.result() == Some(ValueType::Void) {
                    return Err(
                        self.error(offset, ValidationErrorKind::UnsupportedType(ValueType::Void))
                    );
                }
                self.control.push(Frame {
                    is_function: false,
                    results: ty.result().into_iter().collect(),
                    height: self.stack.len(),
                });
            }
            Operator::End => self.pop_control(offset)?,
            Operator::Return { drop_count } => self.check_return(offset, drop_count)?,
            _ => {
                return Err(self.error(
                    offset,
                    ValidationErrorKind::UnsupportedOperator(op.name()),
                ));
            }
        }
        Ok(())
    }

    fn pop_control(&mut self, offset: usize) -> Result<(), ValidationError> {
        let frame = self
            .control
            .pop()
            .ok_or_else(|| self.error(offset, ValidationErrorKind::ControlStackUnderflow))?;

        if self.reachable {
            self.check_merge(offset, &frame.results, frame.height)?;
        }
        self.stack.truncate(frame.height);

        if frame.is_function {
            self.reachable = false;
        } else {
            self.stack.extend(frame.results.iter().copied());
            self.reachable = true;
        }
        Ok(())
    }

    fn check_return(&mut self, offset: usize, drop_count: u32) -> Result<(), ValidationError> {
        if self.control.len() != 1 {
            return Err(self.error(offset, ValidationErrorKind::ReturnInNestedRegion));
        }
        for _ in 0..drop_count {
            if self.stack.pop().is_none() {
                return Err(self.error(
                    offset,
                    ValidationErrorKind::OperandStackUnderflow("return"),
                ));
            }
        }
        let results = self.control[0].results.clone();
        let height = self.control[0].height;
        self.check_merge(offset, &results, height)?;
        self.stack.truncate(height);
        self.reachable = false;
        Ok(())
    }

    /// Check the top of the stack against a region's result list without
    /// disturbing values below the region's entry height.
    fn check_merge(
        &mut self,
        offset: usize,
        results: &[ValueType],
        height: usize,
    ) -> Result<(), ValidationError> {
        if self.stack.len() < height + results.len() {
            return Err(self.error(offset, ValidationErrorKind::OperandStackUnderflow("end")));
        }
        let top = &self.stack[self.stack.len() - results.len()..];
        for (found, expected) in top.iter().zip(results.iter()) {
            if found != expected {
                return Err(self.error(
                    offset,
                    ValidationErrorKind::TypeMismatch {
                        operator: "end",
                        expected: *expected,
                        found: *found,
                    },
                ));
            }
        }
        Ok(())
    }

    fn pop_expecting(
        &mut self,
        offset: usize,
        operator: &'static str,
        expected: ValueType,
    ) -> Result<(), ValidationError> {
        let found = self
            .stack
            .pop()
            .ok_or_else(|| self.error(offset, ValidationErrorKind::OperandStackUnderflow(operator)))?;
        if found != expected {
            return Err(self.error(
                offset,
                ValidationErrorKind::TypeMismatch {
                    operator,
                    expected,
                    found,
                },
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lutra_wasm::{BlockType, FuncType, LocalIndex};

    fn valid_body() -> FunctionBody {
        FunctionBody::builder()
            .func_type(FuncType::new([], [ValueType::I32]))
            .operator(Operator::I32Const { value: 1 })
            .operator(Operator::I32Const { value: 2 })
            .operator(Operator::I32Add)
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::End)
            .build()
    }

    fn body_with_unsupported_at(offset: usize) -> FunctionBody {
        let mut builder = FunctionBody::builder().func_type(FuncType::new([], [ValueType::I32]));
        for _ in 0..offset {
            builder = builder.operator(Operator::Nop);
        }
        builder
            .operator(Operator::I32Sub)
            .operator(Operator::End)
            .build()
    }

    #[test]
    fn valid_batch_passes() {
        let bodies = vec![valid_body(), valid_body(), valid_body()];
        assert_eq!(validate_functions(&bodies), Ok(()));
    }

    #[test]
    fn empty_batch_passes() {
        assert_eq!(validate_functions(&[]), Ok(()));
    }

    #[test]
    fn lowest_function_index_wins() {
        let bodies = vec![
            valid_body(),
            body_with_unsupported_at(9),
            valid_body(),
            body_with_unsupported_at(0),
        ];

        let err = validate_functions(&bodies).unwrap_err();
        assert_eq!(err.func_index, 1);
        assert_eq!(err.offset, 9);
        assert_eq!(
            err.kind,
            ValidationErrorKind::UnsupportedOperator("i32.sub")
        );
    }

    #[test]
    fn report_is_stable_across_large_batches() {
        let mut bodies: Vec<FunctionBody> = (0..64).map(|_| valid_body()).collect();
        bodies[40] = body_with_unsupported_at(3);
        bodies[41] = body_with_unsupported_at(0);

        for _ in 0..8 {
            let err = validate_functions(&bodies).unwrap_err();
            assert_eq!((err.func_index, err.offset), (40, 3));
        }
    }

    #[test]
    fn earliest_offset_wins_within_a_function() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], [ValueType::I32]))
            .operator(Operator::I32Add)
            .operator(Operator::I32Sub)
            .operator(Operator::End)
            .build();

        let err = validate_function(0, &body).unwrap_err();
        assert_eq!(err.offset, 0);
        assert_eq!(
            err.kind,
            ValidationErrorKind::OperandStackUnderflow("i32.add")
        );
    }

    #[test]
    fn nested_return_is_invalid() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], []))
            .operator(Operator::Block {
                ty: BlockType::Empty,
            })
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::End)
            .operator(Operator::End)
            .build();

        assert_eq!(
            validate_function(0, &body).unwrap_err().kind,
            ValidationErrorKind::ReturnInNestedRegion
        );
    }

    #[test]
    fn unbalanced_body_is_invalid() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], []))
            .operator(Operator::Block {
                ty: BlockType::Empty,
            })
            .operator(Operator::End)
            .build();

        assert_eq!(
            validate_function(0, &body).unwrap_err().kind,
            ValidationErrorKind::UnbalancedControl(1)
        );
    }

    #[test]
    fn multi_value_signature_is_invalid() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], [ValueType::I32, ValueType::I32]))
            .operator(Operator::End)
            .build();

        let err = validate_function(7, &body).unwrap_err();
        assert_eq!(err.func_index, 7);
        assert_eq!(err.offset, 0);
        assert_eq!(err.kind, ValidationErrorKind::MultiValueReturn(2));
    }

    #[test]
    fn drop_count_consumes_extra_values() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], [ValueType::I32]))
            .operator(Operator::I32Const { value: 1 })
            .operator(Operator::I32Const { value: 2 })
            .operator(Operator::Return { drop_count: 1 })
            .operator(Operator::End)
            .build();

        assert_eq!(validate_function(0, &body), Ok(()));
    }

    #[test]
    fn local_type_flows_through_merges() {
        let body = FunctionBody::builder()
            .func_type(FuncType::new([], [ValueType::I32]))
            .local(ValueType::F64)
            .operator(Operator::LocalGet {
                local: LocalIndex(0),
            })
            .operator(Operator::Return { drop_count: 0 })
            .operator(Operator::End)
            .build();

        assert_eq!(
            validate_function(0, &body).unwrap_err().kind,
            ValidationErrorKind::TypeMismatch {
                operator: "end",
                expected: ValueType::I32,
                found: ValueType::F64,
            }
        );
    }
}
