//! # Eval
//!
//! Stack interpreter for instruction sequences, used to run code bodies of host methods

use std::ops::{Add, Div, Mul, Sub};

use thiserror::Error;

use crate::code::{InstructionSequence, Opcode, Operand};
use crate::patcher::validate::{label_targets, LabelGraphError};

use super::value::Value;

/// Errors while evaluating a body
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    /// An instruction needed more values than the stack held
    #[error("stack underflow at {pc}")]
    StackUnderflow {
        /// Instruction index
        pc: usize,
    },
    /// Operand types don't fit the operation
    #[error("type mismatch for {op} at {pc}: {lhs:?}, {rhs:?}")]
    TypeMismatch {
        /// Instruction index
        pc: usize,
        /// Operation
        op: Opcode,
        /// Left hand value
        lhs: Value,
        /// Right hand value
        rhs: Value,
    },
    /// Integer division by zero
    #[error("integer division by zero at {pc}")]
    DivideByZero {
        /// Instruction index
        pc: usize,
    },
    /// The instruction's operand is missing or has the wrong kind
    #[error("bad operand for {op} at {pc}")]
    BadOperand {
        /// Instruction index
        pc: usize,
        /// Operation
        op: Opcode,
    },
    /// Argument slot past the provided arguments
    #[error("argument {slot} out of range at {pc}")]
    ArgOutOfRange {
        /// Instruction index
        pc: usize,
        /// Requested slot
        slot: u16,
    },
    /// Call to a symbol nobody defined
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    /// Not enough values on the stack for an extern's arguments
    #[error("{symbol} takes {arity} arguments, stack holds {available}")]
    ExternArity {
        /// Called symbol
        symbol: String,
        /// Declared argument count
        arity: usize,
        /// Values on the stack
        available: usize,
    },
    /// Body has a broken label graph
    #[error("{0}")]
    LabelGraph(#[from] LabelGraphError),
    /// Execution took more steps than allowed
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
}

/// Default maximum number of executed instructions
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Resolves `call` instructions
pub trait Externs {
    /// Calls `symbol`, popping its arguments from and pushing its result onto `stack`
    fn call(&self, symbol: &str, stack: &mut Vec<Value>) -> Result<(), EvalError>;
}

/// State of a finished body
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Arguments, including writes made by `starg`
    pub args: Vec<Value>,
    /// Locals at the point the body returned
    pub locals: Vec<Value>,
    /// Returned value, [`Value::Null`] for bodies that return nothing
    pub result: Value,
}

/// Runs bodies against a set of externs
pub struct Interpreter<'a, E: Externs + ?Sized> {
    /// Call resolution
    externs: &'a E,
    /// Maximum number of executed instructions
    step_limit: u64,
}
impl<'a, E: Externs + ?Sized> Interpreter<'a, E> {
    /// Creates an interpreter with the default step limit
    pub fn new(externs: &'a E) -> Self {
        Self {
            externs,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
    /// Sets the step limit
    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Runs `body` with the given arguments and initial locals
    pub fn run(
        &self,
        body: &InstructionSequence,
        args: Vec<Value>,
        locals: Vec<Value>,
    ) -> Result<Frame, EvalError> {
        let targets = label_targets(body.as_slice())?;
        let mut frame = Frame {
            args,
            locals,
            result: Value::Null,
        };
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        let mut steps = 0u64;

        while let Some(instr) = body.get(pc) {
            steps += 1;
            if steps > self.step_limit {
                return Err(EvalError::StepLimit(self.step_limit));
            }
            let op = instr.opcode();
            let bad_operand = || EvalError::BadOperand { pc, op };
            let mut next = pc + 1;

            match op {
                Opcode::Nop => {}
                Opcode::LoadNull => stack.push(Value::Null),
                Opcode::LoadConst => {
                    let value = instr
                        .operand()
                        .and_then(Value::from_operand)
                        .ok_or_else(bad_operand)?;
                    stack.push(value);
                }
                Opcode::LoadArg => {
                    let slot = arg_slot(instr.operand()).ok_or_else(bad_operand)?;
                    let value = frame
                        .args
                        .get(slot as usize)
                        .cloned()
                        .ok_or(EvalError::ArgOutOfRange { pc, slot })?;
                    stack.push(value);
                }
                Opcode::StoreArg => {
                    let slot = arg_slot(instr.operand()).ok_or_else(bad_operand)?;
                    let value = pop(&mut stack, pc)?;
                    let arg = frame
                        .args
                        .get_mut(slot as usize)
                        .ok_or(EvalError::ArgOutOfRange { pc, slot })?;
                    *arg = value;
                }
                Opcode::LoadLocal => {
                    let slot = instr.local().ok_or_else(bad_operand)? as usize;
                    // unset locals read as null
                    stack.push(frame.locals.get(slot).cloned().unwrap_or_default());
                }
                Opcode::StoreLocal => {
                    let slot = instr.local().ok_or_else(bad_operand)? as usize;
                    let value = pop(&mut stack, pc)?;
                    if frame.locals.len() <= slot {
                        frame.locals.resize(slot + 1, Value::Null);
                    }
                    frame.locals[slot] = value;
                }
                Opcode::Pop => {
                    pop(&mut stack, pc)?;
                }
                Opcode::Dup => {
                    let top = stack.last().cloned().ok_or(EvalError::StackUnderflow { pc })?;
                    stack.push(top);
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    let rhs = pop(&mut stack, pc)?;
                    let lhs = pop(&mut stack, pc)?;
                    stack.push(arithmetic(op, lhs, rhs, pc)?);
                }
                Opcode::CompareEq => {
                    let rhs = pop(&mut stack, pc)?;
                    let lhs = pop(&mut stack, pc)?;
                    stack.push(Value::Bool(lhs == rhs));
                }
                Opcode::CompareLt => {
                    let rhs = pop(&mut stack, pc)?;
                    let lhs = pop(&mut stack, pc)?;
                    let lt = match (lhs, rhs) {
                        (Value::I32(a), Value::I32(b)) => a < b,
                        (Value::F32(a), Value::F32(b)) => a < b,
                        (Value::F64(a), Value::F64(b)) => a < b,
                        (lhs, rhs) => return Err(EvalError::TypeMismatch { pc, op, lhs, rhs }),
                    };
                    stack.push(Value::Bool(lt));
                }
                Opcode::Branch | Opcode::BranchTrue | Opcode::BranchFalse => {
                    let label = instr.branch_target().ok_or_else(bad_operand)?;
                    let taken = match op {
                        Opcode::BranchTrue => pop(&mut stack, pc)?.is_truthy(),
                        Opcode::BranchFalse => !pop(&mut stack, pc)?.is_truthy(),
                        _ => true,
                    };
                    if taken {
                        next = *targets
                            .get(&label)
                            .ok_or(LabelGraphError::Dangling { index: pc, label })?;
                    }
                }
                Opcode::Call => {
                    let symbol = match instr.operand() {
                        Some(Operand::Symbol(symbol)) => symbol,
                        _ => return Err(bad_operand()),
                    };
                    self.externs.call(symbol, &mut stack)?;
                }
                Opcode::Return => {
                    frame.result = stack.pop().unwrap_or_default();
                    return Ok(frame);
                }
            }
            pc = next;
        }
        Ok(frame)
    }
}

/// Argument slot of an operand
fn arg_slot(operand: Option<&Operand>) -> Option<u16> {
    match operand {
        Some(Operand::Arg(slot)) => Some(*slot),
        _ => None,
    }
}

/// Pops the top of the stack
fn pop(stack: &mut Vec<Value>, pc: usize) -> Result<Value, EvalError> {
    stack.pop().ok_or(EvalError::StackUnderflow { pc })
}

/// Binary arithmetic on two values of the same numeric type. Floats follow IEEE-754.
fn arithmetic(op: Opcode, lhs: Value, rhs: Value, pc: usize) -> Result<Value, EvalError> {
    /// Applies `op` to two floats
    fn float<T>(op: Opcode, a: T, b: T) -> T
    where
        T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T>,
    {
        match op {
            Opcode::Add => a + b,
            Opcode::Sub => a - b,
            Opcode::Mul => a * b,
            _ => a / b,
        }
    }

    match (lhs, rhs) {
        (Value::F32(a), Value::F32(b)) => Ok(Value::F32(float(op, a, b))),
        (Value::F64(a), Value::F64(b)) => Ok(Value::F64(float(op, a, b))),
        (Value::I32(a), Value::I32(b)) => {
            let v = match op {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                _ => {
                    if b == 0 {
                        return Err(EvalError::DivideByZero { pc });
                    }
                    a.wrapping_div(b)
                }
            };
            Ok(Value::I32(v))
        }
        (lhs, rhs) => Err(EvalError::TypeMismatch { pc, op, lhs, rhs }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::code::label::LabelId;
    use crate::code::{Instruction, InstructionSequence, Opcode};

    use super::{EvalError, Externs, Interpreter};
    use crate::runtime::value::Value;

    /// Externs backed by constant results
    struct Consts(HashMap<&'static str, Value>);
    impl Externs for Consts {
        fn call(&self, symbol: &str, stack: &mut Vec<Value>) -> Result<(), EvalError> {
            let value = self
                .0
                .get(symbol)
                .cloned()
                .ok_or_else(|| EvalError::UnknownSymbol(symbol.to_string()))?;
            stack.push(value);
            Ok(())
        }
    }

    /// No externs at all
    fn none() -> Consts {
        Consts(HashMap::new())
    }

    #[test]
    /// Loop summing 1..=4 through locals and a backward branch
    fn test_loop() {
        let top = LabelId::from_raw(0);
        let done = LabelId::from_raw(1);
        let body = InstructionSequence::new(vec![
            Instruction::load_const(0),
            Instruction::store_local(0),
            Instruction::load_const(1),
            Instruction::store_local(1),
            // top: if !(i < 5) goto done
            Instruction::load_local(1).labelled(top),
            Instruction::load_const(5),
            Instruction::new(Opcode::CompareLt),
            Instruction::branch_false(done),
            Instruction::load_local(0),
            Instruction::load_local(1),
            Instruction::new(Opcode::Add),
            Instruction::store_local(0),
            Instruction::load_local(1),
            Instruction::load_const(1),
            Instruction::new(Opcode::Add),
            Instruction::store_local(1),
            Instruction::branch(top),
            Instruction::load_local(0).labelled(done),
            Instruction::ret(),
        ]);
        let frame = Interpreter::new(&none()).run(&body, vec![], vec![]).unwrap();
        assert_eq!(frame.result, Value::I32(10));
    }

    #[test]
    /// Float division keeps fractional results
    fn test_float_division() {
        let body = InstructionSequence::new(vec![
            Instruction::load_const(7.0f32),
            Instruction::load_const(5.0f32),
            Instruction::new(Opcode::Div),
            Instruction::ret(),
        ]);
        let frame = Interpreter::new(&none()).run(&body, vec![], vec![]).unwrap();
        assert_eq!(frame.result, Value::F32(7.0 / 5.0));
    }

    #[test]
    /// Errors carry the failing instruction
    fn test_errors() {
        let registry = none();
        let interp = Interpreter::new(&registry);
        let div0 = InstructionSequence::new(vec![
            Instruction::load_const(1),
            Instruction::load_const(0),
            Instruction::new(Opcode::Div),
        ]);
        assert_eq!(
            interp.run(&div0, vec![], vec![]),
            Err(EvalError::DivideByZero { pc: 2 })
        );

        let mixed = InstructionSequence::new(vec![
            Instruction::load_const(1),
            Instruction::load_const(1.0f32),
            Instruction::new(Opcode::Add),
        ]);
        assert!(matches!(
            interp.run(&mixed, vec![], vec![]),
            Err(EvalError::TypeMismatch { pc: 2, .. })
        ));

        let underflow = InstructionSequence::new(vec![Instruction::new(Opcode::Pop)]);
        assert_eq!(
            interp.run(&underflow, vec![], vec![]),
            Err(EvalError::StackUnderflow { pc: 0 })
        );

        let unknown = InstructionSequence::new(vec![Instruction::call("missing")]);
        assert_eq!(
            interp.run(&unknown, vec![], vec![]),
            Err(EvalError::UnknownSymbol("missing".into()))
        );
    }

    #[test]
    /// Infinite loops stop at the step limit
    fn test_step_limit() {
        let top = LabelId::from_raw(0);
        let body = InstructionSequence::new(vec![Instruction::branch(top).labelled(top)]);
        let out = Interpreter::new(&none())
            .with_step_limit(50)
            .run(&body, vec![], vec![]);
        assert_eq!(out, Err(EvalError::StepLimit(50)));
    }

    #[test]
    /// Arguments are writable and reported back
    fn test_args() {
        let body = InstructionSequence::new(vec![
            Instruction::load_arg(0),
            Instruction::load_const(2),
            Instruction::new(Opcode::Mul),
            Instruction::store_arg(0),
            Instruction::call("flag"),
            Instruction::ret(),
        ]);
        let externs = Consts(HashMap::from([("flag", Value::Bool(true))]));
        let frame = Interpreter::new(&externs)
            .run(&body, vec![Value::I32(21)], vec![])
            .unwrap();
        assert_eq!(frame.args, vec![Value::I32(42)]);
        assert_eq!(frame.result, Value::Bool(true));
    }
}
