//! # Runtime
//!
//! The host side: a table of methods, the externs their bodies may call, and invocation through installed hooks.
//!
//! Setup happens through `&mut Runtime` (defining methods, applying patches); invocation only needs `&Runtime`.
//! Installed bodies are immutable [`Arc`]s that get replaced as a whole, so a call always sees either the old or the new body.

pub mod context;
pub mod eval;
pub mod resolve;
pub mod value;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::code::InstructionSequence;
use crate::config::EngineConfig;
use crate::registry::PatchId;
use crate::wrapper::Interceptor;

use self::context::ContextHandle;
use self::eval::{EvalError, Externs, Interpreter};
use self::resolve::{resolve, MethodHandle, MethodIdentity, ResolutionError};
use self::value::Value;

/// Native method implementation
pub type NativeFn = Arc<dyn Fn(&mut [Value]) -> Value + Send + Sync>;
/// Extern callable from code bodies
pub type ExternFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Implementation of a host method
#[derive(Clone)]
pub enum Body {
    /// Instruction sequence run on the interpreter; can be rewritten
    Code(Arc<InstructionSequence>),
    /// Native function; can only be hooked
    Native(NativeFn),
}
impl Body {
    /// Code body
    pub fn code(body: impl Into<InstructionSequence>) -> Self {
        Self::Code(Arc::new(body.into()))
    }
    /// Native body
    pub fn native(func: impl Fn(&mut [Value]) -> Value + Send + Sync + 'static) -> Self {
        Self::Native(Arc::new(func))
    }
}

/// Errors while invoking a host method
#[derive(Debug, Error, PartialEq)]
pub enum InvokeError {
    /// The handle does not belong to this runtime
    #[error("unknown method handle {0:?}")]
    UnknownHandle(MethodHandle),
    /// The code body failed
    #[error("{0}")]
    Eval(#[from] EvalError),
}

/// One defined method
struct MethodEntry {
    /// Identity the method was defined with
    identity: MethodIdentity,
    /// Currently installed body
    body: Body,
    /// Installed hooks
    interceptor: Interceptor,
    /// Patches that have already been applied to this method
    applied: HashSet<PatchId>,
}

/// Registered extern
struct Extern {
    /// Number of arguments popped from the stack
    arity: usize,
    /// Implementation
    func: ExternFn,
}

/// Host method table plus installed patches
pub struct Runtime {
    /// Configuration
    config: EngineConfig,
    /// Methods, indexed by [`MethodHandle`]
    methods: Vec<MethodEntry>,
    /// Externs by symbol
    externs: HashMap<String, Extern>,
    /// Context consulted by guard code
    context: ContextHandle,
}
impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
impl Runtime {
    /// Creates a runtime using the default configuration and the global context
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }
    /// Creates a runtime using `config` and the global context
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            methods: Vec::new(),
            externs: HashMap::new(),
            context: ContextHandle::global(),
        }
    }
    /// Uses `context` instead of the global context
    pub fn with_context(mut self, context: ContextHandle) -> Self {
        self.context = context;
        self
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    /// Context handle exposed to guard code
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// Adds a method to the table
    pub fn define_method(&mut self, identity: MethodIdentity, body: Body) -> MethodHandle {
        debug!(method = %identity, "defined method");
        self.methods.push(MethodEntry {
            identity,
            body,
            interceptor: Interceptor::new(),
            applied: HashSet::new(),
        });
        MethodHandle(self.methods.len() - 1)
    }
    /// Defines an extern. It pops `arity` arguments and always pushes its result, [`Value::Null`] included.
    pub fn define_extern(
        &mut self,
        symbol: impl Into<String>,
        arity: usize,
        func: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) {
        self.externs.insert(
            symbol.into(),
            Extern {
                arity,
                func: Arc::new(func),
            },
        );
    }
    /// Defines a zero-argument extern returning the current context
    pub fn define_context_accessor(&mut self, symbol: impl Into<String>) {
        let context = self.context.clone();
        self.define_extern(symbol, 0, move |_| context.get());
    }

    /// Resolves an identity to exactly one defined method
    pub fn resolve(&self, identity: &MethodIdentity) -> Result<MethodHandle, ResolutionError> {
        resolve(self.methods.iter().map(|m| &m.identity), identity)
    }
    /// Identity a method was defined with
    pub fn identity(&self, handle: MethodHandle) -> Option<&MethodIdentity> {
        self.methods.get(handle.0).map(|m| &m.identity)
    }
    /// Installed code body, `None` for native methods and unknown handles
    pub fn body(&self, handle: MethodHandle) -> Option<Arc<InstructionSequence>> {
        match &self.methods.get(handle.0)?.body {
            Body::Code(body) => Some(body.clone()),
            Body::Native(_) => None,
        }
    }
    /// Hooks installed on a method
    pub fn interceptor(&self, handle: MethodHandle) -> Option<&Interceptor> {
        self.methods.get(handle.0).map(|m| &m.interceptor)
    }

    /// Calls a method through its hooks. `args` reflects writes made by hooks and by the body.
    pub fn invoke(&self, handle: MethodHandle, args: &mut [Value]) -> Result<Value, InvokeError> {
        let entry = self
            .methods
            .get(handle.0)
            .ok_or(InvokeError::UnknownHandle(handle))?;
        trace!(method = %entry.identity, "invoke");
        entry
            .interceptor
            .call(args, self.config.run_postfix_on_skip, |args| {
                self.run_original(&entry.body, args)
            })
    }

    /// Runs a body without hooks
    fn run_original(&self, body: &Body, args: &mut [Value]) -> Result<Value, InvokeError> {
        match body {
            Body::Native(func) => Ok(func(args)),
            Body::Code(code) => {
                let frame = Interpreter::new(self)
                    .with_step_limit(self.config.step_limit)
                    .run(code, args.to_vec(), Vec::new())?;
                args.clone_from_slice(&frame.args);
                Ok(frame.result)
            }
        }
    }

    /// Current body of a method
    pub(crate) fn body_of(&self, handle: MethodHandle) -> Option<&Body> {
        self.methods.get(handle.0).map(|m| &m.body)
    }
    /// Replaces a method's code body in one step
    pub(crate) fn install_body(&mut self, handle: MethodHandle, body: InstructionSequence) {
        if let Some(entry) = self.methods.get_mut(handle.0) {
            entry.body = Body::Code(Arc::new(body));
        }
    }
    /// Mutable hooks of a method
    pub(crate) fn interceptor_mut(&mut self, handle: MethodHandle) -> Option<&mut Interceptor> {
        self.methods.get_mut(handle.0).map(|m| &mut m.interceptor)
    }
    /// Whether `id` was already applied to the method
    pub(crate) fn is_applied(&self, handle: MethodHandle, id: &PatchId) -> bool {
        self.methods
            .get(handle.0)
            .is_some_and(|m| m.applied.contains(id))
    }
    /// Records that `id` was applied to the method
    pub(crate) fn mark_applied(&mut self, handle: MethodHandle, id: PatchId) {
        if let Some(entry) = self.methods.get_mut(handle.0) {
            entry.applied.insert(id);
        }
    }
}

impl Externs for Runtime {
    fn call(&self, symbol: &str, stack: &mut Vec<Value>) -> Result<(), EvalError> {
        let ext = self
            .externs
            .get(symbol)
            .ok_or_else(|| EvalError::UnknownSymbol(symbol.to_string()))?;
        if stack.len() < ext.arity {
            return Err(EvalError::ExternArity {
                symbol: symbol.to_string(),
                arity: ext.arity,
                available: stack.len(),
            });
        }
        let args = stack.split_off(stack.len() - ext.arity);
        stack.push((ext.func)(&args));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::code::label::LabelId;
    use crate::code::{Instruction, InstructionSequence, Opcode};
    use crate::config::EngineConfig;
    use crate::hook::{post_call, pre_call};

    use super::context::ContextHandle;
    use super::eval::EvalError;
    use super::resolve::MethodIdentity;
    use super::value::Value;
    use super::{Body, InvokeError, Runtime};

    /// Runtime with a private context
    fn runtime() -> Runtime {
        Runtime::new().with_context(ContextHandle::new())
    }

    #[test]
    /// Code bodies run on the interpreter and can call externs
    fn test_invoke_code() {
        let mut rt = runtime();
        rt.define_extern("twice", 1, |args| match args[0] {
            Value::I32(v) => Value::I32(v * 2),
            _ => Value::Null,
        });
        let handle = rt.define_method(
            MethodIdentity::new("Math", "Quad").with_parameters(["int"]),
            Body::code(vec![
                Instruction::load_arg(0),
                Instruction::call("twice"),
                Instruction::call("twice"),
                Instruction::ret(),
            ]),
        );
        assert_eq!(rt.invoke(handle, &mut [Value::I32(3)]), Ok(Value::I32(12)));
        assert!(rt.body(handle).is_some());
    }

    #[test]
    /// Native bodies see hook-modified arguments
    fn test_invoke_native_with_hook() {
        let mut rt = runtime();
        let handle = rt.define_method(
            MethodIdentity::new("Pawn", "Age"),
            Body::native(|args| args[0].clone()),
        );
        rt.interceptor_mut(handle).unwrap().add_prefix(
            "tests".into(),
            0,
            pre_call(|pre| pre.args_mut()[0] = Value::I32(99)),
        );
        let mut args = [Value::I32(1)];
        assert_eq!(rt.invoke(handle, &mut args), Ok(Value::I32(99)));
        assert_eq!(args[0], Value::I32(99));
        assert!(rt.body(handle).is_none());
    }

    #[test]
    /// The context accessor reads whatever is installed at call time
    fn test_context_accessor() {
        let mut rt = runtime();
        rt.define_context_accessor("ctx");
        let handle = rt.define_method(
            MethodIdentity::new("Find", "Storyteller"),
            Body::code(vec![Instruction::call("ctx"), Instruction::ret()]),
        );
        assert_eq!(rt.invoke(handle, &mut []), Ok(Value::Null));
        rt.context().install(Value::I32(5));
        assert_eq!(rt.invoke(handle, &mut []), Ok(Value::I32(5)));
    }

    #[test]
    /// Body errors surface to the caller
    fn test_invoke_errors() {
        let mut rt = runtime();
        rt.define_extern("pair", 2, |_| Value::Null);
        let handle = rt.define_method(
            MethodIdentity::new("A", "b"),
            Body::code(InstructionSequence::new(vec![
                Instruction::load_const(1),
                Instruction::call("pair"),
                Instruction::new(Opcode::Pop),
            ])),
        );
        assert_eq!(
            rt.invoke(handle, &mut []),
            Err(InvokeError::Eval(EvalError::ExternArity {
                symbol: "pair".into(),
                arity: 2,
                available: 1
            }))
        );
    }

    #[test]
    /// With post-call hooks disabled after a skip, the pre-call result is returned as is
    fn test_no_postfix_on_skip() {
        let config = EngineConfig::default().with_postfix_on_skip(false);
        let mut rt = Runtime::with_config(config).with_context(ContextHandle::new());
        let handle = rt.define_method(
            MethodIdentity::new("IncidentWorker", "CanFireNow"),
            Body::native(|_| Value::Bool(false)),
        );
        let interceptor = rt.interceptor_mut(handle).unwrap();
        interceptor.add_prefix(
            "tests".into(),
            0,
            pre_call(|pre| {
                pre.set_result(Value::I32(1));
                if pre.args()[0].is_truthy() {
                    pre.skip_original();
                }
            }),
        );
        interceptor.add_postfix(
            "tests".into(),
            0,
            post_call(|post| post.set_result(Value::Bool(true))),
        );

        assert_eq!(rt.invoke(handle, &mut [Value::Bool(true)]), Ok(Value::I32(1)));
        assert_eq!(rt.invoke(handle, &mut [Value::Bool(false)]), Ok(Value::Bool(true)));
    }

    #[test]
    /// Code bodies stop at the configured step limit
    fn test_step_limit() {
        let top = LabelId::from_raw(0);
        let body = vec![
            Instruction::new(Opcode::Nop).labelled(top),
            Instruction::branch(top),
        ];

        let mut rt = Runtime::with_config(EngineConfig::default().with_step_limit(50))
            .with_context(ContextHandle::new());
        let handle = rt.define_method(MethodIdentity::new("A", "spin"), Body::code(body));
        assert!(matches!(
            rt.invoke(handle, &mut []),
            Err(InvokeError::Eval(EvalError::StepLimit(50)))
        ));
        assert_eq!(rt.config().step_limit, 50);
    }
}
