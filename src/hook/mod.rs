//! # Hook
//!
//! This module covers hooks, callbacks that run before or after a host method's original body

use std::sync::Arc;

use crate::runtime::value::Value;

/// Hook run before the original body
pub type PreCallFn = Arc<dyn Fn(&mut Prefix<'_>) + Send + Sync>;
/// Hook run after the original body
pub type PostCallFn = Arc<dyn Fn(&mut Postfix<'_>) + Send + Sync>;

/// Boxes a pre-call hook
pub fn pre_call(hook: impl Fn(&mut Prefix<'_>) + Send + Sync + 'static) -> PreCallFn {
    Arc::new(hook)
}
/// Boxes a post-call hook
pub fn post_call(hook: impl Fn(&mut Postfix<'_>) + Send + Sync + 'static) -> PostCallFn {
    Arc::new(hook)
}

/// Well known priorities. Hooks with a higher priority run first; equal priorities run in registration order.
pub mod priority {
    /// Runs after everything else
    pub const LAST: i32 = 0;
    /// Lower than [`LOW`]
    pub const VERY_LOW: i32 = 100;
    /// Lower than [`NORMAL`]
    pub const LOW: i32 = 200;
    /// Default priority
    pub const NORMAL: i32 = 400;
    /// Higher than [`NORMAL`]
    pub const HIGH: i32 = 600;
    /// Higher than [`HIGH`]
    pub const VERY_HIGH: i32 = 700;
    /// Runs before everything else
    pub const FIRST: i32 = 800;
}

/// View handed to a pre-call hook
pub struct Prefix<'a> {
    /// Arguments of the call, writable so hooks can change what the original body sees
    args: &'a mut [Value],
    /// Result supplied by pre-call hooks so far
    result: &'a mut Option<Value>,
    /// Whether the original body will still run
    run_original: &'a mut bool,
    /// Whether this hook supplied a result
    supplied: bool,
}
impl<'a> Prefix<'a> {
    /// Wraps the interceptor's call state for one hook invocation
    pub(crate) fn new(
        args: &'a mut [Value],
        result: &'a mut Option<Value>,
        run_original: &'a mut bool,
    ) -> Self {
        Self {
            args,
            result,
            run_original,
            supplied: false,
        }
    }

    /// Arguments of the call
    pub fn args(&self) -> &[Value] {
        &*self.args
    }
    /// Mutable arguments of the call
    pub fn args_mut(&mut self) -> &mut [Value] {
        &mut *self.args
    }
    /// Skips the original body. Post-call hooks still run unless configured otherwise.
    pub fn skip_original(&mut self) {
        *self.run_original = false;
    }
    /// Whether an earlier hook already skipped the original body
    pub fn is_skipping(&self) -> bool {
        !*self.run_original
    }
    /// Supplies the value returned when the original body is skipped
    pub fn set_result(&mut self, value: Value) {
        *self.result = Some(value);
        self.supplied = true;
    }
    /// Result supplied so far, if any
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }
    /// Whether this hook called [`set_result`](Self::set_result)
    pub(crate) fn supplied(&self) -> bool {
        self.supplied
    }
}

/// View handed to a post-call hook
pub struct Postfix<'a> {
    /// Arguments as they were after the original body ran
    args: &'a [Value],
    /// Current result
    result: &'a mut Value,
    /// Whether the original body was skipped
    skipped: bool,
}
impl<'a> Postfix<'a> {
    /// Wraps the interceptor's call state for one hook invocation
    pub(crate) fn new(args: &'a [Value], result: &'a mut Value, skipped: bool) -> Self {
        Self {
            args,
            result,
            skipped,
        }
    }

    /// Arguments of the call
    pub fn args(&self) -> &[Value] {
        self.args
    }
    /// Current result
    pub fn result(&self) -> &Value {
        &*self.result
    }
    /// Overrides the result
    pub fn set_result(&mut self, value: Value) {
        *self.result = value;
    }
    /// Whether a pre-call hook skipped the original body
    pub fn original_skipped(&self) -> bool {
        self.skipped
    }
}

/// Hook together with the data that decides when it runs
#[derive(Clone)]
pub struct HookEntry<F> {
    /// Priority, higher runs first
    pub priority: i32,
    /// Registry that installed the hook
    pub owner: Arc<str>,
    /// Hook callback
    pub hook: F,
}
