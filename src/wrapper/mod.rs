//! # Wrapper
//!
//! The call interceptor: takes a call to a host method and runs the installed hooks around the original body

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::hook::{HookEntry, PostCallFn, PreCallFn, Postfix, Prefix};
use crate::runtime::value::Value;

/// Hooks installed on one method
#[derive(Clone, Default)]
pub struct Interceptor {
    /// Pre-call hooks, in execution order
    prefixes: Vec<HookEntry<PreCallFn>>,
    /// Post-call hooks, in execution order
    postfixes: Vec<HookEntry<PostCallFn>>,
}
impl Interceptor {
    /// Creates an interceptor with no hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-call hook. Hooks with equal priority keep the order they were added in.
    pub fn add_prefix(&mut self, owner: Arc<str>, priority: i32, hook: PreCallFn) {
        self.prefixes.push(HookEntry {
            priority,
            owner,
            hook,
        });
        self.prefixes.sort_by_key(|e| Reverse(e.priority));
    }
    /// Adds a post-call hook. Hooks with equal priority keep the order they were added in.
    pub fn add_postfix(&mut self, owner: Arc<str>, priority: i32, hook: PostCallFn) {
        self.postfixes.push(HookEntry {
            priority,
            owner,
            hook,
        });
        self.postfixes.sort_by_key(|e| Reverse(e.priority));
    }

    /// Whether no hooks are installed
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.postfixes.is_empty()
    }
    /// Number of pre-call hooks
    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }
    /// Number of post-call hooks
    pub fn postfix_count(&self) -> usize {
        self.postfixes.len()
    }

    /// Runs a call through the hooks.
    ///
    /// - every pre-call hook runs, even after one of them skipped the original body
    /// - `original` runs unless a pre-call hook skipped it; a skipped call returns the hook-supplied result, or [`Value::Null`]
    /// - post-call hooks run afterwards; after a skip they only run if `postfix_on_skip` is set
    pub fn call<E>(
        &self,
        args: &mut [Value],
        postfix_on_skip: bool,
        original: impl FnOnce(&mut [Value]) -> Result<Value, E>,
    ) -> Result<Value, E> {
        let mut supplied: Option<Value> = None;
        let mut run_original = true;
        let mut supplier: Option<&str> = None;

        for entry in &self.prefixes {
            let mut prefix = Prefix::new(args, &mut supplied, &mut run_original);
            (entry.hook)(&mut prefix);
            if prefix.supplied() {
                if let Some(previous) = supplier {
                    warn!(
                        previous,
                        current = &*entry.owner,
                        "conflicting pre-call results, keeping the later one"
                    );
                }
                supplier = Some(&*entry.owner);
            }
        }

        let skipped = !run_original;
        let mut result = if skipped {
            trace!("original body skipped");
            supplied.unwrap_or_default()
        } else {
            original(args)?
        };

        if !skipped || postfix_on_skip {
            for entry in &self.postfixes {
                let mut postfix = Postfix::new(args, &mut result, skipped);
                (entry.hook)(&mut postfix);
            }
        }
        Ok(result)
    }
}
