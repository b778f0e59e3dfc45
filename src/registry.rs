//! # Registry
//!
//! Collects patch registrations during startup and applies them to a [`Runtime`] in one call.
//!
//! Application is fail-open per registration: a registration that can't be resolved or whose rewrite fails is reported
//! and skipped, leaving that method on its previous body, while every other registration still gets applied.
//! A rewritten body only goes live after its label graph validates.

use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hook::{self, PostCallFn, PreCallFn, Postfix, Prefix};
use crate::patcher::validate::validate;
use crate::patcher::{PatchError, Patcher};
use crate::runtime::resolve::{MethodHandle, MethodIdentity, ResolutionError};
use crate::runtime::{Body, Runtime};

/// What a registration does to its target
#[derive(Clone)]
pub enum PatchKind {
    /// Runs before the original body
    PreCall(PreCallFn),
    /// Runs after the original body
    PostCall(PostCallFn),
    /// Replaces the body with a rewritten one
    Rewrite(Arc<dyn Patcher>),
}
impl PatchKind {
    /// Short name used in reports and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::PreCall(_) => "pre-call",
            Self::PostCall(_) => "post-call",
            Self::Rewrite(_) => "rewrite",
        }
    }
}
impl fmt::Debug for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewrite(patcher) => write!(f, "Rewrite({})", patcher.name()),
            other => f.write_str(other.label()),
        }
    }
}

/// One interception point
#[derive(Clone, Debug)]
pub struct PatchRegistration {
    /// Method to patch
    pub target: MethodIdentity,
    /// What to do to it
    pub kind: PatchKind,
    /// Higher priorities apply first; see [`hook::priority`]
    pub priority: i32,
}
impl PatchRegistration {
    /// Registration with [`hook::priority::NORMAL`]
    pub fn new(target: MethodIdentity, kind: PatchKind) -> Self {
        Self {
            target,
            kind,
            priority: hook::priority::NORMAL,
        }
    }
    /// Overrides the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Source of [`Registry`] instance ids
static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(0);

/// Stable identity of a registration: the registry it belongs to and its position there.
///
/// Two registries never share ids, even when created with the same owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchId {
    /// Owner of the registry
    pub owner: Arc<str>,
    /// Registration order within the registry
    pub index: usize,
    /// Instance id of the registry
    registry: u64,
}
impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.index)
    }
}

/// Reasons a registration was not applied
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The target could not be resolved
    #[error("{0}")]
    Resolution(#[from] ResolutionError),
    /// The rewrite failed
    #[error("{0}")]
    Patch(#[from] PatchError),
    /// Rewrite aimed at a method without a code body
    #[error("{0} has no code body to rewrite")]
    NotRewritable(MethodIdentity),
    /// This registration was already applied to the target
    #[error("{0} was already applied")]
    AlreadyApplied(PatchId),
}

/// A registration that was not applied
#[derive(Debug)]
pub struct ApplyFailure {
    /// Registration that failed
    pub id: PatchId,
    /// Its target
    pub target: MethodIdentity,
    /// Its kind, see [`PatchKind::label`]
    pub kind: &'static str,
    /// Why
    pub error: ApplyError,
}

/// Outcome of [`Registry::apply_all`]
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Registrations that were applied
    pub installed: Vec<PatchId>,
    /// Registrations that were not
    pub failures: Vec<ApplyFailure>,
}
impl ApplyReport {
    /// Whether every registration was applied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
    /// Turns any failure into an error, for hosts that treat setup failures as fatal
    pub fn into_result(self) -> Result<Vec<PatchId>, SetupError> {
        if self.failures.is_empty() {
            Ok(self.installed)
        } else {
            Err(SetupError(self.failures))
        }
    }
}

/// Every failure of one [`Registry::apply_all`] call
#[derive(Debug, Error)]
#[error("{} patch(es) failed to apply", .0.len())]
pub struct SetupError(pub Vec<ApplyFailure>);

/// Patch registrations owned by one plugin
pub struct Registry {
    /// Owner id, shared by every [`PatchId`] of this registry
    owner: Arc<str>,
    /// Instance id keeping ids of same-owner registries apart
    instance: u64,
    /// Registrations in registration order
    registrations: Vec<PatchRegistration>,
}
impl Registry {
    /// Creates an empty registry.
    ///
    /// `owner` names the plugin in logs and hook conflict reports. Registries sharing an owner are still tracked
    /// separately for apply-once purposes.
    pub fn new(owner: impl Into<Arc<str>>) -> Self {
        Self {
            owner: owner.into(),
            instance: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            registrations: Vec::new(),
        }
    }

    /// Owner id
    pub fn owner(&self) -> &str {
        &self.owner
    }
    /// Number of registrations
    pub fn len(&self) -> usize {
        self.registrations.len()
    }
    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Adds a registration, returning its id
    pub fn register(&mut self, registration: PatchRegistration) -> PatchId {
        self.registrations.push(registration);
        self.id(self.registrations.len() - 1)
    }
    /// Id of the registration at `index`
    fn id(&self, index: usize) -> PatchId {
        PatchId {
            owner: self.owner.clone(),
            index,
            registry: self.instance,
        }
    }
    /// Registers a pre-call hook
    pub fn pre_call(
        &mut self,
        target: MethodIdentity,
        hook: impl Fn(&mut Prefix<'_>) + Send + Sync + 'static,
    ) -> PatchId {
        self.register(PatchRegistration::new(
            target,
            PatchKind::PreCall(hook::pre_call(hook)),
        ))
    }
    /// Registers a post-call hook
    pub fn post_call(
        &mut self,
        target: MethodIdentity,
        hook: impl Fn(&mut Postfix<'_>) + Send + Sync + 'static,
    ) -> PatchId {
        self.register(PatchRegistration::new(
            target,
            PatchKind::PostCall(hook::post_call(hook)),
        ))
    }
    /// Registers a rewrite
    pub fn rewrite(&mut self, target: MethodIdentity, patcher: impl Patcher + 'static) -> PatchId {
        self.register(PatchRegistration::new(
            target,
            PatchKind::Rewrite(Arc::new(patcher)),
        ))
    }

    /// Applies every registration to `runtime`.
    ///
    /// Registrations apply by descending priority, then registration order. Applying the same registry twice
    /// reports every registration of the second pass as [`ApplyError::AlreadyApplied`] and changes nothing.
    pub fn apply_all(&self, runtime: &mut Runtime) -> ApplyReport {
        let mut order: Vec<_> = self.registrations.iter().enumerate().collect();
        order.sort_by_key(|(_, r)| Reverse(r.priority));

        let mut report = ApplyReport::default();
        for (index, registration) in order {
            let id = self.id(index);
            match self.apply_one(runtime, &id, registration) {
                Ok(()) => {
                    info!(patch = %id, target = %registration.target, kind = registration.kind.label(), "applied patch");
                    report.installed.push(id);
                }
                Err(error) => {
                    warn!(patch = %id, target = %registration.target, kind = registration.kind.label(), %error, "patch not applied");
                    report.failures.push(ApplyFailure {
                        id,
                        target: registration.target.clone(),
                        kind: registration.kind.label(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Applies a single registration
    fn apply_one(
        &self,
        runtime: &mut Runtime,
        id: &PatchId,
        registration: &PatchRegistration,
    ) -> Result<(), ApplyError> {
        let handle = runtime.resolve(&registration.target)?;
        if runtime.is_applied(handle, id) {
            return Err(ApplyError::AlreadyApplied(id.clone()));
        }

        match &registration.kind {
            PatchKind::PreCall(hook) => {
                if let Some(interceptor) = runtime.interceptor_mut(handle) {
                    interceptor.add_prefix(self.owner.clone(), registration.priority, hook.clone());
                }
            }
            PatchKind::PostCall(hook) => {
                if let Some(interceptor) = runtime.interceptor_mut(handle) {
                    interceptor.add_postfix(self.owner.clone(), registration.priority, hook.clone());
                }
            }
            PatchKind::Rewrite(patcher) => {
                let patched = rewrite(runtime, handle, patcher.as_ref(), &registration.target)?;
                runtime.install_body(handle, patched);
            }
        }
        runtime.mark_applied(handle, id.clone());
        Ok(())
    }
}

/// Builds the replacement body for `handle` without touching the installed one
fn rewrite(
    runtime: &Runtime,
    handle: MethodHandle,
    patcher: &dyn Patcher,
    target: &MethodIdentity,
) -> Result<crate::code::InstructionSequence, ApplyError> {
    let current = match runtime.body_of(handle) {
        Some(Body::Code(body)) => body.clone(),
        _ => return Err(ApplyError::NotRewritable(target.clone())),
    };
    let patched = patcher.patch(&current).map_err(ApplyError::Patch)?;
    validate(patched.as_slice()).map_err(PatchError::from)?;
    debug!(
        patcher = patcher.name(),
        before = current.len(),
        after = patched.len(),
        "rewrote body"
    );
    Ok(patched)
}
