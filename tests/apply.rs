use ilpatch::code::{Instruction, InstructionSequence, Opcode};
use ilpatch::config::EngineConfig;
use ilpatch::hook::priority;
use ilpatch::patcher::guarded::GuardedScale;
use ilpatch::registry::{ApplyError, PatchKind, PatchRegistration, Registry};
use ilpatch::runtime::context::ContextHandle;
use ilpatch::runtime::resolve::{MethodIdentity, ResolutionError};
use ilpatch::runtime::value::Value;
use ilpatch::runtime::{Body, Runtime};

/// Host-side storyteller, the context guard code consults
struct Storyteller {
    /// Whether the difficulty component is attached
    has_comp: bool,
}

/// `PawnGenerator::RecruitDifficulty(float)`:
/// `loc7 = arg0 * 2; loc8 = loc7; return loc8`
fn recruit_difficulty() -> InstructionSequence {
    InstructionSequence::new(vec![
        Instruction::load_arg(0),
        Instruction::load_const(2.0f32),
        Instruction::new(Opcode::Mul),
        Instruction::store_local(7),
        Instruction::load_local(7),
        Instruction::store_local(8),
        Instruction::load_local(8),
        Instruction::ret(),
    ])
}

/// Runtime modelling the host: a code method, a native method and the externs guard code uses
fn host(context: ContextHandle) -> Runtime {
    let mut rt = Runtime::with_config(EngineConfig::default()).with_context(context);
    rt.define_context_accessor("Find.Storyteller");
    rt.define_extern("TryGetComp", 1, |args| {
        let enabled = args[0]
            .downcast_ref::<Storyteller>()
            .is_some_and(|s| s.has_comp);
        Value::Bool(enabled)
    });
    rt.define_method(
        MethodIdentity::new("PawnGenerator", "RecruitDifficulty").with_parameters(["float"]),
        Body::code(recruit_difficulty()),
    );
    rt.define_method(
        MethodIdentity::new("IncidentWorker", "CanFireNow").with_parameters(["IncidentParms"]),
        Body::native(|_| Value::Bool(false)),
    );
    rt.define_method(
        MethodIdentity::new("IncidentWorker", "CanFireNow")
            .with_parameters(["IncidentParms", "bool"]),
        Body::native(|_| Value::Bool(false)),
    );
    rt
}

/// Registry used by the plugin under test
fn registry() -> Registry {
    let mut registry = Registry::new("difficulty");
    registry.rewrite(
        MethodIdentity::new("PawnGenerator", "RecruitDifficulty").with_parameters(["float"]),
        GuardedScale::new(7, "Find.Storyteller", "TryGetComp", 5.0f32).before_store_to(8),
    );
    registry.post_call(
        MethodIdentity::new("IncidentWorker", "CanFireNow").with_parameters(["IncidentParms"]),
        |post| post.set_result(Value::Bool(true)),
    );
    registry
}

#[test]
/// The guard only scales when the storyteller carries the component
fn guarded_rewrite_end_to_end() {
    let context = ContextHandle::new();
    let mut rt = host(context.clone());
    let report = registry().apply_all(&mut rt);
    assert!(report.is_success(), "{:?}", report.failures);

    let handle = rt
        .resolve(&MethodIdentity::new("PawnGenerator", "RecruitDifficulty"))
        .unwrap();
    let body = rt.body(handle).unwrap();
    assert_eq!(body.len(), recruit_difficulty().len() + GuardedScale::FRAGMENT_LEN);
    assert_eq!(body[4], Instruction::call("Find.Storyteller"));

    // no context installed yet
    assert_eq!(rt.invoke(handle, &mut [Value::F32(10.0)]), Ok(Value::F32(20.0)));

    context.install(Value::object(Storyteller { has_comp: false }));
    assert_eq!(rt.invoke(handle, &mut [Value::F32(10.0)]), Ok(Value::F32(20.0)));

    context.install(Value::object(Storyteller { has_comp: true }));
    assert_eq!(rt.invoke(handle, &mut [Value::F32(10.0)]), Ok(Value::F32(4.0)));
    assert_eq!(rt.invoke(handle, &mut [Value::F32(3.0)]), Ok(Value::F32(1.2)));
}

#[test]
/// Post-call hooks can force a boolean method to true
fn post_call_override() {
    let mut rt = host(ContextHandle::new());
    assert!(registry().apply_all(&mut rt).is_success());

    let patched = rt
        .resolve(
            &MethodIdentity::new("IncidentWorker", "CanFireNow").with_parameters(["IncidentParms"]),
        )
        .unwrap();
    let untouched = rt
        .resolve(
            &MethodIdentity::new("IncidentWorker", "CanFireNow")
                .with_parameters(["IncidentParms", "bool"]),
        )
        .unwrap();
    assert_eq!(rt.invoke(patched, &mut [Value::Null]), Ok(Value::Bool(true)));
    assert_eq!(
        rt.invoke(untouched, &mut [Value::Null, Value::Bool(false)]),
        Ok(Value::Bool(false))
    );
}

#[test]
/// Failing registrations are reported without affecting the others
fn failures_are_isolated() {
    let mut rt = host(ContextHandle::new());
    let mut registry = registry();
    registry.post_call(MethodIdentity::new("IncidentWorker", "CanFireNow"), |_| {});
    registry.rewrite(
        MethodIdentity::new("PawnGenerator", "RecruitDifficulty"),
        GuardedScale::new(3, "Find.Storyteller", "TryGetComp", 5.0f32),
    );

    let report = registry.apply_all(&mut rt);
    assert_eq!(report.installed.len(), 2);
    assert_eq!(report.failures.len(), 2);
    assert!(matches!(
        report.failures[0].error,
        ApplyError::Resolution(ResolutionError::Ambiguous { .. })
    ));
    assert!(matches!(report.failures[1].error, ApplyError::Patch(_)));
    assert_eq!(report.failures[1].kind, "rewrite");

    let handle = rt
        .resolve(&MethodIdentity::new("PawnGenerator", "RecruitDifficulty"))
        .unwrap();
    assert_eq!(
        rt.body(handle).unwrap().len(),
        recruit_difficulty().len() + GuardedScale::FRAGMENT_LEN
    );
}

#[test]
/// Applying a registry twice changes nothing the second time
fn apply_once() {
    let context = ContextHandle::new();
    context.install(Value::object(Storyteller { has_comp: true }));
    let mut rt = host(context);
    let registry = registry();
    assert!(registry.apply_all(&mut rt).is_success());

    let second = registry.apply_all(&mut rt);
    assert!(second.installed.is_empty());
    assert!(second
        .failures
        .iter()
        .all(|f| matches!(f.error, ApplyError::AlreadyApplied(_))));

    let handle = rt
        .resolve(&MethodIdentity::new("PawnGenerator", "RecruitDifficulty"))
        .unwrap();
    assert_eq!(rt.invoke(handle, &mut [Value::F32(10.0)]), Ok(Value::F32(4.0)));
}

#[test]
/// A high priority pre-call hook that skips the body still lets post-call hooks run
fn prefix_skip_with_priority() {
    let mut rt = host(ContextHandle::new());
    let mut registry = Registry::new("incidents");
    let target =
        MethodIdentity::new("IncidentWorker", "CanFireNow").with_parameters(["IncidentParms", "bool"]);
    registry.post_call(target.clone(), |post| {
        if post.original_skipped() {
            let flipped = !post.result().is_truthy();
            post.set_result(Value::Bool(flipped));
        }
    });
    registry.register(
        PatchRegistration::new(
            target.clone(),
            PatchKind::PreCall(ilpatch::hook::pre_call(|pre| {
                pre.set_result(Value::Bool(true));
                pre.skip_original();
            })),
        )
        .with_priority(priority::HIGH),
    );
    let report = registry.apply_all(&mut rt);
    assert_eq!(report.installed.len(), 2);
    assert_eq!(report.installed[0].index, 1);

    let handle = rt.resolve(&target).unwrap();
    assert_eq!(
        rt.invoke(handle, &mut [Value::Null, Value::Bool(true)]),
        Ok(Value::Bool(false))
    );
}
