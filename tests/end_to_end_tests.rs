//! End-to-end scenarios driven entirely through the public host API:
//! build an AST program, compile it, initialize a VM, and step it.

use scratch3_vm::compiler::ast::{Program, ScriptDef, SpriteDef, Stmt, Trigger, VarDef, VarRef};
use scratch3_vm::compiler::ast::Expr;
use scratch3_vm::config::{StatusCode, VmOptions};
use scratch3_vm::script::ScriptState;
use scratch3_vm::value::Value;
use scratch3_vm::VmContext;

fn var(name: &str) -> VarDef {
    VarDef { name: name.to_string() }
}

fn empty_sprite(name: &str, is_stage: bool) -> SpriteDef {
    SpriteDef {
        name: name.to_string(),
        is_stage,
        variables: Vec::new(),
        lists: Vec::new(),
        costumes: Vec::new(),
        sounds: Vec::new(),
        current_costume: 1,
        scripts: Vec::new(),
        procedures: Vec::new(),
    }
}

fn int_value(v: &Value) -> i64 {
    match v {
        Value::Integer(i) => *i,
        other => panic!("expected an integer, got a different value variant: {}", discriminant(other)),
    }
}

fn discriminant(v: &Value) -> &'static str {
    match v {
        Value::None => "None",
        Value::Integer(_) => "Integer",
        Value::Real(_) => "Real",
        Value::Bool(_) => "Bool",
        Value::Str(..) => "Str",
        Value::List(..) => "List",
        Value::IntPtr(_) => "IntPtr",
    }
}

/// Spins the VM forward until `done` reports true or `max_ticks` is
/// exhausted, returning how many ticks actually ran.
fn run_until(ctx: &mut VmContext, max_ticks: u32, mut done: impl FnMut(&scratch3_vm::Vm) -> bool) -> u32 {
    for tick in 1..=max_ticks {
        assert_eq!(ctx.vm_update(), StatusCode::Success);
        if done(ctx.vm().unwrap()) {
            return tick;
        }
    }
    max_ticks
}

fn all_terminated(vm: &scratch3_vm::Vm) -> bool {
    vm.scripts.ids().all(|id| matches!(vm.scripts.get(id).state, ScriptState::Terminated))
}

/// Scenario 1: `when flag clicked; set v to 0; repeat 10 { change v by 1 }`.
#[test]
fn flag_click_runs_repeat_loop_to_completion() {
    let mut stage = empty_sprite("Stage", true);
    stage.variables.push(var("v"));
    stage.scripts.push(ScriptDef {
        trigger: Trigger::FlagClicked,
        body: vec![
            Stmt::SetVariable(VarRef::Local("v".to_string()), Expr::IntLiteral(0)),
            Stmt::Repeat(
                Expr::IntLiteral(10),
                vec![Stmt::ChangeVariable(VarRef::Local("v".to_string()), Expr::IntLiteral(1))],
            ),
        ],
    });
    let program = Program { stage, sprites: Vec::new() };

    let mut ctx = VmContext::create();
    assert_eq!(ctx.compile(&program), StatusCode::Success);
    assert_eq!(ctx.vm_init(VmOptions::default()), StatusCode::Success);
    assert_eq!(ctx.vm_start(), StatusCode::Success);

    run_until(&mut ctx, 20, all_terminated);

    let vm = ctx.vm().unwrap();
    assert_eq!(int_value(&vm.globals[0]), 10);
    assert!(all_terminated(vm));
}

/// Scenario 2: `say "hello" for 2 secs` sets the bubble immediately and
/// parks the script until the wait elapses.
#[test]
fn say_for_secs_sets_bubble_then_eventually_completes() {
    let mut stage = empty_sprite("Stage", true);
    stage.scripts.push(ScriptDef {
        trigger: Trigger::FlagClicked,
        body: vec![Stmt::SayForSecs(Expr::StringLiteral("hello".to_string()), Expr::RealLiteral(2.0))],
    });
    let program = Program { stage, sprites: Vec::new() };

    let mut ctx = VmContext::create();
    assert_eq!(ctx.compile(&program), StatusCode::Success);
    assert_eq!(ctx.vm_init(VmOptions::default()), StatusCode::Success);
    assert_eq!(ctx.vm_start(), StatusCode::Success);

    assert_eq!(ctx.vm_update(), StatusCode::Success);
    {
        let vm = ctx.vm().unwrap();
        let stage_idx = 0u32;
        let s = vm.sprites[stage_idx as usize].instance(scratch3_vm::sprite::BASE_INSTANCE_ID).unwrap();
        match &s.message {
            Value::Str(bytes, _) => assert_eq!(bytes.as_str(), "hello"),
            other => panic!("expected a string bubble, got {}", discriminant(other)),
        }
        let id = vm.scripts.ids().next().expect("script was registered");
        assert!(matches!(vm.scripts.get(id).state, ScriptState::Waiting));
    }

    run_until(&mut ctx, 90, all_terminated);
    assert!(all_terminated(ctx.vm().unwrap()));
}

/// Scenario 3: three sprites listen for "go"; a flag-triggered
/// broadcaster sends it, and all three run within the tick the
/// broadcast happens on.
#[test]
fn broadcast_restarts_every_listener_within_the_same_tick() {
    let mut stage = empty_sprite("Stage", true);
    stage.scripts.push(ScriptDef {
        trigger: Trigger::FlagClicked,
        body: vec![Stmt::Broadcast("go".to_string())],
    });

    let mut sprites = Vec::new();
    for name in ["Listener1", "Listener2", "Listener3"] {
        let mut sprite = empty_sprite(name, false);
        sprite.variables.push(var("got"));
        sprite.scripts.push(ScriptDef {
            trigger: Trigger::MessageReceived("go".to_string()),
            body: vec![Stmt::SetVariable(VarRef::Local("got".to_string()), Expr::IntLiteral(1))],
        });
        sprites.push(sprite);
    }

    let program = Program { stage, sprites };

    let mut ctx = VmContext::create();
    assert_eq!(ctx.compile(&program), StatusCode::Success);
    assert_eq!(ctx.vm_init(VmOptions::default()), StatusCode::Success);
    assert_eq!(ctx.vm_start(), StatusCode::Success);
    assert_eq!(ctx.vm_update(), StatusCode::Success);

    let vm = ctx.vm().unwrap();
    for sprite_idx in 1..=3u32 {
        let s = vm.sprites[sprite_idx as usize].instance(scratch3_vm::sprite::BASE_INSTANCE_ID).unwrap();
        assert_eq!(int_value(&s.fields[0]), 1, "listener {sprite_idx} did not run this tick");
    }
}

/// Scenario 4: a template spawns 5 clones, each of which deletes
/// itself on start; the final instance count settles at the template
/// alone.
#[test]
fn clone_spawn_and_self_delete_settles_back_to_the_template() {
    let mut sprite = empty_sprite("Clonable", false);
    sprite.scripts.push(ScriptDef {
        trigger: Trigger::FlagClicked,
        body: vec![Stmt::Repeat(
            Expr::IntLiteral(5),
            vec![Stmt::CreateCloneOf(Expr::StringLiteral("_myself_".to_string()))],
        )],
    });
    sprite.scripts.push(ScriptDef { trigger: Trigger::CloneStart, body: vec![Stmt::DeleteThisClone] });

    let program = Program { stage: empty_sprite("Stage", true), sprites: vec![sprite] };

    let mut ctx = VmContext::create();
    assert_eq!(ctx.compile(&program), StatusCode::Success);
    assert_eq!(ctx.vm_init(VmOptions::default()), StatusCode::Success);
    assert_eq!(ctx.vm_start(), StatusCode::Success);

    run_until(&mut ctx, 40, |vm| vm.sprites[1].clone_instance_ids().is_empty());

    let vm = ctx.vm().unwrap();
    assert!(vm.sprites[1].clone_instance_ids().is_empty());
    assert!(vm.sprites[1].instance(scratch3_vm::sprite::BASE_INSTANCE_ID).is_some());
}

/// Scenario 5: `glide 1 secs to x:100 y:0` from the origin converges on
/// the target position.
#[test]
fn glide_converges_on_target_position() {
    let mut sprite = empty_sprite("Glider", false);
    sprite.scripts.push(ScriptDef {
        trigger: Trigger::FlagClicked,
        body: vec![Stmt::GlideXY(Expr::RealLiteral(1.0), Expr::RealLiteral(100.0), Expr::RealLiteral(0.0))],
    });
    let program = Program { stage: empty_sprite("Stage", true), sprites: vec![sprite] };

    let mut ctx = VmContext::create();
    assert_eq!(ctx.compile(&program), StatusCode::Success);
    assert_eq!(ctx.vm_init(VmOptions::default()), StatusCode::Success);
    assert_eq!(ctx.vm_start(), StatusCode::Success);

    run_until(&mut ctx, 60, all_terminated);

    let vm = ctx.vm().unwrap();
    let s = vm.sprites[1].instance(scratch3_vm::sprite::BASE_INSTANCE_ID).unwrap();
    assert!((s.x - 100.0).abs() <= 0.5, "expected x near 100, got {}", s.x);
    assert!((s.y - 0.0).abs() <= 0.5, "expected y near 0, got {}", s.y);
}

/// Scenario 6: Scratch's cross-type equality corner cases, evaluated
/// through the compiled `=` opcode rather than calling the coercion
/// helper directly.
#[test]
fn scratch_equality_corner_cases_through_compiled_eq() {
    let mut stage = empty_sprite("Stage", true);
    for name in ["r1", "r2", "r3"] {
        stage.variables.push(var(name));
    }
    stage.scripts.push(ScriptDef {
        trigger: Trigger::FlagClicked,
        body: vec![
            Stmt::SetVariable(
                VarRef::Local("r1".to_string()),
                Expr::Eq(
                    Box::new(Expr::StringLiteral("42".to_string())),
                    Box::new(Expr::IntLiteral(42)),
                ),
            ),
            Stmt::SetVariable(
                VarRef::Local("r2".to_string()),
                Expr::Eq(
                    Box::new(Expr::StringLiteral("true".to_string())),
                    Box::new(Expr::BoolLiteral(true)),
                ),
            ),
            Stmt::SetVariable(
                VarRef::Local("r3".to_string()),
                Expr::Eq(
                    Box::new(Expr::StringLiteral(" foo ".to_string())),
                    Box::new(Expr::StringLiteral("FOO".to_string())),
                ),
            ),
        ],
    });
    let program = Program { stage, sprites: Vec::new() };

    let mut ctx = VmContext::create();
    assert_eq!(ctx.compile(&program), StatusCode::Success);
    assert_eq!(ctx.vm_init(VmOptions::default()), StatusCode::Success);
    assert_eq!(ctx.vm_start(), StatusCode::Success);

    run_until(&mut ctx, 5, all_terminated);

    let vm = ctx.vm().unwrap();
    for idx in 0..3 {
        match &vm.globals[idx] {
            Value::Bool(b) => assert!(*b, "comparison {idx} was false"),
            other => panic!("expected a bool result, got {}", discriminant(other)),
        }
    }
}
