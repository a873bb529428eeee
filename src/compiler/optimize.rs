//! An AST pass run before lowering, in two tiers:
//!
//! - Level 1 folds literal-literal expressions and rewrites algebraic
//!   identities (`x+0`, `x*1`, `x*0`, double negation) using the same
//!   numeric/string semantics `value::arith` and `value::coerce` give
//!   the running interpreter, so a folded constant behaves exactly like
//!   the runtime would have computed it.
//! - Level 2 additionally threads a per-script static environment —
//!   variables whose value is known at the current program point —
//!   through straight-line code, so a condition that only resolves to
//!   a constant once an assignment upstream is substituted in can still
//!   be folded, and `If`/`IfElse`/`WaitUntil`/`RepeatUntil` can drop the
//!   branch or loop body that constant proves dead. The environment is
//!   invalidated at every point the script can yield to the scheduler —
//!   `Wait`, `WaitUntil`, `RepeatUntil`, `AskAndWait`, glides,
//!   `BroadcastAndWait`, loop bodies, and procedure calls — since
//!   another fiber may run and mutate shared state in between.

use std::collections::HashMap;

use super::ast::*;
use crate::value::{arith, coerce, Value};

pub fn optimize_program(program: &mut Program, level: u8) {
    for sprite in program.all_sprites_mut() {
        for script in &mut sprite.scripts {
            let mut env = Env::default();
            optimize_block(&mut script.body, &mut env, level);
        }
        for proc in &mut sprite.procedures {
            let mut env = Env::default();
            optimize_block(&mut proc.body, &mut env, level);
        }
    }
}

/// Variables statically known to hold a constant value at the current
/// program point. Only populated at level 2; an empty environment
/// degrades `fold`'s variable-substitution step to a no-op, which is
/// exactly level 1's behavior.
#[derive(Clone, Default)]
struct Env(HashMap<String, Value>);

impl Env {
    fn get(&self, v: &VarRef) -> Option<&Value> {
        self.0.get(&var_key(v))
    }

    fn set(&mut self, v: &VarRef, val: Value) {
        self.0.insert(var_key(v), val);
    }

    fn invalidate(&mut self, v: &VarRef) {
        self.0.remove(&var_key(v));
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

fn var_key(v: &VarRef) -> String {
    match v {
        VarRef::Local(name) => format!("L:{name}"),
        VarRef::OfSprite(sprite, name) => format!("S:{sprite}:{name}"),
        VarRef::Stage(name) => format!("G:{name}"),
    }
}

enum StmtOutcome {
    Keep,
    Remove,
    Replace(Vec<Stmt>),
}

fn optimize_block(block: &mut Block, env: &mut Env, level: u8) {
    let mut i = 0;
    while i < block.len() {
        match optimize_stmt(&mut block[i], env, level) {
            StmtOutcome::Keep => i += 1,
            StmtOutcome::Remove => {
                block.remove(i);
            }
            StmtOutcome::Replace(mut stmts) => {
                let n = stmts.len();
                block.splice(i..i + 1, stmts.drain(..));
                i += n;
            }
        }
    }
}

fn optimize_stmt(stmt: &mut Stmt, env: &mut Env, level: u8) -> StmtOutcome {
    use Stmt::*;
    match stmt {
        MoveSteps(e) | TurnRight(e) | TurnLeft(e) | Goto(e) | PointInDirection(e) | PointTowards(e)
        | ChangeX(e) | SetX(e) | ChangeY(e) | SetY(e) | Say(e) | Think(e) | SwitchCostumeTo(e)
        | SwitchBackdropTo(e) | ChangeSize(e) | SetSize(e) | PlaySound(e) | PlaySoundUntilDone(e)
        | ChangeVolume(e) | SetVolume(e) | CreateCloneOf(e) | PenSetSize(e) | PenChangeSize(e) => {
            fold(e, env);
            StmtOutcome::Keep
        }

        GotoXY(a, b) | Glide(a, b) | SayForSecs(a, b) | ThinkForSecs(a, b) => {
            fold(a, env);
            fold(b, env);
            StmtOutcome::Keep
        }
        GlideXY(secs, x, y) => {
            fold(secs, env);
            fold(x, env);
            fold(y, env);
            env.clear();
            StmtOutcome::Keep
        }

        ChangeGraphicEffect(_, e) | SetGraphicEffect(_, e) | ChangeSoundEffect(_, e) | SetSoundEffect(_, e)
        | PenSetParam(_, e) | PenChangeParam(_, e) => {
            fold(e, env);
            StmtOutcome::Keep
        }

        InsertAtList(_, idx, val) | ReplaceItemOfList(_, idx, val) => {
            fold(idx, env);
            fold(val, env);
            StmtOutcome::Keep
        }
        AddToList(_, e) | DeleteOfList(_, e) => {
            fold(e, env);
            StmtOutcome::Keep
        }

        CallProcedure(_, args) => {
            for a in args.iter_mut() {
                fold(a, env);
            }
            // An unknown procedure body can mutate anything this sprite
            // or the stage can see.
            env.clear();
            StmtOutcome::Keep
        }

        SetVariable(v, e) => {
            fold(e, env);
            if level >= 2 {
                match literal_value(e) {
                    Some(val) => env.set(v, val),
                    None => env.invalidate(v),
                }
            }
            StmtOutcome::Keep
        }
        ChangeVariable(v, e) => {
            fold(e, env);
            if level >= 2 {
                let next = match (env.get(v), literal_value(e)) {
                    (Some(cur), Some(delta)) => Some(arith::add(cur, &delta)),
                    _ => None,
                };
                match next {
                    Some(val) => env.set(v, val),
                    None => env.invalidate(v),
                }
            }
            StmtOutcome::Keep
        }

        Wait(e) => {
            fold(e, env);
            env.clear();
            StmtOutcome::Keep
        }
        AskAndWait(e) => {
            fold(e, env);
            env.clear();
            StmtOutcome::Keep
        }
        BroadcastAndWait(_) => {
            env.clear();
            StmtOutcome::Keep
        }

        Repeat(count, body) => {
            fold(count, env);
            let mut inner = Env::default();
            optimize_block(body, &mut inner, level);
            env.clear();
            StmtOutcome::Keep
        }
        Forever(body) => {
            let mut inner = Env::default();
            optimize_block(body, &mut inner, level);
            env.clear();
            StmtOutcome::Keep
        }

        If(cond, body) => {
            fold(cond, env);
            if level >= 2 {
                if let Some(val) = literal_value(cond) {
                    return if coerce::truthy(&val) {
                        optimize_block(body, env, level);
                        StmtOutcome::Replace(std::mem::take(body))
                    } else {
                        StmtOutcome::Remove
                    };
                }
            }
            let mut inner = env.clone();
            optimize_block(body, &mut inner, level);
            env.clear();
            StmtOutcome::Keep
        }
        IfElse(cond, then, els) => {
            fold(cond, env);
            if level >= 2 {
                if let Some(val) = literal_value(cond) {
                    return if coerce::truthy(&val) {
                        optimize_block(then, env, level);
                        StmtOutcome::Replace(std::mem::take(then))
                    } else {
                        optimize_block(els, env, level);
                        StmtOutcome::Replace(std::mem::take(els))
                    };
                }
            }
            let mut then_env = env.clone();
            optimize_block(then, &mut then_env, level);
            let mut else_env = env.clone();
            optimize_block(els, &mut else_env, level);
            env.clear();
            StmtOutcome::Keep
        }
        WaitUntil(cond) => {
            fold(cond, env);
            if level >= 2 && matches!(literal_value(cond), Some(val) if coerce::truthy(&val)) {
                return StmtOutcome::Remove;
            }
            env.clear();
            StmtOutcome::Keep
        }
        RepeatUntil(cond, body) => {
            fold(cond, env);
            if level >= 2 && matches!(literal_value(cond), Some(val) if coerce::truthy(&val)) {
                // Condition already holds, so the loop body never runs.
                return StmtOutcome::Remove;
            }
            let mut inner = Env::default();
            optimize_block(body, &mut inner, level);
            env.clear();
            StmtOutcome::Keep
        }

        _ => StmtOutcome::Keep,
    }
}

/// Recursively folds `expr`'s children, then tries to collapse `expr`
/// itself into a literal or a simpler equivalent form. Leaves anything
/// involving a non-literal variable, reporter, or side-effecting call
/// untouched beyond its children.
fn fold(expr: &mut Expr, env: &Env) {
    if let Expr::Variable(v) = expr {
        if let Some(val) = env.get(v) {
            *expr = from_value(val.clone());
            return;
        }
    }
    fold_children(expr, env);
    simplify(expr);
}

fn fold_children(expr: &mut Expr, env: &Env) {
    use Expr::*;
    match expr {
        Add(a, b) | Sub(a, b) | Mul(a, b) | Div(a, b) | Mod(a, b) | Rand(a, b) | Eq(a, b) | Neq(a, b)
        | Gt(a, b) | Lt(a, b) | Ge(a, b) | Le(a, b) | And(a, b) | Or(a, b) | StrCat(a, b) | CharAt(a, b)
        | StrContains(a, b) | ColorTouchingColor(a, b) => {
            fold(a, env);
            fold(b, env);
        }
        Neg(a) | Not(a) | Round(a) | Abs(a) | Floor(a) | Ceil(a) | Sqrt(a) | Sin(a) | Cos(a) | Tan(a)
        | Asin(a) | Acos(a) | Atan(a) | Ln(a) | Log10(a) | Exp(a) | Exp10(a) | StrLen(a) | Touching(a)
        | TouchingColor(a) | DistanceTo(a) | KeyPressed(a) => {
            fold(a, env);
        }
        ListItem(_, i) | ListIndexOf(_, i) | ListContainsItem(_, i) => fold(i, env),
        _ => {}
    }
}

/// Second pass over `expr`, run once its children are already folded:
/// collapses a fully-literal node into a literal, and rewrites the
/// algebraic identities that hold even when one side isn't a literal.
fn simplify(expr: &mut Expr) {
    use Expr::*;
    match expr {
        Add(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = from_value(arith::add(&x, &y));
            } else if matches!(literal_value(a), Some(ref v) if is_zero(v)) {
                *expr = (**b).clone();
            } else if matches!(literal_value(b), Some(ref v) if is_zero(v)) {
                *expr = (**a).clone();
            }
        }
        Sub(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = from_value(arith::sub(&x, &y));
            } else if matches!(literal_value(b), Some(ref v) if is_zero(v)) {
                *expr = (**a).clone();
            }
        }
        Mul(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = from_value(arith::mul(&x, &y));
            } else if matches!(literal_value(a), Some(ref v) if is_one(v)) {
                *expr = (**b).clone();
            } else if matches!(literal_value(b), Some(ref v) if is_one(v)) {
                *expr = (**a).clone();
            } else if matches!(literal_value(a), Some(ref v) if is_zero(v)) && !contains_rand(b) {
                *expr = IntLiteral(0);
            } else if matches!(literal_value(b), Some(ref v) if is_zero(v)) && !contains_rand(a) {
                *expr = IntLiteral(0);
            }
        }
        Div(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = from_value(arith::div(&x, &y));
            } else if matches!(literal_value(b), Some(ref v) if is_one(v)) {
                *expr = (**a).clone();
            }
        }
        Mod(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = from_value(arith::rem(&x, &y));
            }
        }
        Neg(a) => {
            if let Some(v) = literal_value(a) {
                *expr = from_value(arith::neg(&v));
            } else if let Neg(inner) = a.as_mut() {
                *expr = (**inner).clone();
            }
        }

        Eq(a, b) => fold_cmp(a, b, expr, coerce::scratch_eq),
        Neq(a, b) => fold_cmp(a, b, expr, |a, b| !coerce::scratch_eq(a, b)),
        Gt(a, b) => fold_cmp(a, b, expr, coerce::gt),
        Lt(a, b) => fold_cmp(a, b, expr, coerce::lt),
        Ge(a, b) => fold_cmp(a, b, expr, |a, b| !coerce::lt(a, b)),
        Le(a, b) => fold_cmp(a, b, expr, |a, b| !coerce::gt(a, b)),

        And(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = BoolLiteral(coerce::truthy(&x) && coerce::truthy(&y));
            }
        }
        Or(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = BoolLiteral(coerce::truthy(&x) || coerce::truthy(&y));
            }
        }
        Not(a) => {
            if let Some(v) = literal_value(a) {
                *expr = BoolLiteral(!coerce::truthy(&v));
            } else if let Not(inner) = a.as_mut() {
                *expr = (**inner).clone();
            }
        }

        StrCat(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = from_value(coerce::concat(&x, &y));
            }
        }
        StrLen(a) => {
            if let Some(v) = literal_value(a) {
                *expr = IntLiteral(coerce::length(&v));
            }
        }
        StrContains(a, b) => {
            if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
                *expr = BoolLiteral(coerce::contains(&x, &y));
            }
        }

        Round(a) => fold_unary(a, expr, arith::round),
        Abs(a) => fold_unary(a, expr, arith::abs),
        Floor(a) => fold_unary(a, expr, arith::floor),
        Ceil(a) => fold_unary(a, expr, arith::ceil),
        Sqrt(a) => fold_unary(a, expr, arith::sqrt),
        Sin(a) => fold_unary(a, expr, arith::sin_deg),
        Cos(a) => fold_unary(a, expr, arith::cos_deg),
        Tan(a) => fold_unary(a, expr, arith::tan_deg),
        Asin(a) => fold_unary(a, expr, arith::asin_deg),
        Acos(a) => fold_unary(a, expr, arith::acos_deg),
        Atan(a) => fold_unary(a, expr, arith::atan_deg),
        Ln(a) => fold_unary(a, expr, arith::ln),
        Log10(a) => fold_unary(a, expr, arith::log10),
        Exp(a) => fold_unary(a, expr, arith::exp),
        Exp10(a) => fold_unary(a, expr, arith::exp10),

        _ => {}
    }
}

fn fold_cmp(a: &Expr, b: &Expr, expr: &mut Expr, f: impl FnOnce(&Value, &Value) -> bool) {
    if let (Some(x), Some(y)) = (literal_value(a), literal_value(b)) {
        *expr = Expr::BoolLiteral(f(&x, &y));
    }
}

fn fold_unary(a: &Expr, expr: &mut Expr, f: impl FnOnce(&Value) -> Value) {
    if let Some(v) = literal_value(a) {
        *expr = from_value(f(&v));
    }
}

fn is_zero(v: &Value) -> bool {
    matches!(v, Value::Integer(0)) || matches!(v, Value::Real(r) if *r == 0.0)
}

fn is_one(v: &Value) -> bool {
    matches!(v, Value::Integer(1)) || matches!(v, Value::Real(r) if *r == 1.0)
}

/// Whether folding could skip evaluating `e` without changing observed
/// behavior. The only reporter here that isn't a pure read of existing
/// state is `Rand`, which consumes the VM's RNG stream on every call —
/// dropping it would shift every later `pick random` in the script.
fn contains_rand(e: &Expr) -> bool {
    use Expr::*;
    match e {
        Rand(_, _) => true,
        Add(a, b) | Sub(a, b) | Mul(a, b) | Div(a, b) | Mod(a, b) | Eq(a, b) | Neq(a, b) | Gt(a, b)
        | Lt(a, b) | Ge(a, b) | Le(a, b) | And(a, b) | Or(a, b) | StrCat(a, b) | CharAt(a, b)
        | StrContains(a, b) | ColorTouchingColor(a, b) => contains_rand(a) || contains_rand(b),
        Neg(a) | Not(a) | Round(a) | Abs(a) | Floor(a) | Ceil(a) | Sqrt(a) | Sin(a) | Cos(a) | Tan(a)
        | Asin(a) | Acos(a) | Atan(a) | Ln(a) | Log10(a) | Exp(a) | Exp10(a) | StrLen(a) | Touching(a)
        | TouchingColor(a) | DistanceTo(a) | KeyPressed(a) => contains_rand(a),
        ListItem(_, i) | ListIndexOf(_, i) | ListContainsItem(_, i) => contains_rand(i),
        _ => false,
    }
}

fn literal_value(e: &Expr) -> Option<Value> {
    match e {
        Expr::IntLiteral(v) => Some(Value::Integer(*v)),
        Expr::RealLiteral(v) => Some(Value::Real(*v)),
        Expr::StringLiteral(s) => Some(Value::from_string(s.clone())),
        Expr::BoolLiteral(v) => Some(Value::Bool(*v)),
        _ => None,
    }
}

fn from_value(v: Value) -> Expr {
    match v {
        Value::Integer(i) => Expr::IntLiteral(i),
        Value::Real(r) => Expr::RealLiteral(r),
        Value::Bool(b) => Expr::BoolLiteral(b),
        other => Expr::StringLiteral(coerce::coerce_to_string(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_with(body: Block) -> Program {
        let script = ScriptDef { trigger: Trigger::FlagClicked, body };
        let sprite = SpriteDef {
            name: "Sprite1".into(),
            is_stage: false,
            variables: vec![VarDef { name: "n".into() }],
            lists: Vec::new(),
            costumes: Vec::new(),
            sounds: Vec::new(),
            current_costume: 0,
            scripts: vec![script],
            procedures: Vec::new(),
        };
        Program {
            stage: SpriteDef {
                name: "Stage".into(),
                is_stage: true,
                variables: Vec::new(),
                lists: Vec::new(),
                costumes: Vec::new(),
                sounds: Vec::new(),
                current_costume: 0,
                scripts: Vec::new(),
                procedures: Vec::new(),
            },
            sprites: vec![sprite],
        }
    }

    fn first_script_body(program: &Program) -> &Block {
        &program.sprites[0].scripts[0].body
    }

    #[test]
    fn folds_literal_arithmetic() {
        let body = vec![Stmt::MoveSteps(Expr::Add(
            Box::new(Expr::IntLiteral(2)),
            Box::new(Expr::IntLiteral(3)),
        ))];
        let mut program = program_with(body);
        optimize_program(&mut program, 1);
        assert!(matches!(first_script_body(&program)[0], Stmt::MoveSteps(Expr::IntLiteral(5))));
    }

    #[test]
    fn algebraic_identity_drops_additive_zero() {
        let var = VarRef::Local("n".into());
        let body = vec![Stmt::SetX(Expr::Add(
            Box::new(Expr::Variable(var)),
            Box::new(Expr::IntLiteral(0)),
        ))];
        let mut program = program_with(body);
        optimize_program(&mut program, 1);
        match &first_script_body(&program)[0] {
            Stmt::SetX(Expr::Variable(VarRef::Local(name))) => assert_eq!(name.as_str(), "n"),
            _ => panic!("expected x+0 to fold down to the bare variable"),
        }
    }

    #[test]
    fn double_negation_cancels() {
        let body = vec![Stmt::MoveSteps(Expr::Neg(Box::new(Expr::Neg(Box::new(Expr::Variable(
            VarRef::Local("n".into()),
        ))))))];
        let mut program = program_with(body);
        optimize_program(&mut program, 1);
        match &first_script_body(&program)[0] {
            Stmt::MoveSteps(Expr::Variable(VarRef::Local(name))) => assert_eq!(name.as_str(), "n"),
            _ => panic!("expected Neg(Neg(x)) to cancel down to x"),
        }
    }

    #[test]
    fn level_one_leaves_branches_alone() {
        let var = VarRef::Local("n".into());
        let body = vec![
            Stmt::SetVariable(var.clone(), Expr::IntLiteral(1)),
            Stmt::If(Expr::Variable(var), vec![Stmt::NextCostume]),
        ];
        let mut program = program_with(body);
        optimize_program(&mut program, 1);
        assert!(matches!(first_script_body(&program)[1], Stmt::If(..)));
    }

    #[test]
    fn level_two_eliminates_dead_branch_via_static_environment() {
        let var = VarRef::Local("n".into());
        let body = vec![
            Stmt::SetVariable(var.clone(), Expr::IntLiteral(0)),
            Stmt::If(Expr::Variable(var), vec![Stmt::NextCostume]),
        ];
        let mut program = program_with(body);
        optimize_program(&mut program, 2);
        let folded = first_script_body(&program);
        assert_eq!(folded.len(), 1, "dead branch and its guarding condition should both disappear");
    }

    #[test]
    fn level_two_inlines_always_true_branch() {
        let var = VarRef::Local("n".into());
        let body = vec![
            Stmt::SetVariable(var.clone(), Expr::IntLiteral(1)),
            Stmt::If(Expr::Variable(var), vec![Stmt::NextCostume]),
        ];
        let mut program = program_with(body);
        optimize_program(&mut program, 2);
        let folded = first_script_body(&program);
        assert_eq!(folded.len(), 2);
        assert!(matches!(folded[1], Stmt::NextCostume));
    }

    #[test]
    fn environment_clears_across_wait() {
        let var = VarRef::Local("n".into());
        let body = vec![
            Stmt::SetVariable(var.clone(), Expr::IntLiteral(1)),
            Stmt::Wait(Expr::IntLiteral(1)),
            Stmt::If(Expr::Variable(var), vec![Stmt::NextCostume]),
        ];
        let mut program = program_with(body);
        optimize_program(&mut program, 2);
        assert!(
            matches!(first_script_body(&program)[2], Stmt::If(..)),
            "a variable's known value must not survive a yield point"
        );
    }

    #[test]
    fn zero_times_rand_keeps_evaluating_for_its_side_effect() {
        let body = vec![Stmt::MoveSteps(Expr::Mul(
            Box::new(Expr::IntLiteral(0)),
            Box::new(Expr::Rand(Box::new(Expr::IntLiteral(1)), Box::new(Expr::IntLiteral(10)))),
        ))];
        let mut program = program_with(body);
        optimize_program(&mut program, 1);
        match &first_script_body(&program)[0] {
            Stmt::MoveSteps(Expr::Mul(..)) => {}
            _ => panic!("0 * rand(..) must not drop the rand call"),
        }
    }
}
