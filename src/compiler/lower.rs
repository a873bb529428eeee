//! AST-to-bytecode lowering: one text-segment visit per script/
//! procedure body, emitting jumps with the same placeholder/
//! relocation mechanism the sprite table already uses for its
//! pointers. Control-flow constructs never need a second pass — a
//! backward branch's target is already known when it's referenced, and
//! a forward branch's placeholder is patched the moment its target is
//! reached.

use hashbrown::HashMap;

use super::ast::*;
use super::symbols::SymbolTable;
use crate::bytecode::builder::Builder;
use crate::bytecode::reloc::{SegOffset, Segment};
use crate::error::CompileError;
use crate::opcode::OpCode;

/// One sprite's lowering pass: the shared builder/symbol table plus
/// whatever is specific to the body currently being visited (which
/// sprite it belongs to, a procedure's parameter slots, and whether
/// this body is a warp (turbo) procedure, which compiles out every
/// `yield` rather than tracking it at run time).
struct Lowerer<'a> {
    b: &'a mut Builder,
    symbols: &'a SymbolTable,
    sprite: &'a str,
    params: HashMap<String, i32>,
    suppress_yield: bool,
}

impl<'a> Lowerer<'a> {
    fn op(&mut self, op: OpCode) {
        self.b.text.write_u8(op as u8);
    }

    fn resolve_var(&self, r: &VarRef) -> Result<u32, CompileError> {
        let (owner, name) = match r {
            VarRef::Local(name) => (self.sprite, name.as_str()),
            VarRef::Stage(name) => {
                return self
                    .symbols
                    .stage_vars
                    .get(name)
                    .copied()
                    .ok_or_else(|| CompileError::UndefinedStaticVariable { name: name.clone() });
            }
            VarRef::OfSprite(sprite, name) => (sprite.as_str(), name.as_str()),
        };
        self.symbols
            .resolve(owner, name)
            .ok_or_else(|| CompileError::UndefinedStaticVariable { name: name.to_string() })
    }

    /// A forward jump whose target isn't known yet: emits the opcode
    /// and an unresolved `.text` pointer, returning the placeholder to
    /// patch once the target is reached.
    fn jump_forward(&mut self, op: OpCode) -> SegOffset {
        self.op(op);
        self.b.write_ptr_unresolved(Segment::Text)
    }

    fn patch_here(&mut self, placeholder: SegOffset) {
        let here = self.b.text.position();
        self.b.resolve_ptr(placeholder, SegOffset::new(Segment::Text, here));
    }

    /// A backward jump to an already-emitted label.
    fn jump_back(&mut self, op: OpCode, target: u64) {
        self.op(op);
        self.b.write_ptr(Segment::Text, SegOffset::new(Segment::Text, target));
    }

    fn label(&self) -> u64 {
        self.b.text.position()
    }

    fn string_operand(&mut self, s: &str) {
        self.b.ref_plain_string(Segment::Text, s.as_bytes());
    }

    fn lower_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in block {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        use Stmt::*;
        match stmt {
            MoveSteps(e) => self.emit_unary(e, OpCode::MoveSteps)?,
            TurnRight(e) => self.emit_unary(e, OpCode::TurnDegrees)?,
            TurnLeft(e) => {
                self.lower_expr(e)?;
                self.op(OpCode::Neg);
                self.op(OpCode::TurnDegrees);
            }
            Goto(e) => self.emit_unary(e, OpCode::Goto)?,
            GotoXY(x, y) => {
                self.lower_expr(x)?;
                self.lower_expr(y)?;
                self.op(OpCode::GotoXY);
            }
            Glide(secs, target) => {
                self.lower_expr(secs)?;
                self.lower_expr(target)?;
                self.op(OpCode::Glide);
            }
            GlideXY(secs, x, y) => {
                self.lower_expr(secs)?;
                self.lower_expr(x)?;
                self.lower_expr(y)?;
                self.op(OpCode::GlideXY);
            }
            PointInDirection(e) => self.emit_unary(e, OpCode::SetDir)?,
            PointTowards(e) => self.emit_unary(e, OpCode::LookAt)?,
            ChangeX(e) => self.emit_unary(e, OpCode::AddX)?,
            SetX(e) => self.emit_unary(e, OpCode::SetX)?,
            ChangeY(e) => self.emit_unary(e, OpCode::AddY)?,
            SetY(e) => self.emit_unary(e, OpCode::SetY)?,
            BounceOffEdge => self.op(OpCode::BounceOnEdge),
            SetRotationStyle(style) => {
                self.op(OpCode::SetRotationStyle);
                self.b.text.write_u8(style.as_u8());
            }

            Say(e) => self.emit_unary(e, OpCode::Say)?,
            SayForSecs(msg, secs) => {
                self.lower_expr(msg)?;
                self.op(OpCode::Say);
                self.lower_expr(secs)?;
                self.op(OpCode::WaitSecs);
            }
            Think(e) => self.emit_unary(e, OpCode::Think)?,
            ThinkForSecs(msg, secs) => {
                self.lower_expr(msg)?;
                self.op(OpCode::Think);
                self.lower_expr(secs)?;
                self.op(OpCode::WaitSecs);
            }
            SwitchCostumeTo(e) => self.emit_unary(e, OpCode::SetCostume)?,
            NextCostume => self.op(OpCode::NextCostume),
            SwitchBackdropTo(e) => self.emit_unary(e, OpCode::SetBackdrop)?,
            NextBackdrop => self.op(OpCode::NextBackdrop),
            ChangeSize(e) => self.emit_unary(e, OpCode::AddSize)?,
            SetSize(e) => self.emit_unary(e, OpCode::SetSize)?,
            ChangeGraphicEffect(fx, e) => {
                self.lower_expr(e)?;
                self.op(OpCode::AddGraphicEffect);
                self.b.text.write_u8(fx.as_u8());
            }
            SetGraphicEffect(fx, e) => {
                self.lower_expr(e)?;
                self.op(OpCode::SetGraphicEffect);
                self.b.text.write_u8(fx.as_u8());
            }
            ClearGraphicEffects => self.op(OpCode::ClearGraphicEffects),
            Show => self.op(OpCode::Show),
            Hide => self.op(OpCode::Hide),
            GotoLayer(layer) => {
                self.op(OpCode::GotoLayer);
                self.b.text.write_u8(layer.as_u8());
            }
            ChangeLayer(delta) => {
                self.op(OpCode::MoveLayer);
                self.b.text.write_i64(*delta);
            }

            PlaySound(e) => self.emit_unary(e, OpCode::PlaySound)?,
            PlaySoundUntilDone(e) => self.emit_unary(e, OpCode::PlaySoundAndWait)?,
            StopAllSounds => self.op(OpCode::StopSound),
            ChangeSoundEffect(p, e) => {
                self.lower_expr(e)?;
                self.op(OpCode::AddSoundEffect);
                self.b.text.write_u8(p.as_u8());
            }
            SetSoundEffect(p, e) => {
                self.lower_expr(e)?;
                self.op(OpCode::SetSoundEffect);
                self.b.text.write_u8(p.as_u8());
            }
            ClearSoundEffects => self.op(OpCode::ClearSoundEffects),
            ChangeVolume(e) => self.emit_unary(e, OpCode::AddVolume)?,
            SetVolume(e) => self.emit_unary(e, OpCode::SetVolume)?,

            Broadcast(name) => {
                self.op(OpCode::Send);
                self.string_operand(name);
            }
            BroadcastAndWait(name) => {
                self.op(OpCode::SendAndWait);
                self.string_operand(name);
            }

            Wait(e) => self.emit_unary(e, OpCode::WaitSecs)?,
            Repeat(count, body) => self.lower_repeat(count, body)?,
            Forever(body) => self.lower_forever(body)?,
            If(cond, then) => self.lower_if(cond, then)?,
            IfElse(cond, then, els) => self.lower_if_else(cond, then, els)?,
            WaitUntil(cond) => self.lower_wait_until(cond)?,
            RepeatUntil(cond, body) => self.lower_repeat_until(cond, body)?,
            StopAll => self.op(OpCode::StopAll),
            StopThisScript => self.op(OpCode::StopSelf),
            StopOtherScriptsInSprite => self.op(OpCode::StopOther),
            CreateCloneOf(e) => self.emit_unary(e, OpCode::Clone)?,
            DeleteThisClone => self.op(OpCode::DeleteClone),

            AskAndWait(e) => self.emit_unary(e, OpCode::Ask)?,
            SetDragMode(draggable) => {
                self.op(if *draggable { OpCode::PushTrue } else { OpCode::PushFalse });
                self.op(OpCode::SetDragMode);
            }
            ResetTimer => self.op(OpCode::ResetTimer),

            SetVariable(r, e) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(e)?;
                self.op(OpCode::SetStatic);
                self.b.text.write_u24(id);
            }
            ChangeVariable(r, e) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(e)?;
                self.op(OpCode::AddStatic);
                self.b.text.write_u24(id);
            }
            ShowVariable(r) => {
                let id = self.resolve_var(r)?;
                self.op(OpCode::VarShow);
                self.b.text.write_u24(id);
            }
            HideVariable(r) => {
                let id = self.resolve_var(r)?;
                self.op(OpCode::VarHide);
                self.b.text.write_u24(id);
            }

            AddToList(r, e) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(e)?;
                self.op(OpCode::ListAdd);
                self.b.text.write_u24(id);
            }
            DeleteOfList(r, e) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(e)?;
                self.op(OpCode::ListRemove);
                self.b.text.write_u24(id);
            }
            DeleteAllOfList(r) => {
                let id = self.resolve_var(r)?;
                self.op(OpCode::ListClear);
                self.b.text.write_u24(id);
            }
            InsertAtList(r, index, value) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(index)?;
                self.lower_expr(value)?;
                self.op(OpCode::ListInsert);
                self.b.text.write_u24(id);
            }
            ReplaceItemOfList(r, index, value) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(index)?;
                self.lower_expr(value)?;
                self.op(OpCode::ListReplace);
                self.b.text.write_u24(id);
            }

            CallProcedure(name, args) => {
                for a in args {
                    self.lower_expr(a)?;
                }
                self.op(OpCode::Call);
                self.b.ref_procedure(Segment::Text, &format!("{}::{}", self.sprite, name));
                self.b.text.write_u16(args.len() as u16);
            }

            PenClear => {
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::Erase as u8);
            }
            PenStamp => {
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::Stamp as u8);
            }
            PenDown => {
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::PenDown as u8);
            }
            PenUp => {
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::PenUp as u8);
            }
            // `ext` always decodes as exactly two operand bytes (namespace
            // id + sub-op), and the interpreter's extension dispatch is
            // currently a no-op — so the parameter value itself has
            // nowhere to go yet. Evaluate it for its side effects only
            // (matching reporters can still be called inside it) and
            // discard rather than leave it on the stack for nothing to
            // pop.
            PenSetParam(_, e) => {
                self.lower_expr(e)?;
                self.op(OpCode::Pop);
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::SetParam as u8);
            }
            PenChangeParam(_, e) => {
                self.lower_expr(e)?;
                self.op(OpCode::Pop);
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::AddParam as u8);
            }
            PenSetSize(e) => {
                self.lower_expr(e)?;
                self.op(OpCode::Pop);
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::SetSize as u8);
            }
            PenChangeSize(e) => {
                self.lower_expr(e)?;
                self.op(OpCode::Pop);
                self.op(OpCode::Ext);
                self.b.text.write_u8(crate::opcode::ExtId::Pen as u8);
                self.b.text.write_u8(crate::opcode::PenOp::AddSize as u8);
            }
        }
        Ok(())
    }

    fn emit_unary(&mut self, e: &Expr, op: OpCode) -> Result<(), CompileError> {
        self.lower_expr(e)?;
        self.op(op);
        Ok(())
    }

    fn maybe_yield(&mut self) {
        if !self.suppress_yield {
            self.op(OpCode::Yield);
        }
    }

    fn lower_repeat(&mut self, count: &Expr, body: &Block) -> Result<(), CompileError> {
        self.lower_expr(count)?;
        self.op(OpCode::Round);
        let loop_label = self.label();
        self.op(OpCode::Dup);
        self.push_int(0);
        self.op(OpCode::Gt);
        let end = self.jump_forward(OpCode::Jz);
        self.lower_block(body)?;
        self.maybe_yield();
        self.push_int(1);
        self.op(OpCode::Sub);
        self.jump_back(OpCode::Jmp, loop_label);
        self.patch_here(end);
        self.op(OpCode::Pop);
        Ok(())
    }

    fn lower_forever(&mut self, body: &Block) -> Result<(), CompileError> {
        let loop_label = self.label();
        self.lower_block(body)?;
        self.maybe_yield();
        self.jump_back(OpCode::Jmp, loop_label);
        Ok(())
    }

    fn lower_if(&mut self, cond: &Expr, then: &Block) -> Result<(), CompileError> {
        self.lower_expr(cond)?;
        let end = self.jump_forward(OpCode::Jz);
        self.lower_block(then)?;
        self.patch_here(end);
        Ok(())
    }

    fn lower_if_else(&mut self, cond: &Expr, then: &Block, els: &Block) -> Result<(), CompileError> {
        self.lower_expr(cond)?;
        let else_start = self.jump_forward(OpCode::Jz);
        self.lower_block(then)?;
        let end = self.jump_forward(OpCode::Jmp);
        self.patch_here(else_start);
        self.lower_block(els)?;
        self.patch_here(end);
        Ok(())
    }

    fn lower_wait_until(&mut self, cond: &Expr) -> Result<(), CompileError> {
        let loop_label = self.label();
        self.lower_expr(cond)?;
        let end = self.jump_forward(OpCode::Jnz);
        self.maybe_yield();
        self.jump_back(OpCode::Jmp, loop_label);
        self.patch_here(end);
        Ok(())
    }

    fn lower_repeat_until(&mut self, cond: &Expr, body: &Block) -> Result<(), CompileError> {
        let loop_label = self.label();
        self.lower_expr(cond)?;
        let end = self.jump_forward(OpCode::Jnz);
        self.lower_block(body)?;
        self.maybe_yield();
        self.jump_back(OpCode::Jmp, loop_label);
        self.patch_here(end);
        Ok(())
    }

    fn push_int(&mut self, v: i64) {
        self.op(OpCode::PushInt);
        self.b.text.write_i64(v);
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        use Expr::*;
        match expr {
            IntLiteral(v) => self.push_int(*v),
            RealLiteral(v) => {
                self.op(OpCode::PushReal);
                self.b.text.write_f64(*v);
            }
            StringLiteral(s) => {
                self.op(OpCode::PushString);
                self.string_operand(s);
            }
            BoolLiteral(v) => self.op(if *v { OpCode::PushTrue } else { OpCode::PushFalse }),

            Variable(r) => {
                let id = self.resolve_var(r)?;
                self.op(OpCode::GetStatic);
                self.b.text.write_u24(id);
            }
            ListContents(r) => {
                // No dedicated "list to string" opcode; reporter slots
                // that want the literal contents string read the list
                // through `getstatic` and let string coercion render it.
                let id = self.resolve_var(r)?;
                self.op(OpCode::GetStatic);
                self.b.text.write_u24(id);
            }

            Add(a, b) => self.binary(a, b, OpCode::Add)?,
            Sub(a, b) => self.binary(a, b, OpCode::Sub)?,
            Mul(a, b) => self.binary(a, b, OpCode::Mul)?,
            Div(a, b) => self.binary(a, b, OpCode::Div)?,
            Mod(a, b) => self.binary(a, b, OpCode::Mod)?,
            Neg(a) => self.emit_unary_expr(a, OpCode::Neg)?,
            Rand(a, b) => self.binary(a, b, OpCode::Rand)?,

            Eq(a, b) => self.binary(a, b, OpCode::Eq)?,
            Neq(a, b) => self.binary(a, b, OpCode::Neq)?,
            Gt(a, b) => self.binary(a, b, OpCode::Gt)?,
            Lt(a, b) => self.binary(a, b, OpCode::Lt)?,
            Ge(a, b) => self.binary(a, b, OpCode::Ge)?,
            Le(a, b) => self.binary(a, b, OpCode::Le)?,
            And(a, b) => self.binary(a, b, OpCode::Land)?,
            Or(a, b) => self.binary(a, b, OpCode::Lor)?,
            Not(a) => self.emit_unary_expr(a, OpCode::Lnot)?,

            Round(a) => self.emit_unary_expr(a, OpCode::Round)?,
            Abs(a) => self.emit_unary_expr(a, OpCode::Abs)?,
            Floor(a) => self.emit_unary_expr(a, OpCode::Floor)?,
            Ceil(a) => self.emit_unary_expr(a, OpCode::Ceil)?,
            Sqrt(a) => self.emit_unary_expr(a, OpCode::Sqrt)?,
            Sin(a) => self.emit_unary_expr(a, OpCode::Sin)?,
            Cos(a) => self.emit_unary_expr(a, OpCode::Cos)?,
            Tan(a) => self.emit_unary_expr(a, OpCode::Tan)?,
            Asin(a) => self.emit_unary_expr(a, OpCode::Asin)?,
            Acos(a) => self.emit_unary_expr(a, OpCode::Acos)?,
            Atan(a) => self.emit_unary_expr(a, OpCode::Atan)?,
            Ln(a) => self.emit_unary_expr(a, OpCode::Ln)?,
            Log10(a) => self.emit_unary_expr(a, OpCode::Log10)?,
            Exp(a) => self.emit_unary_expr(a, OpCode::Exp)?,
            Exp10(a) => self.emit_unary_expr(a, OpCode::Exp10)?,

            StrCat(a, b) => self.binary(a, b, OpCode::StrCat)?,
            CharAt(s, idx) => {
                self.lower_expr(s)?;
                self.lower_expr(idx)?;
                self.op(OpCode::CharAt);
            }
            StrLen(a) => self.emit_unary_expr(a, OpCode::StrLen)?,
            StrContains(hay, needle) => {
                self.lower_expr(hay)?;
                self.lower_expr(needle)?;
                self.op(OpCode::StrStr);
            }

            GetX => self.op(OpCode::GetX),
            GetY => self.op(OpCode::GetY),
            GetDir => self.op(OpCode::GetDir),
            GetCostume => self.op(OpCode::GetCostume),
            GetCostumeName => self.op(OpCode::GetCostumeName),
            GetBackdrop => self.op(OpCode::GetBackdrop),
            GetSize => self.op(OpCode::GetSize),
            GetVolume => self.op(OpCode::GetVolume),

            Touching(t) => self.emit_unary_expr(t, OpCode::Touching)?,
            TouchingColor(c) => self.emit_unary_expr(c, OpCode::TouchingColor)?,
            ColorTouchingColor(a, b) => self.binary(a, b, OpCode::ColorTouching)?,
            DistanceTo(t) => self.emit_unary_expr(t, OpCode::DistanceTo)?,
            Answer => self.op(OpCode::GetAnswer),
            KeyPressed(k) => self.emit_unary_expr(k, OpCode::KeyPressed)?,
            MouseDown => self.op(OpCode::MouseDown),
            MouseX => self.op(OpCode::MouseX),
            MouseY => self.op(OpCode::MouseY),
            Loudness => self.op(OpCode::GetLoudness),
            Timer => self.op(OpCode::GetTimer),
            PropertyOf(target, selector) => {
                self.op(OpCode::PropertyOf);
                self.b.text.write_u8(*selector);
                self.string_operand(target);
            }
            CurrentTimeField(_field) => {
                // The interpreter's `gettime` only ever reports whole
                // seconds since the epoch, not individual date parts —
                // every field selector collapses to the same opcode.
                self.op(OpCode::GetTime);
            }
            DaysSince2000 => self.op(OpCode::GetDaysSince2000),
            Username => self.op(OpCode::GetUsername),

            ListItem(r, idx) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(idx)?;
                self.op(OpCode::ListAt);
                self.b.text.write_u24(id);
            }
            ListIndexOf(r, needle) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(needle)?;
                self.op(OpCode::ListFind);
                self.b.text.write_u24(id);
            }
            ListLength(r) => {
                let id = self.resolve_var(r)?;
                self.op(OpCode::ListLen);
                self.b.text.write_u24(id);
            }
            ListContainsItem(r, needle) => {
                let id = self.resolve_var(r)?;
                self.lower_expr(needle)?;
                self.op(OpCode::ListContains);
                self.b.text.write_u24(id);
            }

            FindEvent(name) => {
                self.op(OpCode::FindEvent);
                self.string_operand(name);
            }

            Param(name) => {
                let idx = *self
                    .params
                    .get(name)
                    .ok_or_else(|| CompileError::UndefinedStaticVariable { name: name.clone() })?;
                self.op(OpCode::Push);
                self.b.text.write_u32(idx as u32);
            }
        }
        Ok(())
    }

    fn binary(&mut self, a: &Expr, b: &Expr, op: OpCode) -> Result<(), CompileError> {
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.op(op);
        Ok(())
    }

    fn emit_unary_expr(&mut self, a: &Expr, op: OpCode) -> Result<(), CompileError> {
        self.lower_expr(a)?;
        self.op(op);
        Ok(())
    }
}

/// Per-sprite static data collected while lowering, so the sprite
/// table header (written last) can reference already-known offsets
/// instead of unresolved forward pointers.
struct CostumeSoundLayout {
    offset: u64,
    count: usize,
}

fn emit_costumes(b: &mut Builder, costumes: &[CostumeDef]) -> CostumeSoundLayout {
    let mut data_offsets = Vec::with_capacity(costumes.len());
    for c in costumes {
        data_offsets.push(b.rdata.write_bytes(&c.data));
    }
    let offset = b.rdata.position();
    for (c, data_off) in costumes.iter().zip(data_offsets) {
        b.ref_plain_string(Segment::Rdata, c.name.as_bytes());
        b.ref_plain_string(Segment::Rdata, c.format.as_bytes());
        b.rdata.write_u32(c.bitmap_resolution);
        b.rdata.write_u32(0);
        b.rdata.write_f64(c.rotation_center_x);
        b.rdata.write_f64(c.rotation_center_y);
        b.rdata.write_u64(c.data.len() as u64);
        b.write_ptr(Segment::Rdata, SegOffset::new(Segment::Rdata, data_off));
    }
    CostumeSoundLayout { offset, count: costumes.len() }
}

fn emit_sounds(b: &mut Builder, sounds: &[SoundDef]) -> CostumeSoundLayout {
    let mut data_offsets = Vec::with_capacity(sounds.len());
    for s in sounds {
        data_offsets.push(b.rdata.write_bytes(&s.data));
    }
    let offset = b.rdata.position();
    for (s, data_off) in sounds.iter().zip(data_offsets) {
        b.ref_plain_string(Segment::Rdata, s.name.as_bytes());
        b.ref_plain_string(Segment::Rdata, s.format.as_bytes());
        b.rdata.write_f64(s.rate);
        b.rdata.write_u64(s.sample_count);
        b.rdata.write_u64(s.data.len() as u64);
        b.write_ptr(Segment::Rdata, SegOffset::new(Segment::Rdata, data_off));
    }
    CostumeSoundLayout { offset, count: sounds.len() }
}

fn lower_procedure(
    b: &mut Builder,
    symbols: &SymbolTable,
    sprite: &str,
    proc: &ProcedureDef,
) -> Result<(), CompileError> {
    let entry = b.text.position();
    b.define_procedure(&format!("{sprite}::{}", proc.name), entry)?;
    let params = proc.params.iter().enumerate().map(|(i, n)| (n.clone(), i as i32)).collect();
    let mut low = Lowerer { b, symbols, sprite, params, suppress_yield: proc.warp };
    low.lower_block(&proc.body)?;
    low.op(OpCode::Ret);
    Ok(())
}

/// Lowers one script body, returning its entry offset (segment-relative
/// within `.text`) for the sprite table's scripts array.
fn lower_script(b: &mut Builder, symbols: &SymbolTable, sprite: &str, script: &ScriptDef) -> Result<u64, CompileError> {
    let entry = b.text.position();
    let mut low = Lowerer { b, symbols, sprite, params: HashMap::new(), suppress_yield: false };

    match &script.trigger {
        Trigger::FlagClicked => low.op(OpCode::OnFlag),
        Trigger::KeyPressed(code) => {
            low.op(OpCode::OnKey);
            low.b.text.write_i64(code.map(|c| c as i64).unwrap_or(-1));
        }
        Trigger::SpriteClicked => low.op(OpCode::OnClick),
        Trigger::BackdropSwitchedTo(name) => {
            low.op(OpCode::OnBackdropSwitch);
            low.string_operand(name);
        }
        Trigger::MessageReceived(name) => {
            low.op(OpCode::OnEvent);
            low.string_operand(name);
        }
        Trigger::GreaterThan(..) => low.op(OpCode::OnGt),
        Trigger::CloneStart => low.op(OpCode::OnClone),
    }

    match &script.trigger {
        Trigger::GreaterThan(subject, threshold) => {
            // Edge-triggered hat: the fiber itself never terminates —
            // it alternates waiting for the rising edge and waiting for
            // the condition to clear again, so it only ever re-enters
            // the user's body once per crossing.
            let wait_true = low.label();
            lower_gt_condition(&mut low, subject, threshold)?;
            let to_body = low.jump_forward(OpCode::Jnz);
            low.maybe_yield();
            low.jump_back(OpCode::Jmp, wait_true);
            low.patch_here(to_body);

            low.lower_block(&script.body)?;

            let wait_false = low.label();
            lower_gt_condition(&mut low, subject, threshold)?;
            let to_wait_true = low.jump_forward(OpCode::Jz);
            low.maybe_yield();
            low.jump_back(OpCode::Jmp, wait_false);
            low.patch_here(to_wait_true);
            low.jump_back(OpCode::Jmp, wait_true);
        }
        _ => {
            low.lower_block(&script.body)?;
            low.op(OpCode::StopSelf);
        }
    }

    Ok(entry)
}

fn lower_gt_condition(low: &mut Lowerer, subject: &GreaterThanSubject, threshold: &Expr) -> Result<(), CompileError> {
    match subject {
        GreaterThanSubject::Loudness => low.op(OpCode::GetLoudness),
        GreaterThanSubject::Timer => low.op(OpCode::GetTimer),
    }
    low.lower_expr(threshold)?;
    low.op(OpCode::Gt);
    Ok(())
}

/// Lowers one sprite's variable/list initializer (`ListCreate` for each
/// declared list, then `stopself`), if it declares any. Run once
/// against the sprite's base instance by the loader before any script
/// is scheduled.
fn lower_initializer(
    b: &mut Builder,
    symbols: &SymbolTable,
    sprite: &SpriteDef,
) -> Option<u64> {
    if sprite.lists.is_empty() {
        return None;
    }
    let entry = b.text.position();
    for list in &sprite.lists {
        let id = symbols.resolve(&sprite.name, &list.name).expect("list declared on its own sprite");
        b.text.write_u8(OpCode::ListCreate as u8);
        b.text.write_u24(id);
    }
    b.text.write_u8(OpCode::StopSelf as u8);
    Some(entry)
}

fn lower_sprite(b: &mut Builder, symbols: &SymbolTable, sprite: &SpriteDef) -> Result<(), CompileError> {
    for proc in &sprite.procedures {
        lower_procedure(b, symbols, &sprite.name, proc)?;
    }

    let mut script_offsets = Vec::with_capacity(sprite.scripts.len());
    for script in &sprite.scripts {
        script_offsets.push(lower_script(b, symbols, &sprite.name, script)?);
    }

    let init_pc = lower_initializer(b, symbols, sprite);

    let costumes = emit_costumes(b, &sprite.costumes);
    let sounds = emit_sounds(b, &sprite.sounds);

    let scripts_array = b.rdata.position();
    for &off in &script_offsets {
        b.write_ptr(Segment::Rdata, SegOffset::new(Segment::Text, off));
    }

    b.ref_plain_string(Segment::Stable, sprite.name.as_bytes());
    b.stable.write_f64(0.0);
    b.stable.write_f64(0.0);
    b.stable.write_f64(90.0);
    b.stable.write_f64(100.0);
    b.stable.write_i64(sprite.current_costume);
    b.stable.write_i64(0);
    b.stable.write_u8(1);
    b.stable.write_u8(sprite.is_stage as u8);
    b.stable.write_u8(0);
    b.stable.write_u8(0);
    b.stable.write_u32(symbols.field_base(&sprite.name));
    b.stable.write_u32(symbols.field_count(&sprite.name) as u32);
    match init_pc {
        Some(off) => {
            b.write_ptr(Segment::Stable, SegOffset::new(Segment::Text, off));
        }
        None => {
            b.stable.write_u64(u64::MAX);
        }
    }
    b.stable.write_u64(script_offsets.len() as u64);
    b.write_ptr(Segment::Stable, SegOffset::new(Segment::Rdata, scripts_array));
    b.stable.write_u64(costumes.count as u64);
    b.write_ptr(Segment::Stable, SegOffset::new(Segment::Rdata, costumes.offset));
    b.stable.write_u64(sounds.count as u64);
    b.write_ptr(Segment::Stable, SegOffset::new(Segment::Rdata, sounds.offset));

    Ok(())
}

/// Lowers the whole program: the stage's table entry first, matching
/// `Vm::load`'s assumption that sprite-table index 0 is the stage and
/// gets pinned as the render order's head.
pub fn lower_program(b: &mut Builder, symbols: &SymbolTable, program: &Program) -> Result<(), CompileError> {
    let sprite_count = 1 + program.sprites.len();
    b.rdata.write_u64(symbols.global_count as u64);
    b.rdata.write_u64(sprite_count as u64);

    lower_sprite(b, symbols, &program.stage)?;
    for sprite in &program.sprites {
        lower_sprite(b, symbols, sprite)?;
    }

    b.link()?;
    b.flush_string_pool();
    Ok(())
}
