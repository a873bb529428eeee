//! The VM facade: owns every live subsystem (bytecode image, sprite
//! table, script table, listener tables, heap globals) and exposes the
//! host-visible lifecycle operations an embedding host drives one call
//! at a time, in the same thick-façade-over-an-execution-engine shape
//! as `ApplicationEngine` (`crates/neo/src/application_engine.rs`).

use hashbrown::HashMap;
use log::{error, info, warn};

use crate::bytecode::header::Header;
use crate::bytecode::Image;
use crate::config::{CompileOptions, StatusCode, VmOptions};
use crate::error::{ScriptException, VmPanic};
use crate::events::{restart_listeners, BroadcastWait, EventTables};
use crate::rng::Rng;
use crate::scheduler::{ScriptAllocInfo, ScriptId, ScriptTable};
use crate::script::{ScriptState, WakeCondition};
use crate::sprite::{AbstractSprite, SoundInfo, SpriteHandle, SpriteLinks, SpriteList};
use crate::value::Value;

/// Per-sprite per-sound playback slot key: `(sprite, instance, sound)`,
/// unique VM-wide, used by the audio collaborator to address one voice.
pub type VoiceId = (u32, u32, i64);

/// Minimal surface the core depends on for drawing. No
/// implementation ships in this crate; a real renderer lives outside
/// it and is handed to `Vm::new` as a trait object.
pub trait Renderer {
    /// Uploads/streams whatever backs `costume_id` for `sprite`, if not
    /// already resident, and returns an opaque handle the renderer
    /// tracks on its own side.
    fn ensure_costume_loaded(&mut self, sprite: &str, costume_id: i64);
    /// Submits one sprite's draw for this frame.
    fn submit(&mut self, sprite: SpriteHandle, model: &[f64; 6], effects: [f64; 7]);
    /// Costume-local alpha-mask sample at `(u, v)` in `[0, 1]^2`.
    fn sample_collision_mask(&self, sprite: SpriteHandle, u: f64, v: f64) -> bool;
    fn present(&mut self);
}

/// Per-sprite per-sound voice control.
pub trait AudioBackend {
    fn play(&mut self, voice: VoiceId, sound: &SoundInfo, volume: f64, pitch_ratio: f64, pan: f64);
    fn stop(&mut self, voice: VoiceId);
    fn is_playing(&self, voice: VoiceId) -> bool;
    fn stop_all(&mut self);
}

/// Mouse/keyboard/wall-clock input.
pub trait IoBackend {
    fn mouse_position(&self) -> (f64, f64);
    fn mouse_down(&self) -> bool;
    fn key_down(&self, scancode: i32) -> bool;
    fn username(&self) -> &str;
    /// Milliseconds since the Unix epoch.
    fn wall_clock_millis(&self) -> u64;
}

impl SpriteLinks for Vec<AbstractSprite> {
    fn next(&self, h: SpriteHandle) -> Option<SpriteHandle> {
        self[h.sprite as usize].instance(h.instance).and_then(|s| s.next)
    }
    fn prev(&self, h: SpriteHandle) -> Option<SpriteHandle> {
        self[h.sprite as usize].instance(h.instance).and_then(|s| s.prev)
    }
    fn set_next(&mut self, h: SpriteHandle, v: Option<SpriteHandle>) {
        if let Some(s) = self[h.sprite as usize].instance_mut(h.instance) {
            s.next = v;
        }
    }
    fn set_prev(&mut self, h: SpriteHandle, v: Option<SpriteHandle>) {
        if let Some(s) = self[h.sprite as usize].instance_mut(h.instance) {
            s.prev = v;
        }
    }
}

/// Where a `getstatic`/`setstatic`/`addstatic` id resolves to.
pub enum StaticSlot {
    Global(usize),
    Field(u32, usize),
}

/// The running VM: every subsystem `Vm::update` ticks forward together.
pub struct Vm {
    pub image: Image,
    pub sprites: Vec<AbstractSprite>,
    pub name_to_sprite: HashMap<String, u32>,
    pub render_order: SpriteList,
    pub scripts: ScriptTable,
    pub events: EventTables,
    /// `.data`-backed global Value table, addressed by the shared
    /// static-variable id space. Entries in a sprite's own
    /// `[field_base_id, field_base_id + field_count)` range are only
    /// the *seed* values new instances are copied from; live reads
    /// during execution redirect to the running instance's `fields`.
    pub globals: Vec<Value>,
    pub rng: Rng,
    pub time: f64,
    pub timer: f64,
    pub answer: Value,
    pub backdrop_name: String,
    pub username: String,
    pub mouse_x: f64,
    pub mouse_y: f64,
    pub mouse_down: bool,
    pub keys_down: HashMap<i32, bool>,
    pub framerate: f64,
    pub suspended: bool,
    pub halted: Option<ScriptException>,
    pub broadcast_waits: HashMap<ScriptId, BroadcastWait>,
    /// Cursor into the script table for the tick currently in
    /// `update`'s round-robin scan, mirroring the reference engine's
    /// `_nextScript`. A broadcast resets this to `0` so every listener
    /// it just restarted — including ones at a lower id than the
    /// broadcaster — still gets a turn this same tick.
    next_script: u32,
    pending_clone_deletes: Vec<SpriteHandle>,
    pub renderer: Option<Box<dyn Renderer>>,
    pub audio: Option<Box<dyn AudioBackend>>,
    pub io: Option<Box<dyn IoBackend>>,
}

impl Vm {
    pub fn new(image: Image) -> Self {
        Vm {
            image,
            sprites: Vec::new(),
            name_to_sprite: HashMap::new(),
            render_order: SpriteList::new(),
            scripts: ScriptTable::new(),
            events: EventTables::new(),
            globals: Vec::new(),
            rng: Rng::default(),
            time: 0.0,
            timer: 0.0,
            answer: Value::from_string(""),
            backdrop_name: String::new(),
            username: String::new(),
            mouse_x: 0.0,
            mouse_y: 0.0,
            mouse_down: false,
            keys_down: HashMap::new(),
            framerate: 30.0,
            suspended: false,
            halted: None,
            broadcast_waits: HashMap::new(),
            next_script: 0,
            pending_clone_deletes: Vec::new(),
            renderer: None,
            audio: None,
            io: None,
        }
    }

    /// Resolves a `getstatic`/`setstatic`/`addstatic` id for a script
    /// currently running on `sprite`/`instance`.
    pub fn resolve_static(&self, sprite: u32, id: u32) -> StaticSlot {
        let ab = &self.sprites[sprite as usize];
        if id >= ab.field_base_id && (id - ab.field_base_id) < ab.field_count as u32 {
            StaticSlot::Field(sprite, (id - ab.field_base_id) as usize)
        } else {
            StaticSlot::Global(id as usize)
        }
    }

    pub fn read_static(&self, sprite: u32, instance: u32, id: u32) -> Value {
        match self.resolve_static(sprite, id) {
            StaticSlot::Global(idx) => self.globals.get(idx).cloned().unwrap_or(Value::None),
            StaticSlot::Field(sprite, idx) => self.sprites[sprite as usize]
                .instance(instance)
                .and_then(|s| s.fields.get(idx))
                .cloned()
                .unwrap_or(Value::None),
        }
    }

    pub fn write_static(&mut self, sprite: u32, instance: u32, id: u32, value: Value) {
        match self.resolve_static(sprite, id) {
            StaticSlot::Global(idx) => {
                if idx >= self.globals.len() {
                    self.globals.resize(idx + 1, Value::None);
                }
                crate::value::assign(&mut self.globals[idx], &value);
            }
            StaticSlot::Field(sprite, idx) => {
                if let Some(s) = self.sprites[sprite as usize].instance_mut(instance) {
                    if let Some(slot) = s.fields.get_mut(idx) {
                        crate::value::assign(slot, &value);
                    }
                }
            }
        }
    }

    pub fn handle(&self, sprite: u32, instance: u32) -> SpriteHandle {
        SpriteHandle::new(sprite, instance)
    }

    /// Populates the sprite table and global slots from `self.image`,
    /// instantiates every sprite's base instance, registers listener
    /// tables and auto-start scripts, and appends each to the render
    /// list in sprite-table order (the stage first, pinned as head).
    pub fn load(&mut self) -> Result<(), VmPanic> {
        crate::loader::populate(self)?;
        let sprite_count = self.sprites.len() as u32;
        for idx in 0..sprite_count {
            let instance = self.sprites[idx as usize].instantiate_base()?;
            let handle = SpriteHandle::new(idx, instance);
            let name = self.sprites[idx as usize].name.clone();
            self.render_order.add(&mut self.sprites, handle, &name)?;

            if let Some(pc) = self.sprites[idx as usize].initializer_pc {
                let id = self.scripts.alloc(ScriptAllocInfo {
                    sprite: idx,
                    instance,
                    entry_pc: pc,
                    auto_start: false,
                })?;
                crate::interpreter::run_script(self, id);
            }
        }
        Ok(())
    }

    /// Allocates a script slot bound to `sprite`'s base instance and
    /// registers it per `kind` (called by the loader while scanning
    /// each script's entry instruction). `onclone` entries are recorded
    /// on the `AbstractSprite` directly instead, since a clone-entry
    /// script is only ever instantiated per-clone by `spawn_clone`,
    /// never at load time.
    pub fn register_script(
        &mut self,
        sprite: u32,
        entry_pc: u64,
        kind: EntryKind,
    ) -> Result<ScriptId, VmPanic> {
        if matches!(kind, EntryKind::Clone) {
            self.sprites[sprite as usize].clone_entry.push(entry_pc);
            return Ok(ScriptId::MAX);
        }

        let auto_start = matches!(kind, EntryKind::Flag | EntryKind::GreaterThan);
        let instance = crate::sprite::BASE_INSTANCE_ID;
        let id = self.scripts.alloc(ScriptAllocInfo { sprite, instance, entry_pc, auto_start })?;
        match kind {
            EntryKind::Flag => self.events.register_flag(id),
            EntryKind::Key(scancode) => self.events.register_key(scancode, id),
            EntryKind::Message(name) => self.events.register_message(&name, id),
            EntryKind::BackdropSwitch(name) => self.events.register_backdrop_switch(&name, id),
            EntryKind::Click => {
                let h = self.handle(sprite, instance);
                let mut ids = self.events.click_listeners(h).to_vec();
                ids.push(id);
                self.events.register_click(h, ids);
            }
            EntryKind::Clone => unreachable!("handled above"),
            EntryKind::GreaterThan => {}
        }
        Ok(id)
    }

    /// Spawns a clone of `template`'s base instance, copying mutable
    /// state, and schedules its clone-entry scripts.
    pub fn spawn_clone(&mut self, sprite: u32) -> Result<SpriteHandle, VmPanic> {
        let template = crate::sprite::BASE_INSTANCE_ID;
        let instance = self.sprites[sprite as usize].instantiate_clone(template)?;
        let handle = SpriteHandle::new(sprite, instance);
        let before = self.sprites.prev(self.handle(sprite, template));
        let name = self.sprites[sprite as usize].name.clone();
        self.render_order.insert(&mut self.sprites, before, handle, &name)?;

        let entry_pcs: Vec<u64> = self.sprites[sprite as usize].clone_entry.clone();
        for pc in entry_pcs {
            let id = self.scripts.alloc(ScriptAllocInfo {
                sprite,
                instance,
                entry_pc: pc,
                auto_start: false,
            })?;
            let mut ids = self.events.clone_entry_listeners(handle).to_vec();
            ids.push(id);
            self.events.register_clone_entry(handle, ids);
            restart_listeners([id], &mut self.scripts);
        }
        Ok(handle)
    }

    pub fn request_delete_clone(&mut self, sprite: u32, instance: u32) {
        if instance != crate::sprite::BASE_INSTANCE_ID {
            self.pending_clone_deletes.push(SpriteHandle::new(sprite, instance));
        }
    }

    /// Actually frees clones marked for deletion. Run between ticks,
    /// never from inside a running fiber.
    fn reap_deleted_clones(&mut self) {
        let pending = std::mem::take(&mut self.pending_clone_deletes);
        for handle in pending {
            self.render_order.remove(&mut self.sprites, handle);
            self.events.forget_instance(handle);
            self.sprites[handle.sprite as usize].free(handle.instance);
        }
    }

    /// One scheduler tick.
    pub fn update(&mut self) {
        if self.suspended || self.halted.is_some() {
            return;
        }
        self.time += 1.0 / self.framerate.max(1.0);
        self.timer += 1.0 / self.framerate.max(1.0);

        self.poll_host_events();

        self.next_script = 0;
        while self.next_script < self.scripts.len() as u32 {
            let id = self.next_script;
            self.next_script += 1;
            if self.scripts.is_scheduled(id) {
                continue;
            }
            if matches!(self.scripts.get(id).state, ScriptState::Embryo) {
                continue;
            }

            let time = self.time;
            let wake_ready = |s: &crate::script::Script| match s.wake {
                Some(WakeCondition::SleepUntil(t)) => time >= t,
                Some(WakeCondition::GlideUntil(t)) => time >= t,
                Some(WakeCondition::NextTick) => true,
                Some(WakeCondition::AskInput) => false,
                Some(WakeCondition::BroadcastDone) => false,
                // No audio collaborator is wired in by default (playback
                // is an external concern); absent one, a voice is done as
                // soon as it's checked, so `playsoundandwait` degrades to a
                // one-tick wait instead of hanging forever.
                Some(WakeCondition::VoiceDone(_)) => true,
                None => true,
            };
            self.scripts.advance_state(id, wake_ready);

            if matches!(self.scripts.get(id).state, ScriptState::Waiting) {
                if matches!(self.scripts.get(id).wake, Some(WakeCondition::BroadcastDone)) {
                    let done = self
                        .broadcast_waits
                        .get(&id)
                        .map(|w| w.is_done(&self.scripts))
                        .unwrap_or(true);
                    if done {
                        self.broadcast_waits.remove(&id);
                        let s = self.scripts.get_mut(id);
                        s.wake = None;
                        s.state = ScriptState::Runnable;
                    }
                }
            }

            if matches!(self.scripts.get(id).state, ScriptState::Runnable) {
                self.scripts.set_scheduled(id, true);
                crate::interpreter::run_script(self, id);
            }
        }

        self.update_glides();
        self.reap_deleted_clones();
        self.scripts.clear_scheduled_flags();
    }

    /// Interpolates every in-flight `glidexy` across every sprite
    /// instance, independent of whether the gliding script happens to
    /// be the one running this tick.
    fn update_glides(&mut self) {
        let time = self.time;
        for ab in self.sprites.iter_mut() {
            for s in ab.live_instances_mut() {
                if !s.glide.is_done(time) {
                    let (x, y) = s.glide.position_at(time);
                    s.set_xy(x, y);
                }
            }
        }
    }

    fn poll_host_events(&mut self) {
        if let Some(io) = self.io.as_ref() {
            let (mx, my) = io.mouse_position();
            self.mouse_x = mx;
            self.mouse_y = my;
            self.mouse_down = io.mouse_down();
            self.username = io.username().to_string();
        }
    }

    /// `flag clicked`: stop every script, delete all clones, restart
    /// every flag listener.
    pub fn dispatch_flag(&mut self) {
        self.scripts.terminate_where(u32::MAX, |_| true);
        for idx in 0..self.sprites.len() as u32 {
            for inst in self.sprites[idx as usize].clone_instance_ids() {
                self.request_delete_clone(idx, inst);
            }
        }
        self.reap_deleted_clones();
        let listeners: Vec<ScriptId> = self.events.flag_listeners().to_vec();
        restart_listeners(listeners, &mut self.scripts);
    }

    pub fn dispatch_key(&mut self, scancode: i32) {
        let listeners: Vec<ScriptId> = self.events.key_listeners(scancode).collect();
        restart_listeners(listeners, &mut self.scripts);
    }

    /// `broadcast`: restarts every listener for `name` and, per the
    /// reference engine's `Send()`, resets the tick's scan cursor to 0
    /// so listeners behind the broadcaster's own index still run this
    /// same tick instead of waiting a full tick.
    pub fn dispatch_message(&mut self, name: &str) {
        let listeners: Vec<ScriptId> = self.events.message_listeners(name).to_vec();
        restart_listeners(listeners, &mut self.scripts);
        self.next_script = 0;
    }

    /// `sendandwait`: restarts every listener and returns the pending
    /// set for the caller to park the sending script on.
    pub fn dispatch_message_and_wait(&mut self, name: &str) -> BroadcastWait {
        let listeners: Vec<ScriptId> = self.events.message_listeners(name).to_vec();
        restart_listeners(listeners.clone(), &mut self.scripts);
        self.next_script = 0;
        BroadcastWait::new(listeners)
    }

    /// `switchbackdropto`/`nextbackdrop`: restarts every script waiting
    /// on `name`, same cursor-reset rule as [`Vm::dispatch_message`] so a
    /// backdrop change can hand off to an earlier-indexed listener
    /// within the same tick.
    pub fn dispatch_backdrop_switch(&mut self, name: &str) {
        let listeners: Vec<ScriptId> = self.events.backdrop_switch_listeners(name).to_vec();
        restart_listeners(listeners, &mut self.scripts);
        self.next_script = 0;
    }
}

/// Why a script was registered at load time.
#[derive(Debug, Clone)]
pub enum EntryKind {
    Flag,
    /// `None` is an "any key" listener.
    Key(Option<i32>),
    Click,
    Message(String),
    BackdropSwitch(String),
    GreaterThan,
    Clone,
}

/// `CreateContext`/`LoadProgram`/`Compile`/`VMInit`/`VMStart`/`VMUpdate`/
/// `VMTerminate`. Owns the compiled image and, once
/// `vm_init` succeeds, the running `Vm`.
#[derive(Default)]
pub struct VmContext {
    program: Option<Vec<u8>>,
    compiled: Option<Image>,
    vm: Option<Vm>,
    compile_options: CompileOptions,
    vm_options: VmOptions,
}

impl VmContext {
    pub fn create() -> Self {
        info!("VM context created");
        Self::default()
    }

    pub fn destroy(&mut self) {
        info!("VM context destroyed");
        self.program = None;
        self.compiled = None;
        self.vm = None;
    }

    /// Detects whether `bytes` is already a compiled image; otherwise
    /// the caller must still run it through the out-of-scope AST
    /// parser and hand the resulting tree to `compile`.
    pub fn load_program(&mut self, bytes: Vec<u8>) -> StatusCode {
        if self.program.is_some() {
            return StatusCode::AlreadyLoaded;
        }
        if Header::looks_like_bytecode(&bytes) {
            match Image::parse(bytes) {
                Ok(image) => {
                    self.compiled = Some(image);
                }
                Err(e) => {
                    error!("invalid bytecode image: {e}");
                    return StatusCode::InvalidProgram;
                }
            }
        } else {
            self.program = Some(bytes);
        }
        StatusCode::Success
    }

    pub fn compile_options_mut(&mut self) -> &mut CompileOptions {
        &mut self.compile_options
    }

    /// Runs a parsed project through the compiler and parses the
    /// resulting image back, the same path `load_program` takes for an
    /// already-compiled blob.
    pub fn compile(&mut self, program: &crate::compiler::ast::Program) -> StatusCode {
        if self.compiled.is_some() {
            return StatusCode::AlreadyCompiled;
        }
        let bytes = match crate::compiler::compile(program, &self.compile_options) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("compile failed: {e}");
                return StatusCode::CompilationFailed;
            }
        };
        match Image::parse(bytes) {
            Ok(image) => {
                self.compiled = Some(image);
                StatusCode::Success
            }
            Err(e) => {
                error!("compiled image failed to parse: {e}");
                StatusCode::CompilationFailed
            }
        }
    }

    pub fn get_program(&self) -> Option<&Image> {
        self.compiled.as_ref()
    }

    pub fn vm_init(&mut self, options: VmOptions) -> StatusCode {
        let Some(image) = self.compiled.take() else {
            return StatusCode::NotCompiled;
        };
        self.vm_options = options;
        let mut vm = Vm::new(image);
        vm.framerate = options.framerate;
        vm.suspended = options.suspend;
        if let Err(e) = vm.load() {
            error!("vm init failed: {e}");
            self.vm = None;
            return StatusCode::OutOfMemory;
        }
        self.vm = Some(vm);
        StatusCode::Success
    }

    pub fn vm_start(&mut self) -> StatusCode {
        match &mut self.vm {
            Some(vm) => {
                vm.suspended = false;
                vm.dispatch_flag();
                StatusCode::Success
            }
            None => StatusCode::NoVm,
        }
    }

    pub fn vm_update(&mut self) -> StatusCode {
        match &mut self.vm {
            Some(vm) => {
                vm.update();
                if let Some(exc) = &vm.halted {
                    warn!("VM halted: {exc}");
                }
                StatusCode::Success
            }
            None => StatusCode::NoVm,
        }
    }

    pub fn vm_terminate(&mut self) -> StatusCode {
        self.vm = None;
        StatusCode::Success
    }

    pub fn vm(&self) -> Option<&Vm> {
        self.vm.as_ref()
    }

    pub fn vm_mut(&mut self) -> Option<&mut Vm> {
        self.vm.as_mut()
    }
}
