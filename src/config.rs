//! Host-facing configuration structs for `Compile`/`VMInit`.

/// Options for `VmContext::compile`.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Disables the optimizer entirely, keeping source-level line
    /// mapping exact for a debugger.
    pub debug: bool,
    /// 0 = no folding, 1 = constant folding + algebraic simplification,
    /// 2 = additionally dead-branch elimination via the static
    /// environment.
    pub optimization: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { debug: false, optimization: 2 }
    }
}

/// Options for `VmContext::vm_init`.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub debug: bool,
    /// Scheduler ticks per second.
    pub framerate: f64,
    /// Start paused; `vm_start` leaves the VM in `Suspended` scripts
    /// until the host calls `vm_update` for the first time regardless,
    /// but `suspend` additionally holds every auto-start script back.
    pub suspend: bool,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub fullscreen: bool,
    pub borderless: bool,
    pub free_aspect_ratio: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            debug: false,
            framerate: 30.0,
            suspend: false,
            width: 480,
            height: 360,
            resizable: false,
            fullscreen: false,
            borderless: false,
            free_aspect_ratio: false,
        }
    }
}

/// Result codes returned by `VmContext` methods that can fail for a
/// reason the host should branch on rather than just log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Unknown,
    Io,
    OutOfMemory,
    NoProgram,
    AlreadyLoaded,
    InvalidProgram,
    AlreadyCompiled,
    NotCompiled,
    CompilationFailed,
    NoVm,
    AlreadyRunning,
    Timeout,
}
