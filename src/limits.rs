//! Fixed capacities carried over from the reference engine's
//! `libscratch3/src/vm/vm.hpp`.

pub const STACK_SIZE: usize = 512;
pub const MAX_SCRIPTS: usize = 512;
pub const MAX_INSTANCES: usize = 512;
