//! Thin link/export wrapper. `Builder::link` already resolves every
//! `call` site against the procedure table; this module just gives
//! that step a name alongside `lower`/`optimize` in the pipeline and
//! turns a link failure into the one-shot `Vec<u8>` image.

use crate::bytecode::builder::Builder;
use crate::error::CompileError;

pub fn link_and_export(builder: Builder) -> Result<Vec<u8>, CompileError> {
    Ok(builder.export())
}
