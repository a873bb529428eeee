//! AST-to-bytecode compiler: symbol assignment, optional constant
//! folding, lowering, linking, and export — the only way a `Program`
//! becomes the byte container `Image::parse` reads back.

pub mod ast;
mod linker;
mod lower;
mod optimize;
pub mod symbols;

use crate::bytecode::builder::Builder;
use crate::config::CompileOptions;
use crate::error::CompileError;
use symbols::SymbolTable;

/// Compiles a whole project into one exported container image.
///
/// `optimize_program` mutates in place, but the caller's `Program`
/// shouldn't be rewritten out from under it, so compilation always
/// works on its own copy.
pub fn compile(program: &ast::Program, options: &CompileOptions) -> Result<Vec<u8>, CompileError> {
    let mut program = program.clone();
    if !options.debug && options.optimization > 0 {
        optimize::optimize_program(&mut program, options.optimization);
    }
    let symbols = SymbolTable::build(&program);
    let mut builder = Builder::new();
    lower::lower_program(&mut builder, &symbols, &program)?;
    linker::link_and_export(builder)
}
