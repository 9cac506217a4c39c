#![allow(dead_code)]

use std::process::Command;

use kairos::ast::Module;
use kairos::config::CompilerConfig;
use kairos::Compilation;

pub fn kairosc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kairosc"))
}

pub fn compile(module: &Module) -> Compilation {
    kairos::compile_module(module, &CompilerConfig::default())
}

pub fn compile_with(module: &Module, config: &CompilerConfig) -> Compilation {
    kairos::compile_module(module, config)
}

/// Error messages in report order, notes left out.
pub fn errors(c: &Compilation) -> Vec<String> {
    c.diagnostics.errors().map(|d| d.message.clone()).collect()
}

pub fn assert_clean(c: &Compilation) {
    assert!(!c.has_errors(), "unexpected errors: {:?}", errors(c));
}
