use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::ast::Program;
use crate::compiler::{Compiler, CompilerState};
use crate::diagnostic::Diagnostic;
use crate::diagnostic::ansi::AnsiRenderer;
use crate::interpreter::Interpreter;
use crate::object::Object;
use crate::vm::Vm;
use crate::{lexer, parser};

pub const PROMPT: &str = ">> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Engine {
    /// Bytecode compiler and stack VM
    #[default]
    Vm,
    /// Tree-walking evaluator
    Eval,
}

/// Lex and parse `source`, converting every error into a diagnostic that
/// carries the source for snippet rendering.
pub fn parse(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lexer::lex(source).map_err(|e| vec![Diagnostic::from(&e).with_source(source)])?;
    let (mut program, errors) = parser::parse(tokens);
    if !errors.is_empty() {
        return Err(errors.iter().map(|e| Diagnostic::from(e).with_source(source)).collect());
    }
    program.source = Some(source.to_string());
    Ok(program)
}

/// Engine state that persists across inputs: compiler symbols, constants and
/// VM globals, or the evaluator's global environment.
pub struct Session {
    engine: Engine,
    compiler_state: CompilerState,
    globals: Vec<Object>,
    interpreter: Interpreter,
}

impl Session {
    pub fn new(engine: Engine) -> Self {
        Session {
            engine,
            compiler_state: CompilerState::default(),
            globals: Vec::new(),
            interpreter: Interpreter::new(),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Parse and run one input. Only the first parse error is reported.
    pub fn eval_line(&mut self, source: &str) -> Result<Object, Diagnostic> {
        let program = parse(source).map_err(|errors| {
            let extra = errors.len().saturating_sub(1);
            let mut errors = errors.into_iter();
            let first = errors.next().unwrap_or_else(|| Diagnostic::error("parse failed"));
            if extra > 0 { first.with_note(format!("{} more error(s) not shown", extra)) } else { first }
        })?;
        self.run(&program, source)
    }

    pub fn run(&mut self, program: &Program, source: &str) -> Result<Object, Diagnostic> {
        match self.engine {
            Engine::Vm => self.run_vm(program, source),
            Engine::Eval => self
                .interpreter
                .eval_program(program)
                .map_err(|e| Diagnostic::from(&e).with_source(source)),
        }
    }

    fn run_vm(&mut self, program: &Program, source: &str) -> Result<Object, Diagnostic> {
        // Compile against a copy so a failed input leaves no half-defined symbols
        let mut compiler = Compiler::with_state(self.compiler_state.clone());
        compiler
            .compile(program)
            .map_err(|e| Diagnostic::from(&e).with_source(source))?;
        let bytecode = compiler.bytecode();
        self.compiler_state = compiler.into_state();

        let mut vm = Vm::with_globals(bytecode, std::mem::take(&mut self.globals));
        if let Err(e) = vm.run() {
            self.globals = vm.into_globals();
            return Err(Diagnostic::from(&e));
        }
        let value = vm.last_popped();
        self.globals = vm.into_globals();
        Ok(value)
    }
}

/// Read-eval-print loop. Each result is printed in its inspect form;
/// diagnostics are printed in place and the loop continues.
pub fn start<R: BufRead, W: Write>(mut reader: R, mut writer: W, engine: Engine) -> io::Result<()> {
    let mut session = Session::new(engine);
    let renderer = AnsiRenderer { use_color: false };
    debug!(?engine, "repl started");
    loop {
        write!(writer, "{}", PROMPT)?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        match session.eval_line(&line) {
            Ok(value) => writeln!(writer, "{}", value)?,
            Err(d) => write!(writer, "{}", renderer.render(&d))?,
        }
    }
}
