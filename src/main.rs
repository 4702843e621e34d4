use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use monkey::compiler;
use monkey::diagnostic::ansi::AnsiRenderer;
use monkey::diagnostic::{Diagnostic, json, registry};
use monkey::object::Object;
use monkey::repl::{self, Engine, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    Ansi,
    Json,
}

/// Run Monkey programs, or start a REPL when no input is given.
#[derive(Debug, Parser)]
#[command(name = "monkey", version)]
struct Cli {
    /// Source file to run
    file: Option<PathBuf>,

    /// Run CODE instead of a file
    #[arg(short, long, value_name = "CODE", conflicts_with = "file")]
    eval: Option<String>,

    /// Execution backend
    #[arg(long, value_enum, env = "MONKEY_ENGINE", default_value_t = Engine::Vm)]
    engine: Engine,

    /// Print the compiled bytecode instead of running it
    #[arg(long, conflicts_with = "emit_ast")]
    disassemble: bool,

    /// Print the parsed program as JSON instead of running it
    #[arg(long)]
    emit_ast: bool,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = ErrorFormat::Ansi)]
    error_format: ErrorFormat,

    /// Disable colored diagnostics (also honors NO_COLOR)
    #[arg(long)]
    no_color: bool,

    /// Explain an error code, e.g. MK-C001
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,

    /// Log more (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(code) = &cli.explain {
        return match registry::lookup(&code.to_uppercase()) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("unknown error code: {}", code);
                ExitCode::FAILURE
            }
        };
    }

    let source = match (&cli.file, &cli.eval) {
        (Some(path), _) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        (None, Some(code)) => code.clone(),
        (None, None) => {
            let stdin = std::io::stdin();
            return match repl::start(stdin.lock(), std::io::stdout(), cli.engine) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("repl: {}", e);
                    ExitCode::FAILURE
                }
            };
        }
    };

    match run(&cli, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(diagnostics) => {
            report(&cli, &diagnostics);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, source: &str) -> Result<(), Vec<Diagnostic>> {
    let program = repl::parse(source)?;

    if cli.emit_ast {
        let json = serde_json::to_string_pretty(&program)
            .map_err(|e| vec![Diagnostic::error(format!("serialization error: {}", e))])?;
        println!("{}", json);
        return Ok(());
    }

    if cli.disassemble {
        let bytecode = compiler::compile(&program).map_err(|e| vec![Diagnostic::from(&e).with_source(source)])?;
        print!("{}", bytecode);
        return Ok(());
    }

    let mut session = Session::new(cli.engine);
    match session.run(&program, source).map_err(|d| vec![d])? {
        Object::Error(message) => Err(vec![Diagnostic::from_error_value(&message)]),
        Object::Null => Ok(()),
        value => {
            println!("{}", value);
            Ok(())
        }
    }
}

fn report(cli: &Cli, diagnostics: &[Diagnostic]) {
    match cli.error_format {
        ErrorFormat::Json => {
            for d in diagnostics {
                eprintln!("{}", json::render(d));
            }
        }
        ErrorFormat::Ansi => {
            let no_color_env = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
            let renderer = AnsiRenderer {
                use_color: !cli.no_color && !no_color_env && std::io::stderr().is_terminal(),
            };
            for d in diagnostics {
                eprint!("{}", renderer.render(d));
            }
        }
    }
}
