//! skink CLI
//!
//! Runs a script or module, evaluates inline source, or drops into a
//! line REPL. `SKINK_PATH` extends the module search path and
//! `SKINK_EXIT_CODE` sets the failure exit code.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use skink_vm_core::format;
use skink_vm_runtime::{FsModuleLoader, Vm, VmOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Script,
    Module,
}

#[derive(Debug, Parser)]
#[command(name = "skink", about = "An embeddable JavaScript engine")]
struct Cli {
    /// Evaluate inline source instead of a file
    #[arg(short = 'c', value_name = "SOURCE")]
    command: Option<String>,

    /// Print the version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Treat the source as a script or a module
    #[arg(short = 't', value_enum, default_value = "script")]
    kind: SourceKind,

    /// Module search path (colon-separated)
    #[arg(short = 'p', value_name = "PATHS")]
    paths: Option<String>,

    /// Stack size in bytes
    #[arg(short = 'j', value_name = "BYTES")]
    stack_size: Option<usize>,

    /// Exit code used for script failures
    #[arg(short = 'e', value_name = "CODE")]
    exit_code: Option<u8>,

    /// Sandbox mode: no module loader, no filesystem externals
    #[arg(short = 's')]
    sandbox: bool,

    /// Drop unsafe evaluation (eval)
    #[arg(short = 'u')]
    drop_unsafe: bool,

    /// Quiet: no REPL prompt, no completion-value echo
    #[arg(short = 'q')]
    quiet: bool,

    /// Ignore unhandled promise rejections
    #[arg(short = 'r')]
    ignore_rejections: bool,

    /// Dump the AST and exit
    #[arg(short = 'a')]
    dump_ast: bool,

    /// Disassemble compiled bytecode
    #[arg(short = 'd')]
    disassemble: bool,

    /// Script file to run; remaining arguments reach `process.argv`
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Arguments passed through to the script
    #[arg(trailing_var_arg = true)]
    script_args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let failure_code = cli
        .exit_code
        .or_else(|| {
            std::env::var("SKINK_EXIT_CODE")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(1);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(failure_code),
        Err(e) => {
            eprintln!("skink: {e:#}");
            ExitCode::from(failure_code)
        }
    }
}

/// Ok(true) on success, Ok(false) for script-level failure
fn run(cli: Cli) -> Result<bool> {
    if cli.version {
        println!("skink {}", env!("CARGO_PKG_VERSION"));
        return Ok(true);
    }

    let (source, name) = match (&cli.command, &cli.file) {
        (Some(inline), _) => (Some(inline.clone()), "<inline>".to_string()),
        (None, Some(path)) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            (Some(source), path.display().to_string())
        }
        (None, None) => (None, String::new()),
    };

    if cli.dump_ast {
        let Some(source) = &source else {
            anyhow::bail!("-a requires a source (-c or a file)");
        };
        println!("{}", skink_vm_compiler::dump_ast(source, &name)?);
        return Ok(true);
    }

    let mut vm = build_vm(&cli)?;
    match source {
        Some(source) => Ok(run_source(&mut vm, &cli, &source, &name)),
        None => repl(&mut vm, &cli),
    }
}

fn build_vm(cli: &Cli) -> Result<Vm> {
    let mut options = VmOptions {
        sandbox: cli.sandbox,
        unsafe_eval: !cli.drop_unsafe,
        quiet: cli.quiet,
        disassemble: cli.disassemble,
        module: cli.kind == SourceKind::Module,
        argv: cli.script_args.clone(),
        ..Default::default()
    };
    if let Some(stack_size) = cli.stack_size {
        options.max_stack_size = stack_size;
    }

    let vm = Vm::new(options)?;

    if !cli.sandbox {
        let mut search_paths: Vec<PathBuf> = Vec::new();
        if let Some(paths) = &cli.paths {
            search_paths.extend(paths.split(':').map(PathBuf::from));
        }
        if let Ok(env_paths) = std::env::var("SKINK_PATH") {
            search_paths.extend(env_paths.split(':').map(PathBuf::from));
        }
        search_paths.push(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        vm.set_module_loader(FsModuleLoader::new(search_paths).into_loader());
    }
    Ok(vm)
}

/// Compile, run, drain the event loop and report; true on success
fn run_source(vm: &mut Vm, cli: &Cli, source: &str, name: &str) -> bool {
    let module = match vm.compile(source, name) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("{e}");
            return false;
        }
    };

    let value = match vm.start(module) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{e}");
            return false;
        }
    };

    if let Err(e) = vm.run_event_loop() {
        eprintln!("{e}");
        return false;
    }

    if !cli.quiet && !value.is_undefined() {
        println!("{}", format::describe(&value));
    }

    if !cli.ignore_rejections {
        let rejections = vm.take_unhandled_rejections();
        if !rejections.is_empty() {
            for reason in &rejections {
                eprintln!("unhandled promise rejection: {}", format::describe(reason));
            }
            return false;
        }
    }
    true
}

/// Line REPL; globals persist across lines through the shared realm
fn repl(vm: &mut Vm, cli: &Cli) -> Result<bool> {
    if !cli.quiet {
        eprintln!("skink {} (interactive)", env!("CARGO_PKG_VERSION"));
    }

    let stdin = std::io::stdin();
    let mut line_number = 0usize;
    loop {
        if !cli.quiet {
            print!(">> ");
            std::io::stdout().flush().ok();
        }
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(true); // EOF
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ".exit" {
            return Ok(true);
        }

        line_number += 1;
        let name = format!("<repl:{line_number}>");
        match vm.compile(&line, &name).and_then(|m| vm.start(m)) {
            Ok(value) => {
                if let Err(e) = vm.run_event_loop() {
                    eprintln!("{e}");
                }
                if !value.is_undefined() {
                    println!("{}", format::describe(&value));
                }
            }
            Err(e) => eprintln!("{e}"),
        }

        if !cli.ignore_rejections {
            for reason in vm.take_unhandled_rejections() {
                eprintln!("unhandled promise rejection: {}", format::describe(&reason));
            }
        }
    }
}
