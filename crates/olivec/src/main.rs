//! The olive compiler CLI.
//!
//! - `olivec check <program>` - Type check a program and report diagnostics
//! - `olivec build <program>` - Generate code and write the artifact
//! - `olivec run <program> --input <records>` - Run every olive over some records
//! - `olivec call <program> <function> [args]` - Call an exported function
//!
//! Options shared by every subcommand:
//! - `--config` - The `olive.toml` registry (default: `./olive.toml` if present)
//! - `--backend` - `stack` or `text`, overriding `[compiler] backend`
//! - `-v` - More logging; `RUST_LOG` takes precedence

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use olive_codegen::BackendKind;
use olivec::{load_program, report, Session, Summary};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "olivec", version, about = "The olive compiler")]
struct Cli {
    /// Registry and constant values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Code generator to use
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Type check a program
    Check {
        /// Program AST as JSON
        program: PathBuf,

        /// Olive source the AST was parsed from, for annotated reports
        #[arg(long)]
        source: Option<PathBuf>,

        /// Output diagnostics as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Generate code and write the artifact
    Build {
        program: PathBuf,

        /// Where to write the artifact (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        source: Option<PathBuf>,

        /// Print diagnostics, or a summary of the artifact, as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every olive over a file of input records
    Run {
        program: PathBuf,

        /// JSON object of input format name to records
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        source: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Call an exported function
    Call {
        program: PathBuf,

        function: String,

        /// Arguments, each as JSON
        arguments: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(2);
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit code 1 means the program was rejected.
fn execute(cli: Cli) -> Result<i32> {
    let config = cli.config.or_else(|| {
        let default = PathBuf::from("olive.toml");
        default.exists().then_some(default)
    });
    let session = Session::load(config.as_deref(), cli.backend)?;
    debug!(backend = %session.backend, "session ready");

    match cli.command {
        Commands::Check {
            program,
            source,
            json,
        } => {
            let program_ast = load_program(&program)?;
            match session.check(&program_ast) {
                Ok(_) => {
                    if json {
                        println!("[]");
                    }
                    Ok(0)
                }
                Err(errors) => fail(&errors, json, source.as_deref()),
            }
        }
        Commands::Build {
            program,
            output,
            source,
            json,
        } => {
            let program_ast = load_program(&program)?;
            let checked = match session.check(&program_ast) {
                Ok(checked) => checked,
                Err(errors) => return fail(&errors, json, source.as_deref()),
            };
            let artifact = session.emit(&checked)?;
            match &output {
                Some(path) => std::fs::write(path, &artifact)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None if !json => print!("{artifact}"),
                None => {}
            }
            if json {
                let compiled = session.compile(&checked)?;
                println!("{}", serde_json::to_string_pretty(&Summary::of(compiled.as_ref()))?);
            }
            Ok(0)
        }
        Commands::Run {
            program,
            input,
            source,
            json,
        } => {
            let program_ast = load_program(&program)?;
            let checked = match session.check(&program_ast) {
                Ok(checked) => checked,
                Err(errors) => return fail(&errors, json, source.as_deref()),
            };
            let compiled = session.compile(&checked)?;
            let records = session.input(&input)?;
            let stdout = std::io::stdout();
            session.run(compiled.as_ref(), &records, stdout.lock(), json)?;
            Ok(0)
        }
        Commands::Call {
            program,
            function,
            arguments,
        } => {
            let program_ast = load_program(&program)?;
            let checked = match session.check(&program_ast) {
                Ok(checked) => checked,
                Err(errors) => return fail(&errors, false, None),
            };
            let compiled = session.compile(&checked)?;
            let arguments = arguments
                .iter()
                .map(|a| serde_json::from_str(a).with_context(|| format!("argument {a} is not JSON")))
                .collect::<Result<Vec<_>>>()?;
            let result = session.call(compiled.as_ref(), &function, &arguments)?;
            println!("{result}");
            Ok(0)
        }
    }
}

fn fail(errors: &[olive_typeck::CompileError], json: bool, source: Option<&Path>) -> Result<i32> {
    let text = match source {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };
    let filename = source.map(|p| p.display().to_string()).unwrap_or_default();
    let rendered = report(errors, json, text.as_deref().map(|t| (t, filename.as_str())));
    if json {
        println!("{rendered}");
    } else {
        let mut stderr = std::io::stderr().lock();
        write!(stderr, "{rendered}")?;
        writeln!(stderr, "error: {} problem(s) found", errors.len())?;
    }
    Ok(1)
}
