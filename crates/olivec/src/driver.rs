//! The steps behind each subcommand.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use olive_codegen::lower::lower;
use olive_codegen::{compile_checked, BackendKind, OliveProgram, StackBackend, TextBackend};
use olive_rt::json::{from_json, to_json};
use olive_rt::{MemoryInput, RunStats, RuntimeContext, Value};
use olive_syntax::Program;
use olive_typeck::diagnostics::{render_all, to_diagnostics};
use olive_typeck::{CheckedProgram, CompileError, StaticDefinitions};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::config::Config;
use crate::sink::EventPrinter;

/// Everything a command needs besides the program: the registry, the
/// runtime values and the backend to generate code with.
pub struct Session {
    pub config: Config,
    pub definitions: StaticDefinitions,
    pub backend: BackendKind,
}

impl Session {
    /// `backend` overrides the configured one.
    pub fn new(config: Config, backend: Option<BackendKind>) -> Result<Session> {
        let definitions = config.definitions()?;
        let backend = match backend {
            Some(backend) => backend,
            None => config.backend()?.unwrap_or_default(),
        };
        Ok(Session {
            config,
            definitions,
            backend,
        })
    }

    pub fn load(config: Option<&Path>, backend: Option<BackendKind>) -> Result<Session> {
        let config = match config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        Self::new(config, backend)
    }

    pub fn check(&self, program: &Program) -> Result<CheckedProgram, Vec<CompileError>> {
        let result = olive_typeck::check(program, &self.definitions);
        match result.program {
            Some(checked) if result.errors.is_empty() => Ok(checked),
            _ => Err(result.errors),
        }
    }

    pub fn compile(&self, checked: &CheckedProgram) -> Result<Box<dyn OliveProgram>> {
        Ok(compile_checked(checked, self.backend)?)
    }

    /// The artifact as text: the stack module listing or the script.
    pub fn emit(&self, checked: &CheckedProgram) -> Result<String> {
        Ok(match self.backend {
            BackendKind::Stack => lower(StackBackend::new(), checked)?.module().to_string(),
            BackendKind::Text => lower(TextBackend::new(), checked)?.script().to_string(),
        })
    }

    pub fn context(&self) -> Result<RuntimeContext> {
        Ok(self.config.context()?)
    }

    /// Read `{"format": [record, ...]}` into records of the configured layouts.
    pub fn input(&self, path: &Path) -> Result<MemoryInput> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let json: Json = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let Json::Object(formats) = json else {
            bail!("{}: expected an object of input formats", path.display());
        };
        let mut input = MemoryInput::new();
        for (format, rows) in formats {
            let layout = self
                .config
                .layout(&format)?
                .ok_or_else(|| anyhow!("no input format `{format}` is configured"))?;
            let rows = rows
                .as_array()
                .ok_or_else(|| anyhow!("records of `{format}` must be an array"))?;
            input
                .insert_json(&format, &layout, rows)
                .with_context(|| format!("bad `{format}` record"))?;
            debug!(format, records = rows.len(), "loaded input");
        }
        Ok(input)
    }

    /// Run every olive, printing events to `out`.
    pub fn run<W: std::io::Write>(
        &self,
        compiled: &dyn OliveProgram,
        input: &MemoryInput,
        out: W,
        json: bool,
    ) -> Result<(Vec<RunStats>, usize)> {
        let mut printer = EventPrinter::new(out, json);
        for terminal in self.config.actions.keys().chain(self.config.refillers.keys()) {
            let types = self.config.parameter_types(terminal)?;
            printer = printer.with_parameters(terminal, types);
        }
        let stats = compiled.run(&self.context()?, input, &mut printer)?;
        let events = printer.events();
        printer.finish().context("failed to write events")?;
        info!(olives = stats.len(), events, "run finished");
        Ok((stats, events))
    }

    /// Call an exported function with JSON arguments; the result as JSON.
    pub fn call(&self, compiled: &dyn OliveProgram, name: &str, arguments: &[Json]) -> Result<Json> {
        let export = compiled
            .exports()
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| anyhow!("no exported function `{name}`"))?;
        if export.parameters.len() != arguments.len() {
            bail!(
                "`{name}` takes {} argument(s), but {} were given",
                export.parameters.len(),
                arguments.len()
            );
        }
        let values = export
            .parameters
            .iter()
            .zip(arguments)
            .map(|((parameter, ty), json)| {
                from_json(json, ty).with_context(|| format!("argument `{parameter}`"))
            })
            .collect::<Result<Vec<Value>>>()?;
        let result = compiled.call_export(&self.context()?, name, &values)?;
        Ok(to_json(&result, &export.return_type)?)
    }
}

pub fn load_program(path: &Path) -> Result<Program> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a valid program", path.display()))
}

/// Render compile errors: JSON for tools, ariadne reports when the source
/// text is at hand, plain `line:column` lines otherwise.
pub fn report(errors: &[CompileError], json: bool, source: Option<(&str, &str)>) -> String {
    let diagnostics = to_diagnostics(errors);
    if json {
        return serde_json::to_string_pretty(&diagnostics).unwrap_or_else(|_| "[]".to_string());
    }
    match source {
        Some((text, filename)) => render_all(errors, text, filename),
        None => diagnostics.iter().map(|d| format!("{d}\n")).collect(),
    }
}

/// What `build --json` prints about an artifact.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub backend: BackendKind,
    pub olives: usize,
    pub exports: &'a [olive_codegen::Export],
    pub required_services: &'a [String],
}

impl<'a> Summary<'a> {
    pub fn of(compiled: &'a dyn OliveProgram) -> Self {
        Summary {
            backend: compiled.backend(),
            olives: compiled.meta().pipelines.len(),
            exports: compiled.exports(),
            required_services: compiled.required_services(),
        }
    }
}
