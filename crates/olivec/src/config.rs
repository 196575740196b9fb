//! `olive.toml`: the registry a program is checked against and the values
//! it runs with.
//!
//! ```toml
//! [compiler]
//! backend = "text"
//!
//! [formats.run]
//! fields = [
//!   { name = "name", type = "s", signable = true },
//!   { name = "size", type = "i" },
//! ]
//!
//! [actions.submit]
//! services = ["scheduler"]
//! parameters = [{ name = "name", type = "s" }, { name = "note", type = "s", required = false }]
//!
//! [constants.limit]
//! type = "i"
//! value = 3
//!
//! [signatures]
//! sig = "sha256"
//! ```
//!
//! Types are written as descriptors. Native functions come from the standard
//! library; `natives` narrows which of them programs may call.

use std::collections::BTreeMap;
use std::path::Path;

use olive_codegen::BackendKind;
use olive_rt::json::from_json;
use olive_rt::{builtins, RuntimeContext};
use olive_typeck::definitions::{
    ActionDefinition, ConstantDefinition, InputField, InputFormatDefinition, Parameter,
    RefillerDefinition, SignatureDefinition, SignatureKind, StaticDefinitions,
};
use olive_typeck::Type;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{owner}: {source}")]
    Descriptor {
        owner: String,
        source: olive_typeck::descriptor::DescriptorError,
    },
    #[error("constant `{name}`: {message}")]
    Constant { name: String, message: String },
    #[error("signature `{name}`: unknown kind `{kind}`, expected names, json or sha256")]
    SignatureKind { name: String, kind: String },
    #[error("no native function `{0}`")]
    UnknownNative(String),
    #[error("{0}")]
    Backend(String),
}

/// A parsed `olive.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerSection,
    #[serde(default)]
    pub formats: BTreeMap<String, FormatSection>,
    #[serde(default)]
    pub actions: BTreeMap<String, TerminalSection>,
    #[serde(default)]
    pub refillers: BTreeMap<String, TerminalSection>,
    #[serde(default)]
    pub constants: BTreeMap<String, ConstantSection>,
    /// Signature name to kind.
    #[serde(default)]
    pub signatures: BTreeMap<String, String>,
    /// Standard library functions programs may call; all of them when absent.
    #[serde(default)]
    pub natives: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerSection {
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatSection {
    pub fields: Vec<FieldSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSection {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub signable: bool,
}

/// An action or a refiller.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalSection {
    #[serde(default)]
    pub parameters: Vec<ParameterSection>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSection {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantSection {
    #[serde(rename = "type")]
    pub ty: String,
    /// Read as JSON of the constant's type. Without one the constant still
    /// type checks but a run that reads it fails.
    #[serde(default)]
    pub value: Option<toml::Value>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// The backend named in `[compiler]`, if any.
    pub fn backend(&self) -> Result<Option<BackendKind>, ConfigError> {
        self.compiler
            .backend
            .as_deref()
            .map(|name| name.parse().map_err(ConfigError::Backend))
            .transpose()
    }

    /// Field layout of an input format: sorted by name, as records are.
    pub fn layout(&self, format: &str) -> Result<Option<Vec<(String, Type)>>, ConfigError> {
        let Some(section) = self.formats.get(format) else {
            return Ok(None);
        };
        let mut layout = section
            .fields
            .iter()
            .map(|f| Ok((f.name.clone(), descriptor(&f.ty, || format!("{format}.{}", f.name))?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        layout.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Some(layout))
    }

    /// Parameter types of an action or refiller, by name.
    pub fn parameter_types(&self, terminal: &str) -> Result<BTreeMap<String, Type>, ConfigError> {
        let Some(section) = self.actions.get(terminal).or_else(|| self.refillers.get(terminal)) else {
            return Ok(BTreeMap::new());
        };
        section
            .parameters
            .iter()
            .map(|p| Ok((p.name.clone(), descriptor(&p.ty, || format!("{terminal}.{}", p.name))?)))
            .collect()
    }

    /// Build the registry programs are checked against.
    pub fn definitions(&self) -> Result<StaticDefinitions, ConfigError> {
        let mut defs = StaticDefinitions::new();
        for (name, format) in &self.formats {
            let fields = format
                .fields
                .iter()
                .map(|f| {
                    Ok(InputField {
                        name: f.name.clone(),
                        ty: descriptor(&f.ty, || format!("{name}.{}", f.name))?,
                        signable: f.signable,
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            defs.add_format(InputFormatDefinition {
                name: name.clone(),
                fields,
            });
        }
        for (name, action) in &self.actions {
            defs.add_action(ActionDefinition {
                name: name.clone(),
                parameters: parameters(name, &action.parameters)?,
                services: action.services.clone(),
            });
        }
        for (name, refiller) in &self.refillers {
            defs.add_refiller(RefillerDefinition {
                name: name.clone(),
                parameters: parameters(name, &refiller.parameters)?,
                services: refiller.services.clone(),
            });
        }
        for (name, constant) in &self.constants {
            defs.add_constant(ConstantDefinition {
                name: name.clone(),
                ty: descriptor(&constant.ty, || name.clone())?,
            });
        }
        for (name, kind) in &self.signatures {
            let kind = SignatureKind::from_name(kind).ok_or_else(|| ConfigError::SignatureKind {
                name: name.clone(),
                kind: kind.clone(),
            })?;
            defs.add_signature(SignatureDefinition {
                name: name.clone(),
                kind,
            });
        }

        let natives = builtins::definitions();
        if let Some(enabled) = &self.natives {
            if let Some(unknown) = enabled.iter().find(|n| !natives.iter().any(|d| &d.name == *n)) {
                return Err(ConfigError::UnknownNative(unknown.clone()));
            }
        }
        for native in natives {
            if self.natives.as_ref().map_or(true, |e| e.contains(&native.name)) {
                defs.add_function(native);
            }
        }
        Ok(defs)
    }

    /// A runtime context with the standard library and every constant that
    /// has a value.
    pub fn context(&self) -> Result<RuntimeContext, ConfigError> {
        let context = RuntimeContext::with_builtins();
        for (name, constant) in &self.constants {
            let Some(value) = &constant.value else {
                continue;
            };
            let ty = descriptor(&constant.ty, || name.clone())?;
            let json = serde_json::to_value(value).map_err(|e| ConfigError::Constant {
                name: name.clone(),
                message: e.to_string(),
            })?;
            let value = from_json(&json, &ty).map_err(|e| ConfigError::Constant {
                name: name.clone(),
                message: e.to_string(),
            })?;
            context.set_constant(name, value);
        }
        Ok(context)
    }
}

fn descriptor(text: &str, owner: impl FnOnce() -> String) -> Result<Type, ConfigError> {
    Type::parse_descriptor(text).map_err(|source| ConfigError::Descriptor {
        owner: owner(),
        source,
    })
}

fn parameters(owner: &str, sections: &[ParameterSection]) -> Result<Vec<Parameter>, ConfigError> {
    sections
        .iter()
        .map(|p| {
            Ok(Parameter {
                name: p.name.clone(),
                ty: descriptor(&p.ty, || format!("{owner}.{}", p.name))?,
                required: p.required,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use olive_rt::Value;
    use olive_typeck::Definitions;

    use super::*;

    const FULL: &str = r#"
[compiler]
backend = "text"

[formats.run]
fields = [
  { name = "name", type = "s", signable = true },
  { name = "lane", type = "i", signable = true },
  { name = "size", type = "i" },
]

[actions.submit]
services = ["scheduler"]
parameters = [
  { name = "name", type = "s" },
  { name = "note", type = "s", required = false },
]

[refillers.store]
parameters = [{ name = "key", type = "s" }]

[constants.limit]
type = "i"
value = 3

[constants.owners]
type = "mss"
value = { ann = "lane one" }

[constants.unset]
type = "s"

[signatures]
sig = "sha256"
"#;

    #[test]
    fn parse_full_config() {
        let config = Config::from_str(FULL).unwrap();
        assert_eq!(config.backend().unwrap(), Some(BackendKind::Text));

        let defs = config.definitions().unwrap();
        let run = defs.input_format("run").unwrap();
        assert_eq!(run.fields.len(), 3);
        assert!(run.fields[0].signable);
        assert!(!run.fields[2].signable);

        let submit = defs.action("submit").unwrap();
        assert_eq!(submit.services, ["scheduler"]);
        assert!(submit.parameters[0].required);
        assert!(!submit.parameters[1].required);
        assert!(defs.refiller("store").is_some());
        assert_eq!(defs.constants().len(), 3);
        assert_eq!(defs.signatures()[0].kind, SignatureKind::Sha256);
        assert!(defs.function("string_length").is_some());
    }

    #[test]
    fn layouts_are_sorted_by_name() {
        let config = Config::from_str(FULL).unwrap();
        let layout = config.layout("run").unwrap().unwrap();
        let names: Vec<&str> = layout.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["lane", "name", "size"]);
        assert!(config.layout("missing").unwrap().is_none());
    }

    #[test]
    fn constants_are_read_as_their_type() {
        let context = Config::from_str(FULL).unwrap().context().unwrap();
        assert_eq!(context.constant("limit").unwrap(), Value::Int(3));
        let owners = context.constant("owners").unwrap();
        assert_eq!(owners.as_map().unwrap().len(), 1);
        assert!(context.constant("unset").is_err());
    }

    #[test]
    fn natives_can_be_narrowed() {
        let config = Config::from_str("natives = [\"string_lower\"]").unwrap();
        let defs = config.definitions().unwrap();
        assert!(defs.function("string_lower").is_some());
        assert!(defs.function("string_length").is_none());

        let config = Config::from_str("natives = [\"launch\"]").unwrap();
        let err = config.definitions().unwrap_err();
        assert_eq!(err.to_string(), "no native function `launch`");
    }

    #[test]
    fn reject_bad_descriptor() {
        let config = Config::from_str(
            r#"
[formats.run]
fields = [{ name = "size", type = "integer" }]
"#,
        )
        .unwrap();
        let err = config.definitions().unwrap_err();
        assert!(err.to_string().starts_with("run.size: invalid type descriptor"), "{err}");
    }

    #[test]
    fn reject_mistyped_constant() {
        let config = Config::from_str(
            r#"
[constants.limit]
type = "i"
value = "three"
"#,
        )
        .unwrap();
        let err = config.context().unwrap_err();
        assert!(err.to_string().starts_with("constant `limit`"), "{err}");
    }

    #[test]
    fn reject_unknown_keys() {
        assert!(matches!(
            Config::from_str("[compiler]\noptimise = true\n"),
            Err(ConfigError::Parse(_))
        ));
        let config = Config::from_str("[compiler]\nbackend = \"llvm\"\n").unwrap();
        assert!(config.backend().is_err());
    }

    #[test]
    fn empty_config_is_valid() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.backend().unwrap(), None);
        assert!(config.formats.is_empty());
    }
}
