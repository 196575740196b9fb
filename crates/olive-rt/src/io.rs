//! Where records come from and where a run's effects go.

use olive_typeck::Type;
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::json::from_json;
use crate::value::Value;

/// Supplies the records of each input format. Records are tuples whose
/// fields follow the format's sorted field order.
pub trait InputProvider: Send + Sync {
    fn records(&self, format: &str) -> Result<Vec<Value>, RuntimeError>;
}

/// Records held in memory, keyed by format name.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    formats: FxHashMap<String, Vec<Value>>,
}

impl MemoryInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, format: &str, records: Vec<Value>) -> &mut Self {
        self.formats.insert(format.to_string(), records);
        self
    }

    /// Read JSON objects into records of the given field layout.
    pub fn insert_json(
        &mut self,
        format: &str,
        layout: &[(String, Type)],
        rows: &[serde_json::Value],
    ) -> Result<&mut Self, RuntimeError> {
        let object = Type::Object(layout.iter().cloned().collect());
        let records = rows
            .iter()
            .map(|row| from_json(row, &object))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.insert(format, records))
    }
}

impl InputProvider for MemoryInput {
    fn records(&self, format: &str) -> Result<Vec<Value>, RuntimeError> {
        self.formats
            .get(format)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFormat(format.to_string()))
    }
}

/// Receives everything a run does besides transforming records.
pub trait ActionSink {
    /// A `Run` terminal fired; arguments are sorted by parameter name.
    fn action(&mut self, action: &str, arguments: Vec<(String, Value)>);
    /// The rows a `Refill` terminal collected, delivered once per run.
    fn refill(&mut self, refiller: &str, rows: Vec<Vec<(String, Value)>>);
    fn monitor(&mut self, metric: &str, help: &str, labels: Vec<(String, String)>);
    fn dump(&mut self, dumper: &str, row: Vec<Value>);
    /// An `Alert` terminal fired; `ttl` is in seconds.
    fn alert(&mut self, labels: Vec<(String, String)>, annotations: Vec<(String, String)>, ttl: i64);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Action {
        action: String,
        arguments: Vec<(String, Value)>,
    },
    Refill {
        refiller: String,
        rows: Vec<Vec<(String, Value)>>,
    },
    Monitor {
        metric: String,
        labels: Vec<(String, String)>,
    },
    Dump {
        dumper: String,
        row: Vec<Value>,
    },
    Alert {
        labels: Vec<(String, String)>,
        annotations: Vec<(String, String)>,
        ttl: i64,
    },
}

/// Keeps every event in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSink {
    pub events: Vec<Event>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> impl Iterator<Item = (&str, &[(String, Value)])> {
        self.events.iter().filter_map(|e| match e {
            Event::Action { action, arguments } => Some((action.as_str(), arguments.as_slice())),
            _ => None,
        })
    }
}

impl ActionSink for RecordingSink {
    fn action(&mut self, action: &str, arguments: Vec<(String, Value)>) {
        self.events.push(Event::Action {
            action: action.to_string(),
            arguments,
        });
    }

    fn refill(&mut self, refiller: &str, rows: Vec<Vec<(String, Value)>>) {
        self.events.push(Event::Refill {
            refiller: refiller.to_string(),
            rows,
        });
    }

    fn monitor(&mut self, metric: &str, _help: &str, labels: Vec<(String, String)>) {
        self.events.push(Event::Monitor {
            metric: metric.to_string(),
            labels,
        });
    }

    fn dump(&mut self, dumper: &str, row: Vec<Value>) {
        self.events.push(Event::Dump {
            dumper: dumper.to_string(),
            row,
        });
    }

    fn alert(&mut self, labels: Vec<(String, String)>, annotations: Vec<(String, String)>, ttl: i64) {
        self.events.push(Event::Alert {
            labels,
            annotations,
            ttl,
        });
    }
}
