//! Printing what a run does.

use std::collections::BTreeMap;
use std::io::{self, Write};

use olive_rt::json::to_json;
use olive_rt::{ActionSink, Value};
use olive_typeck::Type;
use serde_json::{json, Map as JsonMap, Value as Json};

/// Writes one line per event, as text or as JSON objects.
///
/// Argument values are converted with their declared parameter types where
/// the configuration names one; anything else is printed as text.
pub struct EventPrinter<W: Write> {
    out: W,
    json: bool,
    parameters: BTreeMap<String, BTreeMap<String, Type>>,
    events: usize,
    error: Option<io::Error>,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            parameters: BTreeMap::new(),
            events: 0,
            error: None,
        }
    }

    /// Declare the parameter types of an action or refiller.
    pub fn with_parameters(mut self, terminal: &str, types: BTreeMap<String, Type>) -> Self {
        self.parameters.insert(terminal.to_string(), types);
        self
    }

    pub fn events(&self) -> usize {
        self.events
    }

    /// The first write error, if any, and the writer.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn value(&self, terminal: &str, name: &str, value: &Value) -> Json {
        self.parameters
            .get(terminal)
            .and_then(|types| types.get(name))
            .and_then(|ty| to_json(value, ty).ok())
            .unwrap_or_else(|| Json::String(value.to_string()))
    }

    fn arguments(&self, terminal: &str, arguments: &[(String, Value)]) -> JsonMap<String, Json> {
        arguments
            .iter()
            .map(|(name, value)| (name.clone(), self.value(terminal, name, value)))
            .collect()
    }

    fn line(&mut self, text: String) {
        self.events += 1;
        if self.error.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.out, "{text}") {
            self.error = Some(e);
        }
    }
}

fn string_map(pairs: Vec<(String, String)>) -> JsonMap<String, Json> {
    pairs
        .into_iter()
        .map(|(name, value)| (name, Json::String(value)))
        .collect()
}

fn text_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(n, v)| format!("{n}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn text_arguments(arguments: &[(String, Value)]) -> String {
    arguments
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl<W: Write> ActionSink for EventPrinter<W> {
    fn action(&mut self, action: &str, arguments: Vec<(String, Value)>) {
        let line = if self.json {
            json!({"event": "action", "action": action, "arguments": self.arguments(action, &arguments)})
                .to_string()
        } else {
            format!("action {action} {}", text_arguments(&arguments))
        };
        self.line(line);
    }

    fn refill(&mut self, refiller: &str, rows: Vec<Vec<(String, Value)>>) {
        let line = if self.json {
            let rows: Vec<Json> = rows
                .iter()
                .map(|row| Json::Object(self.arguments(refiller, row)))
                .collect();
            json!({"event": "refill", "refiller": refiller, "rows": rows}).to_string()
        } else {
            let rows: Vec<String> = rows.iter().map(|row| format!("[{}]", text_arguments(row))).collect();
            format!("refill {refiller} {}", rows.join(" "))
        };
        self.line(line);
    }

    fn monitor(&mut self, metric: &str, help: &str, labels: Vec<(String, String)>) {
        let line = if self.json {
            json!({"event": "monitor", "metric": metric, "help": help, "labels": string_map(labels)})
                .to_string()
        } else {
            format!("monitor {metric} {}", text_pairs(&labels))
        };
        self.line(line);
    }

    fn dump(&mut self, dumper: &str, row: Vec<Value>) {
        let line = if self.json {
            let row: Vec<Json> = row.iter().map(|v| Json::String(v.to_string())).collect();
            json!({"event": "dump", "dumper": dumper, "row": row}).to_string()
        } else {
            let row: Vec<String> = row.iter().map(ToString::to_string).collect();
            format!("dump {dumper} {}", row.join("\t"))
        };
        self.line(line);
    }

    fn alert(&mut self, labels: Vec<(String, String)>, annotations: Vec<(String, String)>, ttl: i64) {
        let line = if self.json {
            json!({
                "event": "alert",
                "labels": string_map(labels),
                "annotations": string_map(annotations),
                "ttl": ttl,
            })
            .to_string()
        } else if annotations.is_empty() {
            format!("alert {} ttl={ttl}", text_pairs(&labels))
        } else {
            format!("alert {} | {} ttl={ttl}", text_pairs(&labels), text_pairs(&annotations))
        };
        self.line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit() -> Vec<(String, Value)> {
        vec![
            ("name".to_string(), Value::str("build")),
            ("size".to_string(), Value::Int(3)),
        ]
    }

    #[test]
    fn text_lines() {
        let mut printer = EventPrinter::new(Vec::new(), false);
        printer.action("submit", submit());
        printer.monitor("dropped", "", vec![("lane".to_string(), "2".to_string())]);
        printer.alert(
            vec![("alertname".to_string(), "Stuck".to_string())],
            vec![("summary".to_string(), "lane 2".to_string())],
            600,
        );
        assert_eq!(printer.events(), 3);
        let out = String::from_utf8(printer.finish().unwrap()).unwrap();
        insta::assert_snapshot!(out, @r#"
        action submit name="build" size=3
        monitor dropped lane=2
        alert alertname=Stuck | summary=lane 2 ttl=600
        "#);
    }

    #[test]
    fn json_uses_declared_types() {
        let types = BTreeMap::from([
            ("name".to_string(), Type::String),
            ("size".to_string(), Type::Integer),
        ]);
        let mut printer = EventPrinter::new(Vec::new(), true).with_parameters("submit", types);
        printer.action("submit", submit());
        let out = String::from_utf8(printer.finish().unwrap()).unwrap();
        let line: Json = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["arguments"]["name"], "build");
        assert_eq!(line["arguments"]["size"], 3);
    }

    #[test]
    fn json_alerts_keep_labels_apart_from_annotations() {
        let mut printer = EventPrinter::new(Vec::new(), true);
        printer.alert(
            vec![("alertname".to_string(), "Stuck".to_string())],
            vec![("summary".to_string(), "lane 2".to_string())],
            60,
        );
        let out = String::from_utf8(printer.finish().unwrap()).unwrap();
        let line: Json = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["event"], "alert");
        assert_eq!(line["labels"]["alertname"], "Stuck");
        assert_eq!(line["annotations"]["summary"], "lane 2");
        assert_eq!(line["ttl"], 60);
    }
}
