//! Stage-by-stage execution of a [`PipelinePlan`].
//!
//! Records move through the stages as a batch: each stage consumes the
//! whole output of the previous one. Grouping stages keep their groups in
//! first-seen order, so the same input always produces the same events in
//! the same order regardless of which backend generated the closures.

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span, trace};

use crate::collect::{settle, Accumulator};
use crate::collections::dict_rows;
use crate::compare::{call_comparator, call_hasher};
use crate::error::RuntimeError;
use crate::io::{ActionSink, InputProvider};
use crate::plan::{CollectorPlan, HandlerPlan, PipelinePlan, Slot, StagePlan, TerminalPlan};
use crate::value::Value;

/// What one olive did during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub input: usize,
    pub output: usize,
}

/// Run one olive over its input, given the closures its setup function
/// built.
pub fn execute(
    plan: &PipelinePlan,
    closures: &[Value],
    input: &dyn InputProvider,
    sink: &mut dyn ActionSink,
) -> Result<RunStats, RuntimeError> {
    let _span = debug_span!("olive", format = %plan.format, description = ?plan.description).entered();
    if closures.len() != plan.closures {
        return Err(RuntimeError::malformed(format!(
            "setup built {} closures, the plan needs {}",
            closures.len(),
            plan.closures
        )));
    }
    let mut executor = Executor {
        closures,
        input,
        sink,
    };
    let mut records = input.records(&plan.format)?;
    let stats_input = records.len();
    for stage in &plan.stages {
        let before = records.len();
        records = executor.stage(stage, records)?;
        trace!(stage = stage.name(), before, after = records.len(), "stage");
    }
    let output = records.len();
    executor.terminal(&plan.terminal, records)?;
    debug!(input = stats_input, output, "olive finished");
    Ok(RunStats {
        input: stats_input,
        output,
    })
}

struct Executor<'a> {
    closures: &'a [Value],
    input: &'a dyn InputProvider,
    sink: &'a mut dyn ActionSink,
}

/// Keys seen so far, bucketed by hash and told apart by an equality
/// closure.
struct Buckets<'a> {
    equality: &'a Value,
    hasher: &'a Value,
    index: FxHashMap<i64, Vec<usize>>,
    keys: Vec<Value>,
}

impl<'a> Buckets<'a> {
    fn new(equality: &'a Value, hasher: &'a Value) -> Self {
        Self {
            equality,
            hasher,
            index: FxHashMap::default(),
            keys: Vec::new(),
        }
    }

    fn find(&self, key: &Value) -> Result<Option<usize>, RuntimeError> {
        let hash = call_hasher(self.hasher, key)?;
        self.find_hashed(hash, key)
    }

    fn find_hashed(&self, hash: i64, key: &Value) -> Result<Option<usize>, RuntimeError> {
        if let Some(candidates) = self.index.get(&hash) {
            for &candidate in candidates {
                let same = self
                    .equality
                    .call(&[self.keys[candidate].clone(), key.clone()])?
                    .as_bool()?;
                if same {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// The bucket of `key`, created if new.
    fn insert(&mut self, key: Value) -> Result<usize, RuntimeError> {
        let hash = call_hasher(self.hasher, &key)?;
        if let Some(existing) = self.find_hashed(hash, &key)? {
            return Ok(existing);
        }
        let id = self.keys.len();
        self.keys.push(key);
        self.index.entry(hash).or_default().push(id);
        Ok(id)
    }
}

fn extend(record: &Value, extra: impl IntoIterator<Item = Value>) -> Result<Value, RuntimeError> {
    let mut fields = record.as_tuple()?.to_vec();
    fields.extend(extra);
    Ok(Value::tuple(fields))
}

fn elements(source: Value) -> Result<Vec<Value>, RuntimeError> {
    match source {
        Value::Map(entries) => Ok(dict_rows(&entries)),
        other => Ok(other.as_list()?.to_vec()),
    }
}

impl<'a> Executor<'a> {
    fn slot(&self, slot: Slot) -> Result<&'a Value, RuntimeError> {
        self.closures
            .get(slot)
            .ok_or_else(|| RuntimeError::malformed(format!("no closure in slot {slot}")))
    }

    fn call(&self, slot: Slot, record: &Value) -> Result<Value, RuntimeError> {
        self.slot(slot)?.call(std::slice::from_ref(record))
    }

    fn test(&self, slot: Slot, record: &Value) -> Result<bool, RuntimeError> {
        self.call(slot, record)?.as_bool()
    }

    fn stage(&mut self, stage: &StagePlan, records: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let mut out = Vec::with_capacity(records.len());
        match stage {
            StagePlan::Where { condition } => {
                for record in records {
                    if self.test(*condition, &record)? {
                        out.push(record);
                    }
                }
            }
            StagePlan::Let { extend: slot } => {
                for record in records {
                    let extra = self.call(*slot, &record)?;
                    out.push(extend(&record, extra.as_tuple()?.iter().cloned())?);
                }
            }
            StagePlan::Require { value, handlers } => {
                for record in records {
                    match self.call(*value, &record)? {
                        Value::Optional(Some(v)) => out.push(extend(&record, [*v])?),
                        Value::Optional(None) => self.reject(handlers, &record)?,
                        other => {
                            return Err(RuntimeError::WrongValue {
                                expected: "optional",
                                found: other.kind(),
                            })
                        }
                    }
                }
            }
            StagePlan::Reject {
                condition,
                handlers,
            } => {
                for record in records {
                    if self.test(*condition, &record)? {
                        self.reject(handlers, &record)?;
                    } else {
                        out.push(record);
                    }
                }
            }
            StagePlan::Flatten { source, extract } => {
                for record in records {
                    for element in elements(self.call(*source, &record)?)? {
                        let row = match extract {
                            None => extend(&record, [element])?,
                            Some(indices) => {
                                let fields = indices
                                    .iter()
                                    .map(|&i| element.get(i).cloned())
                                    .collect::<Result<Vec<_>, _>>()?;
                                extend(&record, fields)?
                            }
                        };
                        out.push(row);
                    }
                }
            }
            StagePlan::Group {
                key,
                equality,
                hasher,
                collectors,
            } => {
                let mut buckets = Buckets::new(self.slot(*equality)?, self.slot(*hasher)?);
                let mut members: Vec<Vec<Value>> = Vec::new();
                for record in records {
                    let id = buckets.insert(self.call(*key, &record)?)?;
                    if id == members.len() {
                        members.push(Vec::new());
                    }
                    members[id].push(record);
                }
                for (key, members) in buckets.keys.iter().zip(&members) {
                    if let Some(collected) = self.collect_all(collectors, members, key)? {
                        out.push(extend(key, collected)?);
                    }
                }
            }
            StagePlan::Join {
                format,
                outer_key,
                inner_key,
                equality,
                hasher,
            } => {
                let (buckets, inner) = self.index_inner(format, *inner_key, *equality, *hasher)?;
                for record in records {
                    let key = self.call(*outer_key, &record)?;
                    if let Some(id) = buckets.find(&key)? {
                        for row in &inner[id] {
                            out.push(extend(&record, row.as_tuple()?.iter().cloned())?);
                        }
                    }
                }
            }
            StagePlan::LeftJoin {
                format,
                outer_key,
                inner_key,
                equality,
                hasher,
                collectors,
            } => {
                let (buckets, inner) = self.index_inner(format, *inner_key, *equality, *hasher)?;
                for record in records {
                    let key = self.call(*outer_key, &record)?;
                    let joined = match buckets.find(&key)? {
                        Some(id) => inner[id]
                            .iter()
                            .map(|row| extend(&record, row.as_tuple()?.iter().cloned()))
                            .collect::<Result<Vec<_>, _>>()?,
                        None => Vec::new(),
                    };
                    if let Some(collected) = self.collect_all(collectors, &joined, &record)? {
                        out.push(extend(&record, collected)?);
                    }
                }
            }
            StagePlan::Pick {
                max,
                key,
                equality,
                hasher,
                score,
                comparator,
            } => {
                let comparator = self.slot(*comparator)?;
                let mut buckets = Buckets::new(self.slot(*equality)?, self.slot(*hasher)?);
                let mut best: Vec<(Value, Value)> = Vec::new();
                for record in records {
                    let id = buckets.insert(self.call(*key, &record)?)?;
                    let s = self.call(*score, &record)?;
                    if id == best.len() {
                        best.push((s, record));
                        continue;
                    }
                    let c = call_comparator(comparator, &s, &best[id].0)?;
                    if (*max && c > 0) || (!*max && c < 0) {
                        best[id] = (s, record);
                    }
                }
                out.extend(best.into_iter().map(|(_, record)| record));
            }
            StagePlan::Monitor {
                metric,
                help,
                labels,
                values,
            } => {
                for record in records {
                    self.monitor(metric, help, labels, *values, &record)?;
                    out.push(record);
                }
            }
            StagePlan::Dump { dumper, columns } => {
                for record in records {
                    let row = self.call(*columns, &record)?.as_tuple()?.to_vec();
                    self.sink.dump(dumper, row);
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    fn index_inner(
        &self,
        format: &str,
        inner_key: Slot,
        equality: Slot,
        hasher: Slot,
    ) -> Result<(Buckets<'a>, Vec<Vec<Value>>), RuntimeError> {
        let mut buckets = Buckets::new(self.slot(equality)?, self.slot(hasher)?);
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for record in self.input.records(format)? {
            let id = buckets.insert(self.call(inner_key, &record)?)?;
            if id == rows.len() {
                rows.push(Vec::new());
            }
            rows[id].push(record);
        }
        Ok((buckets, rows))
    }

    /// Collect every collector over `records`; `None` when one of them
    /// leaves the result unusable.
    fn collect_all(
        &self,
        collectors: &[CollectorPlan],
        records: &[Value],
        outer: &Value,
    ) -> Result<Option<Vec<Value>>, RuntimeError> {
        let mut out = Vec::with_capacity(collectors.len());
        for collector in collectors {
            match self.collect(collector, records, outer)? {
                Some(v) => out.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    fn collect(
        &self,
        collector: &CollectorPlan,
        records: &[Value],
        outer: &Value,
    ) -> Result<Option<Value>, RuntimeError> {
        let comparator = collector.comparator.map(|s| self.slot(s)).transpose()?;
        let mut accumulator = Accumulator::new(collector.spec);
        'records: for record in records {
            for filter in &collector.filters {
                if !self.test(*filter, record)? {
                    continue 'records;
                }
            }
            let value = match collector.value {
                Some(slot) => self.call(slot, record)?,
                None => Value::Unit,
            };
            accumulator.push(value, comparator)?;
        }
        let delimiter = match collector.delimiter {
            Some(slot) => Some(self.call(slot, outer)?.as_str()?.to_string()),
            None => None,
        };
        let result = accumulator.finish(comparator, delimiter.as_deref())?;
        settle(collector.spec, result, || {
            collector.default.map(|slot| self.call(slot, outer)).transpose()
        })
    }

    fn monitor(
        &mut self,
        metric: &str,
        help: &str,
        labels: &[String],
        values: Slot,
        record: &Value,
    ) -> Result<(), RuntimeError> {
        let values = self.call(values, record)?;
        let labels = labels
            .iter()
            .zip(values.as_tuple()?)
            .map(|(name, v)| Ok((name.clone(), v.as_str()?.to_string())))
            .collect::<Result<Vec<_>, RuntimeError>>()?;
        self.sink.monitor(metric, help, labels);
        Ok(())
    }

    fn reject(&mut self, handlers: &[HandlerPlan], record: &Value) -> Result<(), RuntimeError> {
        for handler in handlers {
            match handler {
                HandlerPlan::Monitor {
                    metric,
                    help,
                    labels,
                    values,
                } => self.monitor(metric, help, labels, *values, record)?,
                HandlerPlan::Dump { dumper, columns } => {
                    let row = self.call(*columns, record)?.as_tuple()?.to_vec();
                    self.sink.dump(dumper, row);
                }
            }
        }
        Ok(())
    }

    fn terminal(&mut self, terminal: &TerminalPlan, records: Vec<Value>) -> Result<(), RuntimeError> {
        let named = |names: &[String], values: Value| -> Result<Vec<(String, Value)>, RuntimeError> {
            Ok(names
                .iter()
                .cloned()
                .zip(values.as_tuple()?.iter().cloned())
                .collect())
        };
        match terminal {
            TerminalPlan::Run {
                action,
                names,
                arguments,
            } => {
                for record in records {
                    let arguments = named(names, self.call(*arguments, &record)?)?;
                    self.sink.action(action, arguments);
                }
            }
            TerminalPlan::Refill {
                refiller,
                names,
                arguments,
            } => {
                let rows = records
                    .iter()
                    .map(|record| named(names, self.call(*arguments, record)?))
                    .collect::<Result<Vec<_>, _>>()?;
                self.sink.refill(refiller, rows);
            }
            TerminalPlan::Alert {
                labels,
                annotations,
                arguments,
            } => {
                let text = |names: &[String], values: &[Value]| -> Result<Vec<(String, String)>, RuntimeError> {
                    names
                        .iter()
                        .zip(values)
                        .map(|(name, value)| Ok((name.clone(), value.as_str()?.to_string())))
                        .collect()
                };
                for record in records {
                    let values = self.call(*arguments, &record)?;
                    let values = values.as_tuple()?;
                    let (label_values, rest) = values.split_at(labels.len().min(values.len()));
                    let ttl = rest
                        .get(annotations.len())
                        .ok_or(RuntimeError::Index {
                            index: labels.len() + annotations.len(),
                            len: values.len(),
                        })?
                        .as_int()?;
                    let labels = text(labels, label_values)?;
                    let annotations = text(annotations, rest)?;
                    self.sink.alert(labels, annotations, ttl);
                }
            }
        }
        Ok(())
    }
}
