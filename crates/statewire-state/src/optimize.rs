//! Structural message optimization
//!
//! Codec-independent shrinking applied to a snapshot before serialization:
//! null entries are dropped from mappings, and long sequences with repeated
//! runs are run-length encoded into `{"_rle": true, "data": [...]}`.
//!
//! Dropped nulls are not restored by [`MessageOptimizer::deoptimize`]; a
//! null value means "absent" for anything passed through the optimizer.
//! Mappings shaped exactly like the RLE marker are reserved.

use crate::config::SyncConfig;
use crate::StateError;
use serde_json::{Map, Value};

/// Key marking a run-length encoded sequence
pub const RLE_MARKER: &str = "_rle";
/// Key holding the encoded elements
pub const RLE_DATA: &str = "data";

/// Null elision plus run-length encoding of repetitive sequences
#[derive(Debug, Clone)]
pub struct MessageOptimizer {
    min_length: usize,
    min_run: usize,
    max_ratio: f64,
    max_expanded: usize,
}

impl Default for MessageOptimizer {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

impl MessageOptimizer {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            min_length: config.rle_min_length,
            min_run: config.rle_min_run.max(2),
            max_ratio: config.rle_max_ratio,
            max_expanded: config.max_rle_elements,
        }
    }

    /// Shrink a value for transmission
    pub fn optimize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.optimize_map(map)),
            Value::Array(items) => self.optimize_sequence(items),
            scalar => scalar.clone(),
        }
    }

    fn optimize_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), self.optimize(value)))
            .collect()
    }

    fn optimize_sequence(&self, items: &[Value]) -> Value {
        if items.len() > self.min_length {
            let encoded = self.run_length_encode(items);
            if encoded.len() as f64 <= items.len() as f64 * self.max_ratio {
                let mut marker = Map::new();
                marker.insert(RLE_MARKER.to_string(), Value::Bool(true));
                marker.insert(RLE_DATA.to_string(), Value::Array(encoded));
                return Value::Object(marker);
            }
        }
        Value::Array(items.iter().map(|item| self.optimize(item)).collect())
    }

    /// Collapse runs of at least `min_run` equal elements into `[count, value]`.
    ///
    /// A lone element that is itself a two-element sequence is written as
    /// `[1, value]` so decoding cannot mistake it for a run.
    fn run_length_encode(&self, items: &[Value]) -> Vec<Value> {
        let mut encoded = Vec::new();
        let mut index = 0;

        while index < items.len() {
            let current = &items[index];
            let run = items[index..]
                .iter()
                .take_while(|item| *item == current)
                .count();

            let optimized = self.optimize(current);
            if run >= self.min_run {
                encoded.push(run_pair(run, optimized));
            } else if is_pair(current) {
                encoded.extend((0..run).map(|_| run_pair(1, optimized.clone())));
            } else {
                encoded.extend(std::iter::repeat(optimized).take(run));
            }
            index += run;
        }

        encoded
    }

    /// Undo [`MessageOptimizer::optimize`], except for dropped nulls.
    ///
    /// Run counts come from the wire: once the runs would materialize more
    /// than `max_rle_elements` extra values the call fails with
    /// [`StateError::LimitExceeded`].
    pub fn deoptimize(&self, value: &Value) -> Result<Value, StateError> {
        let mut budget = ExpansionBudget {
            used: 0,
            limit: self.max_expanded,
        };
        self.expand(value, &mut budget)
    }

    fn expand(&self, value: &Value, budget: &mut ExpansionBudget) -> Result<Value, StateError> {
        Ok(match value {
            Value::Object(map) => match rle_data(map) {
                Some(encoded) => Value::Array(self.run_length_decode(encoded, budget)?),
                None => Value::Object(
                    map.iter()
                        .map(|(key, value)| Ok((key.clone(), self.expand(value, budget)?)))
                        .collect::<Result<Map<String, Value>, StateError>>()?,
                ),
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.expand(item, budget))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            scalar => scalar.clone(),
        })
    }

    fn run_length_decode(
        &self,
        encoded: &[Value],
        budget: &mut ExpansionBudget,
    ) -> Result<Vec<Value>, StateError> {
        let mut decoded = Vec::with_capacity(encoded.len());

        for item in encoded {
            match as_run(item) {
                Some((count, value)) => {
                    let value = self.expand(value, budget)?;
                    budget.charge(node_count(&value).saturating_mul(count.saturating_sub(1)))?;
                    decoded.extend(std::iter::repeat(value).take(count));
                }
                None => decoded.push(self.expand(item, budget)?),
            }
        }

        Ok(decoded)
    }
}

/// Values materialized by run expansion beyond what the wire carried
struct ExpansionBudget {
    used: usize,
    limit: usize,
}

impl ExpansionBudget {
    fn charge(&mut self, values: usize) -> Result<(), StateError> {
        let used = self.used.saturating_add(values);
        if used > self.limit {
            return Err(StateError::LimitExceeded {
                what: "expanded RLE values",
                size: used,
                limit: self.limit,
            });
        }
        self.used = used;
        Ok(())
    }
}

fn node_count(value: &Value) -> usize {
    1 + match value {
        Value::Array(items) => items.iter().map(node_count).sum(),
        Value::Object(map) => map.values().map(node_count).sum(),
        _ => 0,
    }
}

fn run_pair(count: usize, value: Value) -> Value {
    Value::Array(vec![Value::from(count), value])
}

fn is_pair(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.len() == 2)
}

fn as_run(value: &Value) -> Option<(usize, &Value)> {
    match value {
        Value::Array(items) if items.len() == 2 => {
            let count = usize::try_from(items[0].as_u64()?).ok()?;
            Some((count, &items[1]))
        }
        _ => None,
    }
}

fn rle_data(map: &Map<String, Value>) -> Option<&[Value]> {
    if map.len() != 2 || map.get(RLE_MARKER) != Some(&Value::Bool(true)) {
        return None;
    }
    map.get(RLE_DATA)?.as_array().map(Vec::as_slice)
}
