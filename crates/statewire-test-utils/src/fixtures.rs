use anyhow::Result;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestFixtures {
    temp_dir: TempDir,
}

impl TestFixtures {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    /// Write values as JSON lines, one per line
    pub fn create_json_lines(&self, name: &str, values: &[Value]) -> Result<PathBuf> {
        let path = self.temp_dir.path().join(name);
        let mut file = std::fs::File::create(&path)?;
        for value in values {
            serde_json::to_writer(&mut file, value)?;
            file.write_all(b"\n")?;
        }
        Ok(path)
    }

    pub fn create_test_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = self.temp_dir.path().join(name);
        std::fs::write(&file_path, content)?;
        Ok(file_path)
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

// Common test data
pub mod data {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::{json, Map, Value};

    /// A training-session style state at a given tick
    pub fn game_state(tick: u64) -> Value {
        json!({
            "tick": tick,
            "score": tick * 10,
            "level": 1 + tick / 5,
            "player": {"x": tick % 7, "y": 2, "lives": 3, "name": "p1"},
            "grid": vec![0; 64],
            "message": "Find the matching pattern",
            "settings": {"sound": true, "difficulty": "normal"}
        })
    }

    /// A sequence of game states where only a few fields change per tick
    pub fn game_session(ticks: u64) -> Vec<Value> {
        (0..ticks).map(game_state).collect()
    }

    /// A random nested snapshot; deterministic for a given seed
    pub fn random_snapshot(seed: u64) -> Value {
        let mut rng = StdRng::seed_from_u64(seed);
        Value::Object(random_map(&mut rng, 2))
    }

    /// Mutate a few fields of a snapshot, deterministically for a given seed
    pub fn mutate(snapshot: &Value, seed: u64) -> Value {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut next = snapshot.clone();
        if let Value::Object(map) = &mut next {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if !rng.gen_bool(0.3) {
                    continue;
                }
                if rng.gen_bool(0.2) {
                    map.remove(&key);
                } else {
                    map.insert(key, random_value(&mut rng, 1));
                }
            }
            if rng.gen_bool(0.5) {
                map.insert(format!("k{}", rng.gen_range(0..100)), random_value(&mut rng, 1));
            }
        }
        next
    }

    fn random_map(rng: &mut StdRng, depth: u32) -> Map<String, Value> {
        (0..rng.gen_range(1..8))
            .map(|i| (format!("k{i}"), random_value(rng, depth)))
            .collect()
    }

    fn random_value(rng: &mut StdRng, depth: u32) -> Value {
        match rng.gen_range(0..6) {
            0 => Value::from(rng.gen_range(-1000i64..1000)),
            1 => Value::from(format!("s{}", rng.gen_range(0..50))),
            2 => Value::from(rng.gen_bool(0.5)),
            3 => Value::Array(vec![Value::from(rng.gen_range(0..3)); rng.gen_range(0..10)]),
            4 if depth > 0 => Value::Object(random_map(rng, depth - 1)),
            _ => Value::from(rng.gen_range(0.0f64..1.0)),
        }
    }

    pub fn generate_text_lines(count: usize) -> String {
        (0..count)
            .map(|i| format!("Line {i}: The quick brown fox jumps over the lazy dog"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
