use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct LinkConditions {
    /// Message loss probability (0.0 to 1.0)
    pub loss: f64,
    /// Duplicate message probability (0.0 to 1.0)
    pub duplicate_probability: f64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            loss: 0.0,
            duplicate_probability: 0.0,
        }
    }
}

impl LinkConditions {
    /// Perfect link
    pub fn perfect() -> Self {
        Self::default()
    }

    /// Typical mobile network (3G/4G)
    pub fn mobile() -> Self {
        Self {
            loss: 0.02,
            duplicate_probability: 0.001,
        }
    }

    /// Poor link conditions
    pub fn poor() -> Self {
        Self {
            loss: 0.10,
            duplicate_probability: 0.02,
        }
    }
}

/// Deterministic in-memory link that drops and duplicates messages
pub struct LossyLink {
    conditions: LinkConditions,
    rng: StdRng,
    sent: u64,
    dropped: u64,
    duplicated: u64,
}

impl LossyLink {
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            conditions,
            rng: StdRng::seed_from_u64(seed),
            sent: 0,
            dropped: 0,
            duplicated: 0,
        }
    }

    /// Messages delivered for one send: none, one, or a duplicate pair
    pub fn transmit<T: Clone>(&mut self, message: T) -> Vec<T> {
        self.sent += 1;
        if self.rng.gen_bool(self.conditions.loss) {
            self.dropped += 1;
            return Vec::new();
        }
        if self.rng.gen_bool(self.conditions.duplicate_probability) {
            self.duplicated += 1;
            return vec![message.clone(), message];
        }
        vec![message]
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn duplicated(&self) -> u64 {
        self.duplicated
    }
}
