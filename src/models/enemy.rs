use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One entry in the volatile enemy cache. Cleared whenever the scene server
/// endpoint changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enemy {
    pub name: String,
    pub hp: u64,
    pub max_hp: u64,
}

impl Enemy {
    pub fn new(id: u32) -> Self {
        Self {
            name: format!("Enemy_{}", id),
            hp: 0,
            max_hp: 0,
        }
    }

    pub fn summary_json(&self) -> Value {
        json!({
            "name": self.name,
            "hp": self.hp,
            "max_hp": self.max_hp,
        })
    }
}
