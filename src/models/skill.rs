use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

lazy_static! {
    /// Built-in display names for the skill ids the meter recognises out of
    /// the box. `tables/skill_names.json` overrides and extends this set.
    static ref BUILTIN_SKILL_NAMES: HashMap<u32, &'static str> = {
        let mut m = HashMap::new();
        m.insert(1241, "Frost Ray");
        m.insert(2306, "Discord Note");
        m.insert(2307, "Concerto Chord");
        m.insert(20301, "Mending Bloom");
        m.insert(1518, "Judgment Strike");
        m.insert(120901, "Ice Spear");
        m.insert(1714, "Quickdraw Slash");
        m.insert(44701, "Crescent Edge");
        m.insert(220112, "Hawkeye Shot");
        m.insert(2292, "Pack Arrow");
        m.insert(1419, "Sky Barrage");
        m.insert(1405, "Siege Round");
        m.insert(2405, "Bulwark Slam");
        m.insert(2406, "Radiant Guard");
        m
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInfo {
    pub id: u32,
    pub name: String,
}

/// Skill-id → display-name table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct SkillConfig {
    skills: HashMap<u32, SkillInfo>,
}

impl SkillConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Falls back to the built-in table, then to the raw id.
    pub fn skill_name(&self, skill_id: u32) -> String {
        if let Some(info) = self.skills.get(&skill_id) {
            return info.name.clone();
        }
        BUILTIN_SKILL_NAMES
            .get(&skill_id)
            .map(|s| s.to_string())
            .unwrap_or_else(|| skill_id.to_string())
    }

    pub fn add_skill(&mut self, skill_id: u32, name: String) {
        self.skills.insert(skill_id, SkillInfo { id: skill_id, name });
    }

    /// Expects `{"skill_names": {"<id>": "<name>", ...}}`.
    pub fn load_from_json(&mut self, json_data: &str) -> Result<(), serde_json::Error> {
        let data: serde_json::Value = serde_json::from_str(json_data)?;
        if let Some(names) = data.get("skill_names").and_then(|v| v.as_object()) {
            for (key, value) in names {
                if let (Ok(skill_id), Some(name)) = (key.parse::<u32>(), value.as_str()) {
                    self.add_skill(skill_id, name.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

/// Certain skills only exist on one weapon specialisation, so seeing them
/// pins down the player's sub-profession. The label carries a leading dash
/// and is appended to the primary profession for display.
pub fn sub_profession_by_skill_id(skill_id: u32) -> Option<&'static str> {
    match skill_id {
        1241 => Some("-Frostbeam"),
        2307 | 2361 | 55302 => Some("-Concerto"),
        20301 => Some("-Mend"),
        1518 | 1541 | 21402 => Some("-Smite"),
        2306 => Some("-Dissonance"),
        120901 | 120902 => Some("-Icicle"),
        1714 | 1734 => Some("-Iaido"),
        44701 | 179906 => Some("-Moonblade"),
        220112 | 2203622 => Some("-Falconry"),
        2292 | 1700820 | 1700825 | 1700827 => Some("-Wolfpack"),
        1419 => Some("-Skyshot"),
        1405 | 1418 => Some("-Bastion"),
        2405 => Some("-Vanguard"),
        2406 => Some("-Lightshield"),
        199902 => Some("-Earthshield"),
        1930 | 1931 | 1934 | 1935 => Some("-Block"),
        _ => None,
    }
}

pub fn profession_name_from_id(profession_id: u32) -> Option<&'static str> {
    match profession_id {
        1 => Some("Stormblade"),
        2 => Some("Frost Mage"),
        3 => Some("Ember Waraxe"),
        4 => Some("Gale Knight"),
        5 => Some("Verdant Oracle"),
        8 => Some("Thunder Cannoneer"),
        9 => Some("Greatblade Warden"),
        10 => Some("Spirit Bladedancer"),
        11 => Some("Marksman"),
        12 => Some("Aegis Knight"),
        13 => Some("Soul Musician"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_table_overrides_builtin() {
        let mut config = SkillConfig::new();
        assert_eq!(config.skill_name(1241), "Frost Ray");

        config
            .load_from_json(r#"{"skill_names": {"1241": "Custom Ray", "9999": "Mystery"}}"#)
            .unwrap();
        assert_eq!(config.skill_name(1241), "Custom Ray");
        assert_eq!(config.skill_name(9999), "Mystery");
    }

    #[test]
    fn unknown_skill_names_fall_back_to_id() {
        let config = SkillConfig::new();
        assert_eq!(config.skill_name(424242), "424242");
    }

    #[test]
    fn frost_ray_implies_frostbeam() {
        assert_eq!(sub_profession_by_skill_id(1241), Some("-Frostbeam"));
        assert_eq!(sub_profession_by_skill_id(55302), Some("-Concerto"));
        assert_eq!(sub_profession_by_skill_id(1), None);
    }
}
