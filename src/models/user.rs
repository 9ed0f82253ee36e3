use super::skill::SkillConfig;
use super::statistic::{StatKind, StatisticData};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Healing skills share the id space with damage skills; the JSON key offset
/// keeps both kinds distinct inside one skill map.
const HEALING_SKILL_KEY_OFFSET: u64 = 1_000_000_000;

/// Everything the meter knows about one observed player.
#[derive(Debug, Clone)]
pub struct UserData {
    pub uid: u32,
    pub name: String,
    pub profession: String,
    pub sub_profession: String,
    pub fight_point: u64,
    pub taken_damage: u64,
    pub dead_count: u32,
    /// Open attribute map; `hp` and `max_hp` are the well-known keys.
    pub attrs: HashMap<String, u64>,
    pub damage: StatisticData,
    pub healing: StatisticData,
    skills: HashMap<(StatKind, u32), StatisticData>,
}

impl UserData {
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            name: String::new(),
            profession: "Unknown".to_string(),
            sub_profession: String::new(),
            fight_point: 0,
            taken_damage: 0,
            dead_count: 0,
            attrs: HashMap::new(),
            damage: StatisticData::new(StatKind::Damage),
            healing: StatisticData::new(StatKind::Healing),
            skills: HashMap::new(),
        }
    }

    pub fn add_damage_at(
        &mut self,
        now: i64,
        skill_id: u32,
        element: &str,
        damage: u64,
        is_crit: bool,
        is_lucky: bool,
        is_cause_lucky: bool,
        hp_lessen: u64,
    ) {
        self.damage.add_record_at(now, damage, is_crit, is_lucky, hp_lessen);

        let skill = self.skill_entry(StatKind::Damage, skill_id, element);
        // the per-skill lucky flag is the skill-caused one
        skill.add_record_at(now, damage, is_crit, is_cause_lucky, hp_lessen);
        skill.clear_window();
    }

    pub fn add_healing_at(
        &mut self,
        now: i64,
        skill_id: u32,
        element: &str,
        healing: u64,
        is_crit: bool,
        is_lucky: bool,
        is_cause_lucky: bool,
    ) {
        self.healing.add_record_at(now, healing, is_crit, is_lucky, 0);

        let skill = self.skill_entry(StatKind::Healing, skill_id, element);
        skill.add_record_at(now, healing, is_crit, is_cause_lucky, 0);
        skill.clear_window();
    }

    fn skill_entry(&mut self, kind: StatKind, skill_id: u32, element: &str) -> &mut StatisticData {
        let entry = self
            .skills
            .entry((kind, skill_id))
            .or_insert_with(|| StatisticData::new(kind));
        if entry.element.is_empty() && !element.is_empty() {
            entry.element = element.to_string();
        }
        entry
    }

    pub fn add_taken_damage(&mut self, damage: u64, is_dead: bool) {
        self.taken_damage += damage;
        if is_dead {
            self.dead_count += 1;
        }
    }

    pub fn update_realtime_at(&mut self, now: i64) {
        self.damage.update_realtime_at(now);
        self.healing.update_realtime_at(now);
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// A profession change invalidates whatever specialisation was inferred
    /// under the old one.
    pub fn set_profession(&mut self, profession: String) {
        if profession != self.profession {
            self.sub_profession.clear();
        }
        self.profession = profession;
    }

    pub fn set_sub_profession(&mut self, sub_profession: &str) {
        self.sub_profession = sub_profession.to_string();
    }

    pub fn set_fight_point(&mut self, fight_point: u64) {
        self.fight_point = fight_point;
    }

    pub fn set_attr(&mut self, key: &str, value: u64) {
        self.attrs.insert(key.to_string(), value);
    }

    pub fn attr(&self, key: &str) -> u64 {
        self.attrs.get(key).copied().unwrap_or(0)
    }

    pub fn display_profession(&self) -> String {
        format!("{}{}", self.profession, self.sub_profession)
    }

    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }

    pub fn skills(&self) -> impl Iterator<Item = (&(StatKind, u32), &StatisticData)> {
        self.skills.iter()
    }

    /// The `/api/data` user section entry.
    pub fn summary_json(&self) -> Value {
        json!({
            "name": self.name,
            "profession": self.display_profession(),
            "realtime_dps": self.damage.realtime_value,
            "realtime_dps_max": self.damage.realtime_max,
            "total_dps": self.damage.total_per_second(),
            "total_damage": {
                "normal": self.damage.totals.normal,
                "critical": self.damage.totals.critical,
                "lucky": self.damage.totals.lucky,
                "crit_lucky": self.damage.totals.crit_lucky,
                "hpLessen": self.damage.totals.hp_lessen,
                "total": self.damage.totals.total,
            },
            "total_count": {
                "normal": self.damage.counts.normal,
                "critical": self.damage.counts.critical,
                "lucky": self.damage.counts.lucky,
                "total": self.damage.counts.total,
            },
            "realtime_hps": self.healing.realtime_value,
            "realtime_hps_max": self.healing.realtime_max,
            "total_hps": self.healing.total_per_second(),
            "total_healing": {
                "normal": self.healing.totals.normal,
                "critical": self.healing.totals.critical,
                "lucky": self.healing.totals.lucky,
                "crit_lucky": self.healing.totals.crit_lucky,
                "total": self.healing.totals.total,
            },
            "taken_damage": self.taken_damage,
            "fight_point": self.fight_point,
            "hp": self.attr("hp"),
            "max_hp": self.attr("max_hp"),
            "dead_count": self.dead_count,
        })
    }

    /// The `/api/skill/:uid` detail map: JSON key is the skill id, with
    /// healing skills shifted by [`HEALING_SKILL_KEY_OFFSET`].
    pub fn skills_json(&self, skill_config: &SkillConfig) -> Value {
        let mut map = serde_json::Map::new();
        for (&(kind, skill_id), stat) in &self.skills {
            let key = match kind {
                StatKind::Damage => skill_id.to_string(),
                StatKind::Healing => (skill_id as u64 + HEALING_SKILL_KEY_OFFSET).to_string(),
            };
            map.insert(
                key,
                json!({
                    "displayName": skill_config.skill_name(skill_id),
                    "type": match kind {
                        StatKind::Damage => "damage",
                        StatKind::Healing => "healing",
                    },
                    "element": stat.element,
                    "total_damage": {
                        "normal": stat.totals.normal,
                        "critical": stat.totals.critical,
                        "lucky": stat.totals.lucky,
                        "crit_lucky": stat.totals.crit_lucky,
                        "hpLessen": stat.totals.hp_lessen,
                        "total": stat.totals.total,
                    },
                    "total_count": {
                        "normal": stat.counts.normal,
                        "critical": stat.counts.critical,
                        "lucky": stat.counts.lucky,
                        "total": stat.counts.total,
                    },
                    "crit_rate": stat.crit_rate(),
                    "lucky_rate": stat.lucky_rate(),
                }),
            );
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_totals_sum_to_top_level() {
        let mut user = UserData::new(1);
        user.add_damage_at(0, 1241, "ice", 1000, false, false, false, 1000);
        user.add_damage_at(10, 1241, "ice", 500, true, false, false, 400);
        user.add_damage_at(20, 2306, "fire", 250, false, true, true, 250);

        let skill_sum: u64 = user
            .skills()
            .filter(|((kind, _), _)| *kind == StatKind::Damage)
            .map(|(_, s)| s.totals.total)
            .sum();
        assert_eq!(skill_sum, user.damage.totals.total);
    }

    #[test]
    fn skill_windows_never_accumulate() {
        let mut user = UserData::new(1);
        user.add_damage_at(0, 1241, "ice", 1000, false, false, false, 0);
        for (_, stat) in user.skills() {
            assert_eq!(stat.window_len(), 0);
        }
        assert_eq!(user.damage.window_len(), 1);
    }

    #[test]
    fn profession_change_clears_sub_profession() {
        let mut user = UserData::new(1);
        user.set_sub_profession("-Frostbeam");
        user.set_profession("Frost Mage".to_string());
        assert_eq!(user.sub_profession, "");

        user.set_sub_profession("-Icicle");
        user.set_profession("Frost Mage".to_string());
        // unchanged profession keeps the inferred label
        assert_eq!(user.sub_profession, "-Icicle");
    }

    #[test]
    fn healing_skills_get_offset_keys() {
        let mut user = UserData::new(1);
        user.add_damage_at(0, 20301, "wood", 100, false, false, false, 0);
        user.add_healing_at(0, 20301, "wood", 200, false, false, false);

        let skills = user.skills_json(&SkillConfig::new());
        let obj = skills.as_object().unwrap();
        assert!(obj.contains_key("20301"));
        assert!(obj.contains_key("1000020301"));
    }

    #[test]
    fn taken_damage_tracks_deaths() {
        let mut user = UserData::new(1);
        user.add_taken_damage(100, false);
        user.add_taken_damage(900, true);
        assert_eq!(user.taken_damage, 1000);
        assert_eq!(user.dead_count, 1);
    }

    #[test]
    fn summary_shape_matches_wire_format() {
        let mut user = UserData::new(114514);
        user.add_damage_at(0, 1241, "ice", 1000, false, false, false, 1000);
        let summary = user.summary_json();
        assert_eq!(summary["total_damage"]["total"], 1000);
        assert_eq!(summary["total_damage"]["hpLessen"], 1000);
        assert_eq!(summary["total_count"]["total"], 1);
        assert_eq!(summary["profession"], "Unknown");
    }
}
