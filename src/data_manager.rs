use crate::config::GlobalSettings;
use crate::models::*;
use crate::{now_ms, Result, VERSION};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// The training-dummy uid the elite-dummy filter keys on.
pub const ELITE_DUMMY_UID: u32 = 75;

/// Idle time after which `auto_clear_on_timeout` wipes the session.
const TIMEOUT_CLEAR_MS: i64 = 15_000;

/// Identity-cache writes are debounced by this much.
const CACHE_SAVE_DEBOUNCE_MS: u64 = 2_000;

/// Persistent identity-cache entry, keyed by uid string in `users.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(rename = "fightPoint", skip_serializing_if = "Option::is_none")]
    pub fight_point: Option<u64>,
    #[serde(rename = "maxHp", skip_serializing_if = "Option::is_none")]
    pub max_hp: Option<u64>,
}

/// Process-wide statistics engine. Owns every `UserData`, the enemy cache,
/// the persistent identity cache and the session clock; readers only ever
/// get by-value JSON snapshots.
pub struct DataManager {
    pub users: DashMap<u32, Arc<RwLock<UserData>>>,
    pub enemies: DashMap<u32, Arc<RwLock<Enemy>>>,
    pub skill_config: RwLock<SkillConfig>,
    pub settings: RwLock<GlobalSettings>,
    user_cache: RwLock<HashMap<String, CachedIdentity>>,
    hp_cache: DashMap<u32, u64>,
    start_time: RwLock<i64>,
    last_log_time: RwLock<i64>,
    last_auto_save_time: RwLock<i64>,
    paused: RwLock<bool>,
    cache_dirty: Notify,
    log_file_lock: Mutex<()>,
    base_dir: PathBuf,
}

impl DataManager {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        let now = now_ms();
        Self {
            users: DashMap::new(),
            enemies: DashMap::new(),
            skill_config: RwLock::new(SkillConfig::new()),
            settings: RwLock::new(GlobalSettings::default()),
            user_cache: RwLock::new(HashMap::new()),
            hp_cache: DashMap::new(),
            start_time: RwLock::new(now),
            last_log_time: RwLock::new(0),
            last_auto_save_time: RwLock::new(now),
            paused: RwLock::new(false),
            cache_dirty: Notify::new(),
            log_file_lock: Mutex::new(()),
            base_dir: base_dir.into(),
        }
    }

    pub fn initialize(&self) -> Result<()> {
        *self.settings.write() = GlobalSettings::load(self.settings_path())?;
        self.load_user_cache()?;
        self.load_skill_config()?;
        Ok(())
    }

    fn settings_path(&self) -> PathBuf {
        self.base_dir.join("settings.json")
    }

    fn cache_path(&self) -> PathBuf {
        self.base_dir.join("users.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    fn session_dir(&self, start_time: i64) -> PathBuf {
        self.logs_dir().join(start_time.to_string())
    }

    // ---- persistence ------------------------------------------------------

    fn load_user_cache(&self) -> Result<()> {
        let path = self.cache_path();
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        let cache: HashMap<String, CachedIdentity> = serde_json::from_str(&content)?;
        log::info!("Loaded {} identity cache entries", cache.len());
        *self.user_cache.write() = cache;
        Ok(())
    }

    pub fn save_user_cache(&self) -> Result<()> {
        let cache = self.user_cache.read().clone();
        let content = serde_json::to_string_pretty(&cache)?;
        fs::write(self.cache_path(), content)?;
        log::debug!("Saved {} identity cache entries", cache.len());
        Ok(())
    }

    fn load_skill_config(&self) -> Result<()> {
        let path = self.base_dir.join("tables/skill_names.json");
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            self.skill_config
                .write()
                .load_from_json(&content)
                .map_err(crate::MeterError::Json)?;
            log::info!("Loaded skill name table from {}", path.display());
        }
        Ok(())
    }

    pub fn save_settings(&self) -> Result<()> {
        self.settings.read().save(self.settings_path())
    }

    /// Debounced identity-cache writer. One save in flight at a time; marks
    /// arriving during a save coalesce into the next cycle.
    pub fn spawn_cache_saver(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                manager.cache_dirty.notified().await;
                tokio::time::sleep(std::time::Duration::from_millis(CACHE_SAVE_DEBOUNCE_MS)).await;
                if let Err(e) = manager.save_user_cache() {
                    log::error!("Identity cache save failed, will retry on next change: {}", e);
                }
            }
        });
    }

    fn touch_cache<F: FnOnce(&mut CachedIdentity)>(&self, uid: u32, update: F) {
        {
            let mut cache = self.user_cache.write();
            update(cache.entry(uid.to_string()).or_default());
        }
        self.cache_dirty.notify_one();
    }

    pub fn cached_identity(&self, uid: u32) -> Option<CachedIdentity> {
        self.user_cache.read().get(&uid.to_string()).cloned()
    }

    // ---- user access ------------------------------------------------------

    pub fn get_or_create_user(&self, uid: u32) -> Arc<RwLock<UserData>> {
        self.users
            .entry(uid)
            .or_insert_with(|| {
                let mut user = UserData::new(uid);
                // seed identity fields from the persistent cache
                if let Some(cached) = self.user_cache.read().get(&uid.to_string()) {
                    if let Some(name) = &cached.name {
                        user.set_name(name.clone());
                    }
                    if let Some(profession) = &cached.profession {
                        user.set_profession(profession.clone());
                    }
                    if let Some(fp) = cached.fight_point {
                        user.set_fight_point(fp);
                    }
                    if let Some(max_hp) = cached.max_hp {
                        user.set_attr("max_hp", max_hp);
                    }
                }
                Arc::new(RwLock::new(user))
            })
            .clone()
    }

    // ---- mutating surface (the decoder's capability interface) ------------

    #[allow(clippy::too_many_arguments)]
    pub fn add_damage(
        &self,
        uid: u32,
        skill_id: u32,
        element: &str,
        damage: u64,
        is_crit: bool,
        is_lucky: bool,
        is_cause_lucky: bool,
        hp_lessen: u64,
        target_uid: u32,
    ) {
        self.check_timeout_clear_at(now_ms());
        if self.is_paused() {
            return;
        }
        if self.settings.read().only_record_elite_dummy && target_uid != ELITE_DUMMY_UID {
            return;
        }

        let now = now_ms();
        let user = self.get_or_create_user(uid);
        {
            let mut user = user.write();
            user.add_damage_at(now, skill_id, element, damage, is_crit, is_lucky, is_cause_lucky, hp_lessen);
            if let Some(sub) = sub_profession_by_skill_id(skill_id) {
                user.set_sub_profession(sub);
            }
        }
        *self.last_log_time.write() = now;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_healing(
        &self,
        uid: u32,
        skill_id: u32,
        element: &str,
        healing: u64,
        is_crit: bool,
        is_lucky: bool,
        is_cause_lucky: bool,
        _target_uid: u32,
    ) {
        self.check_timeout_clear_at(now_ms());
        if self.is_paused() {
            return;
        }
        if uid == 0 {
            // healing with no attributable source
            return;
        }

        let now = now_ms();
        let user = self.get_or_create_user(uid);
        {
            let mut user = user.write();
            user.add_healing_at(now, skill_id, element, healing, is_crit, is_lucky, is_cause_lucky);
            if let Some(sub) = sub_profession_by_skill_id(skill_id) {
                user.set_sub_profession(sub);
            }
        }
        *self.last_log_time.write() = now;
    }

    pub fn add_taken_damage(&self, uid: u32, damage: u64, is_dead: bool) {
        self.check_timeout_clear_at(now_ms());
        if self.is_paused() {
            return;
        }
        let user = self.get_or_create_user(uid);
        user.write().add_taken_damage(damage, is_dead);
        *self.last_log_time.write() = now_ms();
    }

    pub fn set_user_name(&self, uid: u32, name: String) {
        if self.is_paused() {
            return;
        }
        let user = self.get_or_create_user(uid);
        user.write().set_name(name.clone());
        self.touch_cache(uid, |c| c.name = Some(name));
    }

    pub fn set_user_profession(&self, uid: u32, profession: String) {
        if self.is_paused() {
            return;
        }
        let user = self.get_or_create_user(uid);
        user.write().set_profession(profession.clone());
        self.touch_cache(uid, |c| c.profession = Some(profession));
    }

    /// Profession updates arrive from the wire as numeric ids; unknown ids
    /// are ignored rather than clobbering a cached name.
    pub fn set_user_profession_id(&self, uid: u32, profession_id: u32) {
        if let Some(name) = profession_name_from_id(profession_id) {
            self.set_user_profession(uid, name.to_string());
        }
    }

    pub fn set_user_fight_point(&self, uid: u32, fight_point: u64) {
        if self.is_paused() {
            return;
        }
        let user = self.get_or_create_user(uid);
        user.write().set_fight_point(fight_point);
        self.touch_cache(uid, |c| c.fight_point = Some(fight_point));
    }

    pub fn set_user_attr(&self, uid: u32, key: &str, value: u64) {
        if self.is_paused() {
            return;
        }
        let user = self.get_or_create_user(uid);
        user.write().set_attr(key, value);
        if key == "hp" {
            self.hp_cache.insert(uid, value);
        }
        if key == "max_hp" {
            self.touch_cache(uid, |c| c.max_hp = Some(value));
        }
    }

    /// Timestamped append to the current session's fight.log. The dedicated
    /// lock lets log lines accumulate even while capture holds the flow mutex.
    pub fn add_log(&self, line: &str) {
        if self.is_paused() {
            return;
        }
        let now = now_ms();
        let dir = self.session_dir(*self.start_time.read());
        let _guard = self.log_file_lock.lock();
        if let Err(e) = fs::create_dir_all(&dir).and_then(|_| {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("fight.log"))?;
            let stamp = chrono::DateTime::from_timestamp_millis(now)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_default();
            writeln!(file, "[{}] {}", stamp, line)
        }) {
            log::warn!("fight.log append failed: {}", e);
        }
        *self.last_log_time.write() = now;
    }

    // ---- enemy cache ------------------------------------------------------

    pub fn get_or_create_enemy(&self, id: u32) -> Arc<RwLock<Enemy>> {
        self.enemies
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(Enemy::new(id))))
            .clone()
    }

    pub fn set_enemy_name(&self, id: u32, name: String) {
        if self.is_paused() {
            return;
        }
        self.get_or_create_enemy(id).write().name = name;
    }

    pub fn set_enemy_hp(&self, id: u32, hp: u64) {
        if self.is_paused() {
            return;
        }
        self.get_or_create_enemy(id).write().hp = hp;
    }

    pub fn set_enemy_max_hp(&self, id: u32, max_hp: u64) {
        if self.is_paused() {
            return;
        }
        self.get_or_create_enemy(id).write().max_hp = max_hp;
    }

    pub fn remove_enemy(&self, id: u32) {
        self.enemies.remove(&id);
    }

    // ---- control ----------------------------------------------------------

    pub fn pause(&self, paused: bool) {
        *self.paused.write() = paused;
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.read()
    }

    pub fn start_time(&self) -> i64 {
        *self.start_time.read()
    }

    pub fn last_log_time(&self) -> i64 {
        *self.last_log_time.read()
    }

    /// Recompute every user's sliding-window rates; driven every 100 ms.
    pub fn update_realtime(&self) {
        self.update_realtime_at(now_ms());
    }

    pub fn update_realtime_at(&self, now: i64) {
        for entry in self.users.iter() {
            entry.value().write().update_realtime_at(now);
        }
    }

    pub fn check_timeout_clear_at(&self, now: i64) {
        if !self.settings.read().auto_clear_on_timeout {
            return;
        }
        let last = *self.last_log_time.read();
        if last != 0 && !self.users.is_empty() && now - last > TIMEOUT_CLEAR_MS {
            log::info!("No activity for {}s, clearing statistics", TIMEOUT_CLEAR_MS / 1000);
            self.clear_all();
        }
    }

    /// Flush the running session to `./logs/<startTime>/` and start a fresh
    /// one.
    pub fn clear_all(&self) {
        let outgoing_start = *self.start_time.read();
        let snapshot = self.collect_users();
        if !snapshot.is_empty() {
            if let Err(e) = self.write_history_snapshot(outgoing_start, &snapshot) {
                log::error!("History snapshot failed: {}", e);
            }
        }

        self.users.clear();
        self.hp_cache.clear();
        self.enemies.clear();
        *self.start_time.write() = now_ms();
        *self.last_log_time.write() = 0;
    }

    /// Invoked by the flow identifier whenever the scene server endpoint
    /// changes. The enemy cache always goes; user statistics only when the
    /// setting asks for it and the outgoing session actually saw activity.
    pub fn clear_data_on_server_change(&self) {
        self.enemies.clear();
        if self.settings.read().auto_clear_on_server_change
            && *self.last_log_time.read() != 0
            && !self.users.is_empty()
        {
            log::info!("Scene server changed, clearing statistics");
            self.clear_all();
        }
    }

    /// 10-second maintenance pass: persist the running session if anything
    /// was recorded since the last save.
    pub fn maintenance_tick(&self) {
        let now = now_ms();
        let should_save = *self.last_log_time.read() >= *self.last_auto_save_time.read();
        if should_save {
            let snapshot = self.collect_users();
            if !snapshot.is_empty() {
                if let Err(e) = self.write_history_snapshot(*self.start_time.read(), &snapshot) {
                    log::error!("Auto-save failed: {}", e);
                }
            }
        }
        *self.last_auto_save_time.write() = now;
    }

    /// Shutdown path: flush the debounced cache and snapshot synchronously.
    pub fn flush_on_shutdown(&self) {
        if let Err(e) = self.save_user_cache() {
            log::error!("Identity cache save on shutdown failed: {}", e);
        }
        if let Err(e) = self.save_settings() {
            log::error!("Settings save on shutdown failed: {}", e);
        }
        let snapshot = self.collect_users();
        if !snapshot.is_empty() {
            if let Err(e) = self.write_history_snapshot(*self.start_time.read(), &snapshot) {
                log::error!("Final snapshot failed: {}", e);
            }
        }
    }

    // ---- snapshots --------------------------------------------------------

    fn collect_users(&self) -> Vec<(u32, UserData)> {
        self.users
            .iter()
            .map(|entry| (*entry.key(), entry.value().read().clone()))
            .collect()
    }

    pub fn get_all_users_data(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for entry in self.users.iter() {
            map.insert(entry.key().to_string(), entry.value().read().summary_json());
        }
        map
    }

    pub fn get_all_enemies_data(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for entry in self.enemies.iter() {
            map.insert(entry.key().to_string(), entry.value().read().summary_json());
        }
        map
    }

    /// The `/api/data` (and WebSocket broadcast) payload.
    pub fn data_payload(&self) -> Value {
        json!({
            "user": self.get_all_users_data(),
            "enemy": self.get_all_enemies_data(),
        })
    }

    pub fn get_user_skill_data(&self, uid: u32) -> Option<Value> {
        let user = self.users.get(&uid)?;
        let user = user.read();
        let skill_config = self.skill_config.read();
        Some(json!({
            "uid": uid,
            "name": user.name,
            "profession": user.display_profession(),
            "skills": user.skills_json(&skill_config),
        }))
    }

    fn max_hp_monster(&self) -> String {
        self.enemies
            .iter()
            .max_by_key(|entry| entry.value().read().max_hp)
            .map(|entry| entry.value().read().name.clone())
            .unwrap_or_default()
    }

    fn write_history_snapshot(&self, start_time: i64, users: &[(u32, UserData)]) -> Result<()> {
        let dir = self.session_dir(start_time);
        fs::create_dir_all(dir.join("users"))?;

        let mut all_users = serde_json::Map::new();
        let skill_config = self.skill_config.read();
        for (uid, user) in users {
            all_users.insert(uid.to_string(), user.summary_json());
            let detail = json!({
                "uid": uid,
                "name": user.name,
                "profession": user.display_profession(),
                "skills": user.skills_json(&skill_config),
            });
            fs::write(
                dir.join("users").join(format!("{}.json", uid)),
                serde_json::to_string_pretty(&detail)?,
            )?;
        }
        drop(skill_config);

        fs::write(
            dir.join("allUserData.json"),
            serde_json::to_string_pretty(&Value::Object(all_users))?,
        )?;

        let now = now_ms();
        let summary = json!({
            "startTime": start_time,
            "endTime": now,
            "duration": now - start_time,
            "userCount": users.len(),
            "version": VERSION,
            "maxHpMonster": self.max_hp_monster(),
        });
        fs::write(dir.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;

        log::info!("Session snapshot written to {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, DataManager) {
        let dir = tempdir().unwrap();
        let dm = DataManager::new(dir.path());
        (dir, dm)
    }

    #[test]
    fn single_damage_event_populates_summary() {
        let (_dir, dm) = manager();
        dm.add_damage(114514, 1241, "ice", 1000, false, false, false, 1000, 9);

        let users = dm.get_all_users_data();
        let user = &users["114514"];
        assert_eq!(user["total_damage"]["total"], 1000);
        assert_eq!(user["total_count"]["total"], 1);
        assert_eq!(user["profession"], "Unknown-Frostbeam");
    }

    #[test]
    fn crit_lucky_event_lands_in_one_bucket() {
        let (_dir, dm) = manager();
        dm.add_damage(1, 2292, "", 500, true, true, true, 400, 9);

        let users = dm.get_all_users_data();
        let user = &users["1"];
        assert_eq!(user["total_damage"]["crit_lucky"], 500);
        assert_eq!(user["total_damage"]["hpLessen"], 400);
        assert_eq!(user["total_count"]["critical"], 1);
        assert_eq!(user["total_count"]["lucky"], 1);
        assert_eq!(user["total_count"]["normal"], 0);
        assert_eq!(user["total_count"]["total"], 1);
    }

    #[test]
    fn pause_gates_all_mutation() {
        let (_dir, dm) = manager();
        dm.pause(true);
        dm.add_damage(1, 1241, "ice", 1000, false, false, false, 0, 9);
        dm.add_healing(1, 20301, "wood", 500, false, false, false, 1);
        dm.add_taken_damage(1, 100, false);
        dm.set_user_name(1, "ignored".to_string());
        assert!(dm.users.is_empty());

        dm.pause(false);
        dm.add_damage(1, 1241, "ice", 1000, false, false, false, 0, 9);
        assert_eq!(dm.users.len(), 1);
    }

    #[test]
    fn elite_dummy_filter_drops_other_targets() {
        let (_dir, dm) = manager();
        dm.settings.write().only_record_elite_dummy = true;
        dm.add_damage(1, 1241, "ice", 1000, false, false, false, 0, 9);
        assert!(dm.users.is_empty());

        dm.add_damage(1, 1241, "ice", 1000, false, false, false, 0, ELITE_DUMMY_UID);
        assert_eq!(dm.users.len(), 1);
    }

    #[test]
    fn timeout_clear_requires_setting_and_activity() {
        let (_dir, dm) = manager();
        dm.add_damage(1, 1241, "ice", 1000, false, false, false, 0, 9);
        let last = dm.last_log_time();

        // setting off: nothing happens
        dm.check_timeout_clear_at(last + TIMEOUT_CLEAR_MS + 1);
        assert_eq!(dm.users.len(), 1);

        dm.settings.write().auto_clear_on_timeout = true;
        // not yet stale
        dm.check_timeout_clear_at(last + TIMEOUT_CLEAR_MS);
        assert_eq!(dm.users.len(), 1);

        let old_start = dm.start_time();
        dm.check_timeout_clear_at(last + TIMEOUT_CLEAR_MS + 1);
        assert!(dm.users.is_empty());
        assert!(dm.start_time() >= old_start);
        assert_eq!(dm.last_log_time(), 0);
    }

    #[test]
    fn clear_all_writes_history_snapshot() {
        let (dir, dm) = manager();
        dm.add_damage(7, 1241, "ice", 1234, false, false, false, 0, 9);
        dm.set_enemy_name(5, "Storm Golem".to_string());
        dm.set_enemy_max_hp(5, 900_000);
        let start = dm.start_time();

        dm.clear_all();

        let session = dir.path().join("logs").join(start.to_string());
        let all: Value =
            serde_json::from_str(&fs::read_to_string(session.join("allUserData.json")).unwrap())
                .unwrap();
        assert_eq!(all["7"]["total_damage"]["total"], 1234);

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(session.join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["startTime"], start);
        assert_eq!(summary["userCount"], 1);
        // the snapshot ran before the enemy cache was dropped
        assert_eq!(summary["maxHpMonster"], "Storm Golem");

        let detail: Value =
            serde_json::from_str(&fs::read_to_string(session.join("users/7.json")).unwrap())
                .unwrap();
        assert_eq!(detail["uid"], 7);

        assert!(dm.users.is_empty());
        assert!(dm.enemies.is_empty());
        assert!(dm.start_time() >= start);
    }

    #[test]
    fn server_change_clears_enemies_and_optionally_users() {
        let (_dir, dm) = manager();
        dm.add_damage(1, 1241, "ice", 100, false, false, false, 0, 9);
        dm.set_enemy_name(5, "Golem".to_string());
        let old_start = dm.start_time();

        dm.clear_data_on_server_change();
        assert!(dm.enemies.is_empty());
        assert!(dm.users.is_empty());
        assert!(dm.start_time() >= old_start);

        // without activity, user stats survive a second change
        dm.settings.write().auto_clear_on_server_change = true;
        dm.set_enemy_name(6, "Wisp".to_string());
        dm.clear_data_on_server_change();
        assert!(dm.enemies.is_empty());

        // with the setting off, users survive even with activity
        dm.settings.write().auto_clear_on_server_change = false;
        dm.add_damage(2, 1241, "ice", 100, false, false, false, 0, 9);
        dm.clear_data_on_server_change();
        assert_eq!(dm.users.len(), 1);
    }

    #[test]
    fn identity_cache_round_trips_and_seeds_users() {
        let dir = tempdir().unwrap();
        {
            let dm = DataManager::new(dir.path());
            dm.set_user_name(42, "Aster".to_string());
            dm.set_user_profession(42, "Frost Mage".to_string());
            dm.set_user_fight_point(42, 9001);
            dm.set_user_attr(42, "max_hp", 55_000);
            dm.save_user_cache().unwrap();
        }

        let dm = DataManager::new(dir.path());
        dm.initialize().unwrap();
        // a fresh event recreates the user with cached identity
        dm.add_damage(42, 9999, "", 1, false, false, false, 0, 9);
        let users = dm.get_all_users_data();
        assert_eq!(users["42"]["name"], "Aster");
        assert_eq!(users["42"]["profession"], "Frost Mage");
        assert_eq!(users["42"]["fight_point"], 9001);
        assert_eq!(users["42"]["max_hp"], 55_000);
    }

    #[test]
    fn skill_endpoint_distinguishes_unknown_users() {
        let (_dir, dm) = manager();
        assert!(dm.get_user_skill_data(1).is_none());
        dm.add_damage(1, 1241, "ice", 100, false, false, false, 0, 9);
        let detail = dm.get_user_skill_data(1).unwrap();
        assert_eq!(detail["skills"]["1241"]["total_damage"]["total"], 100);
    }

    #[test]
    fn profession_ids_map_to_names() {
        let (_dir, dm) = manager();
        dm.set_user_profession_id(1, 2);
        dm.set_user_profession_id(1, 999); // unknown: ignored
        let users = dm.get_all_users_data();
        assert_eq!(users["1"]["profession"], "Frost Mage");
    }

    #[test]
    fn enemy_cache_tracks_and_forgets() {
        let (_dir, dm) = manager();
        dm.set_enemy_name(5, "Golem".to_string());
        dm.set_enemy_hp(5, 1000);
        dm.set_enemy_max_hp(5, 2000);

        let enemies = dm.get_all_enemies_data();
        assert_eq!(enemies["5"]["name"], "Golem");
        assert_eq!(enemies["5"]["hp"], 1000);
        assert_eq!(enemies["5"]["max_hp"], 2000);

        dm.remove_enemy(5);
        assert!(dm.enemies.is_empty());
    }

    #[test]
    fn fight_log_appends_lines() {
        let (dir, dm) = manager();
        dm.add_log("Aster hits Golem for 100");
        dm.add_log("Golem dies");
        let path = dir
            .path()
            .join("logs")
            .join(dm.start_time().to_string())
            .join("fight.log");
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("Golem dies"));
        assert!(dm.last_log_time() != 0);
    }
}
