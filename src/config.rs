use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Runtime toggles persisted to `./settings.json`.
///
/// Unknown keys posted through the settings endpoint land in `extra` and
/// survive the round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_true")]
    pub auto_clear_on_server_change: bool,
    #[serde(default)]
    pub auto_clear_on_timeout: bool,
    #[serde(default)]
    pub only_record_elite_dummy: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            auto_clear_on_server_change: true,
            auto_clear_on_timeout: false,
            only_record_elite_dummy: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl GlobalSettings {
    /// A missing file means defaults; a malformed file is a config error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Merge a settings patch: known boolean keys update the typed fields,
    /// anything else is preserved verbatim.
    pub fn merge(&mut self, patch: &serde_json::Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "auto_clear_on_server_change" => {
                    if let Some(v) = value.as_bool() {
                        self.auto_clear_on_server_change = v;
                    }
                }
                "auto_clear_on_timeout" => {
                    if let Some(v) = value.as_bool() {
                        self.auto_clear_on_timeout = v;
                    }
                }
                "only_record_elite_dummy" => {
                    if let Some(v) = value.as_bool() {
                        self.only_record_elite_dummy = v;
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// `resonance-meter [<device> [<log_level>]]`
///
/// Device is a capture-device index or the literal `auto`; log level is
/// `info` or `debug`. Anything missing or unparsable falls through to the
/// interactive prompts.
#[derive(Debug, Default)]
pub struct AppArgs {
    pub device: Option<String>,
    pub log_level: Option<String>,
}

impl AppArgs {
    pub fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        Self {
            device: args.next(),
            log_level: args.next(),
        }
    }

    pub fn valid_log_level(&self) -> Option<&str> {
        match self.log_level.as_deref() {
            Some(level @ ("info" | "debug")) => Some(level),
            _ => None,
        }
    }
}

/// Prompt for a capture-device index on stdin. Returns `None` on empty or
/// invalid input so the caller can fall back to auto-detection.
pub fn prompt_device_index(device_count: usize) -> Option<usize> {
    print!("Select device [0-{}] (empty = auto): ", device_count.saturating_sub(1));
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return None;
    }
    match line.trim().parse::<usize>() {
        Ok(idx) if idx < device_count => Some(idx),
        _ => None,
    }
}

pub fn prompt_log_level() -> String {
    print!("Log level [info/debug] (default info): ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return "info".to_string();
    }
    match line.trim() {
        "debug" => "debug".to_string(),
        _ => "info".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let settings = GlobalSettings::default();
        assert!(settings.auto_clear_on_server_change);
        assert!(!settings.auto_clear_on_timeout);
        assert!(!settings.only_record_elite_dummy);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GlobalSettings::load(dir.path().join("settings.json")).unwrap();
        assert!(settings.auto_clear_on_server_change);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = GlobalSettings::default();
        let patch: serde_json::Map<String, Value> = serde_json::from_str(
            r#"{"auto_clear_on_timeout": true, "theme": "dark"}"#,
        )
        .unwrap();
        settings.merge(&patch);
        settings.save(&path).unwrap();

        let reloaded = GlobalSettings::load(&path).unwrap();
        assert!(reloaded.auto_clear_on_timeout);
        assert_eq!(reloaded.extra.get("theme"), Some(&Value::from("dark")));
    }

    #[test]
    fn merge_ignores_wrongly_typed_known_keys() {
        let mut settings = GlobalSettings::default();
        let patch: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"only_record_elite_dummy": "yes"}"#).unwrap();
        settings.merge(&patch);
        assert!(!settings.only_record_elite_dummy);
    }
}
