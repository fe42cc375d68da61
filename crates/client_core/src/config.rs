use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{ensure, Context, Result};

pub const DEFAULT_SETTINGS_FILE: &str = "recon.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Period of the simulated reconstruction progress ticker.
    pub progress_tick: Duration,
    /// Pause between a finished ingestion and the "ready" idle state.
    pub ready_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            progress_tick: Duration::from_millis(2000),
            ready_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".into(),
            timings: Timings::default(),
        }
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| {
        std::env::var(key).ok()
    })
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        apply_file_overrides(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
    }

    apply_env_overrides(&mut settings, env);
    ensure!(
        !settings.timings.progress_tick.is_zero(),
        "progress_tick_ms must be greater than zero"
    );
    Ok(settings)
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) -> Result<()> {
    let file_cfg: HashMap<String, toml::Value> = toml::from_str(raw)?;

    if let Some(v) = file_cfg.get("backend_url").and_then(toml::Value::as_str) {
        settings.backend_url = v.to_string();
    }
    if let Some(ms) = file_cfg.get("progress_tick_ms").and_then(as_millis) {
        settings.timings.progress_tick = ms;
    }
    if let Some(ms) = file_cfg.get("ready_delay_ms").and_then(as_millis) {
        settings.timings.ready_delay = ms;
    }
    Ok(())
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("RECON_BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = env("APP__BACKEND_URL") {
        settings.backend_url = v;
    }

    if let Some(ms) = env("APP__PROGRESS_TICK_MS").and_then(|v| v.parse::<u64>().ok()) {
        settings.timings.progress_tick = Duration::from_millis(ms);
    }
    if let Some(ms) = env("APP__READY_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
        settings.timings.ready_delay = Duration::from_millis(ms);
    }
}

fn as_millis(value: &toml::Value) -> Option<Duration> {
    match value {
        toml::Value::Integer(ms) if *ms >= 0 => Some(Duration::from_millis(*ms as u64)),
        toml::Value::String(raw) => raw.trim().parse::<u64>().ok().map(Duration::from_millis),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
