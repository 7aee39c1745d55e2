use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

/// Which classifier backend to build at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClassifierSettings {
    /// Keyword scoring, no model needed. Each topic maps to its keywords.
    Keyword { topics: Vec<TopicKeywords> },
    /// JSON-lines helper process hosting a zero-shot model.
    ZeroShot {
        command: String,
        args: Vec<String>,
        topic: String,
        model: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicKeywords {
    pub topic: String,
    pub keywords: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings::Keyword {
            topics: crate::classify::keyword::default_topics(),
        }
    }
}

/// Every tunable knob of the orchestration core, in milliseconds where it is
/// a duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub window_poll_interval_ms: u64,
    pub studying_ocr_interval_ms: u64,
    pub idle_revalidation_interval_ms: u64,
    pub idle_revalidation_threshold_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_sweep_interval_ms: u64,
    pub new_window_delay_ms: u64,
    pub batch_flush_threshold: usize,
    /// Zero or negative disables the idle flush.
    pub batch_idle_flush_timeout_ms: i64,
    pub capture_timeout_ms: u64,
    pub classifier: ClassifierSettings,
    pub window_command: Option<Vec<String>>,
    pub capture_command: Option<Vec<String>>,
    pub ocr_command: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_poll_interval_ms: 2_000,
            studying_ocr_interval_ms: 30_000,
            idle_revalidation_interval_ms: 60_000,
            idle_revalidation_threshold_ms: 300_000,
            cache_ttl_ms: 3_600_000,
            cache_sweep_interval_ms: 60_000,
            new_window_delay_ms: 3_000,
            batch_flush_threshold: 4_000,
            batch_idle_flush_timeout_ms: 120_000,
            capture_timeout_ms: 15_000,
            classifier: ClassifierSettings::default(),
            window_command: None,
            capture_command: None,
            ocr_command: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("windowPollIntervalMs", self.window_poll_interval_ms),
            ("studyingOcrIntervalMs", self.studying_ocr_interval_ms),
            ("idleRevalidationIntervalMs", self.idle_revalidation_interval_ms),
            ("cacheSweepIntervalMs", self.cache_sweep_interval_ms),
            ("captureTimeoutMs", self.capture_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.batch_flush_threshold == 0 {
            bail!("batchFlushThreshold must be greater than zero");
        }
        if let ClassifierSettings::ZeroShot { command, topic, .. } = &self.classifier {
            if command.trim().is_empty() || topic.trim().is_empty() {
                bail!("zero-shot classifier needs a command and a topic");
            }
        }
        Ok(())
    }

    pub fn window_poll_interval(&self) -> Duration {
        Duration::from_millis(self.window_poll_interval_ms)
    }

    pub fn studying_ocr_interval(&self) -> Duration {
        Duration::from_millis(self.studying_ocr_interval_ms)
    }

    pub fn idle_revalidation_interval(&self) -> Duration {
        Duration::from_millis(self.idle_revalidation_interval_ms)
    }

    pub fn idle_revalidation_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_revalidation_threshold_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub fn new_window_delay(&self) -> Duration {
        Duration::from_millis(self.new_window_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// `None` when the idle flush is disabled.
    pub fn batch_idle_flush_timeout(&self) -> Option<Duration> {
        u64::try_from(self.batch_idle_flush_timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads settings from `path`. A missing file yields defaults; a file
    /// that fails to parse or validate is logged and replaced by defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match parse_settings(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!(
                        "Ignoring invalid settings at {}: {err:#}; using defaults",
                        path.display()
                    );
                    Settings::default()
                }
            }
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Location used when `STUDYLENS_SETTINGS` is not set.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("STUDYLENS_SETTINGS") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("studylens")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Settings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    /// Writes the current settings out if no file exists yet, so users have
    /// something to edit.
    pub fn write_defaults_if_missing(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.persist(&self.settings())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = serde_json::from_str(contents).context("malformed settings JSON")?;
    settings.validate()?;
    Ok(settings)
}
