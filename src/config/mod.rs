// src/config/mod.rs - Bot configuration with hot reload of settings and rule files

use anyhow::{Context, Result};
use log::{debug, error, info, warn, LevelFilter};
use notify::{Event, EventKind, RecommendedWatcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep_until, Duration, Instant};

pub const BOT_CONFIG_FILE: &str = "bot.yaml";
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Owns the loaded configuration and notifies subscribers when files change
#[derive(Clone)]
pub struct ConfigurationManager {
    /// Directory holding `bot.yaml`
    config_dir: PathBuf,

    bot_config: Arc<RwLock<BotConfiguration>>,

    /// File watchers for hot-reloading
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,

    change_notifier: broadcast::Sender<ConfigChangeEvent>,
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChangeEvent {
    BotConfigUpdated { file: String },
    /// A server's rule file was written or removed
    RulesChanged { server_id: String },
    ValidationError { file: String, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfiguration {
    pub core: CoreSettings,
    /// Rule files for the console platform, one `<server_id>.yaml` per server
    pub rules_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreSettings {
    /// Channel holding each server's rules and receiving error reports
    pub config_channel: String,
    pub log_level: String,
    pub respond_to_ping: bool,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            core: CoreSettings::default(),
            rules_dir: PathBuf::from("rules"),
        }
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            config_channel: "automod-config".to_string(),
            log_level: "info".to_string(),
            respond_to_ping: true,
        }
    }
}

impl CoreSettings {
    /// Falls back to `Info` for unknown level names
    pub fn log_level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(self.log_level.trim()).unwrap_or_else(|_| {
            warn!("Unknown log level '{}', using info", self.log_level);
            LevelFilter::Info
        })
    }
}

impl BotConfiguration {
    /// Apply `AUTOMOD_CONFIG_CHANNEL` and `AUTOMOD_RULES_DIR` when set
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            env::var("AUTOMOD_CONFIG_CHANNEL").ok(),
            env::var("AUTOMOD_RULES_DIR").ok(),
        );
    }

    pub fn apply_overrides(&mut self, config_channel: Option<String>, rules_dir: Option<String>) {
        if let Some(channel) = config_channel.filter(|c| !c.trim().is_empty()) {
            debug!("Config channel overridden to '{}'", channel);
            self.core.config_channel = channel.trim().to_string();
        }
        if let Some(dir) = rules_dir.filter(|d| !d.trim().is_empty()) {
            debug!("Rules directory overridden to '{}'", dir);
            self.rules_dir = PathBuf::from(dir.trim());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.core.config_channel.trim().is_empty() {
            return Err(anyhow::anyhow!("core.config_channel must not be empty"));
        }
        if self.rules_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("rules_dir must not be empty"));
        }
        Ok(())
    }
}

/// What a changed path means for the bot
#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchedFile {
    BotConfig,
    Rules { server_id: String },
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            bot_config: Arc::new(RwLock::new(BotConfiguration::default())),
            watchers: Arc::new(RwLock::new(Vec::new())),
            change_notifier: tx,
        }
    }

    /// Load (or create) the configuration. Does not start watching.
    pub async fn load(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir)
                .await
                .with_context(|| format!("Failed to create {}", self.config_dir.display()))?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        let config_path = self.bot_config_path();
        let mut config = if config_path.exists() {
            Self::read_bot_config(&config_path).await?
        } else {
            self.create_default_bot_config().await?
        };
        config.apply_env_overrides();
        config.validate()?;

        if !config.rules_dir.exists() {
            fs::create_dir_all(&config.rules_dir)
                .await
                .with_context(|| format!("Failed to create rules directory {}", config.rules_dir.display()))?;
            info!("Created rules directory: {}", config.rules_dir.display());
        }

        *self.bot_config.write().await = config;
        Ok(())
    }

    /// Load the configuration and start watching for changes
    pub async fn initialize(&self) -> Result<()> {
        self.load().await?;
        self.setup_file_watchers().await?;

        info!("Configuration manager initialized successfully");
        Ok(())
    }

    pub fn bot_config_path(&self) -> PathBuf {
        self.config_dir.join(BOT_CONFIG_FILE)
    }

    async fn read_bot_config(path: &Path) -> Result<BotConfiguration> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: BotConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        debug!("Loaded bot configuration from {}", path.display());
        Ok(config)
    }

    async fn create_default_bot_config(&self) -> Result<BotConfiguration> {
        let config = BotConfiguration::default();
        let config_path = self.bot_config_path();

        let yaml = serde_yaml::to_string(&config)?;
        fs::write(&config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        info!("Created default bot configuration: {}", config_path.display());
        Ok(config)
    }

    /// Setup file watchers for hot-reloading
    async fn setup_file_watchers(&self) -> Result<()> {
        use notify::{RecursiveMode, Watcher};

        let config_dir = self.config_dir.clone();
        let rules_dir = self.bot_config.read().await.rules_dir.clone();
        let change_notifier = self.change_notifier.clone();
        let bot_config = self.bot_config.clone();

        let (tx, rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;
        watcher.watch(&rules_dir, RecursiveMode::NonRecursive)?;

        // Store watcher to prevent it from being dropped
        self.watchers.write().await.push(watcher);

        tokio::spawn(Self::process_file_events(rx, config_dir, rules_dir, bot_config, change_notifier));

        info!("File watchers setup for hot-reloading");
        Ok(())
    }

    /// Coalesce bursts of file events. A path is handled once no further
    /// event has arrived for it within the debounce window, so the last
    /// write of a burst is the one that gets loaded.
    async fn process_file_events(
        mut rx: mpsc::Receiver<Event>,
        config_dir: PathBuf,
        rules_dir: PathBuf,
        bot_config: Arc<RwLock<BotConfiguration>>,
        change_notifier: broadcast::Sender<ConfigChangeEvent>,
    ) {
        let mut pending = Debouncer::new(DEBOUNCE);

        loop {
            let received = match pending.next_deadline() {
                Some(deadline) => tokio::select! {
                    event = rx.recv() => event,
                    _ = sleep_until(deadline) => {
                        for path in pending.take_due(Instant::now()) {
                            Self::handle_change(&path, &config_dir, &rules_dir, &bot_config, &change_notifier).await;
                        }
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            let Some(event) = received else {
                break;
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                continue;
            }

            let now = Instant::now();
            for path in event.paths {
                pending.touch(path, now);
            }
        }

        for path in pending.drain() {
            Self::handle_change(&path, &config_dir, &rules_dir, &bot_config, &change_notifier).await;
        }
        debug!("File watch stream closed");
    }

    async fn handle_change(
        path: &Path,
        config_dir: &Path,
        rules_dir: &Path,
        bot_config: &Arc<RwLock<BotConfiguration>>,
        change_notifier: &broadcast::Sender<ConfigChangeEvent>,
    ) {
        match Self::classify(path, config_dir, rules_dir) {
            Some(WatchedFile::BotConfig) => {
                info!("Bot configuration file changed, reloading...");
                Self::reload_bot_config(path, bot_config, change_notifier).await;
            }
            Some(WatchedFile::Rules { server_id }) => {
                info!("Rules for server {} changed", server_id);
                let _ = change_notifier.send(ConfigChangeEvent::RulesChanged { server_id });
            }
            None => debug!("Ignoring change to {}", path.display()),
        }
    }

    fn classify(path: &Path, config_dir: &Path, rules_dir: &Path) -> Option<WatchedFile> {
        let filename = path.file_name()?.to_str()?;
        let parent = path.parent()?;

        if filename == BOT_CONFIG_FILE && same_dir(parent, config_dir) {
            return Some(WatchedFile::BotConfig);
        }

        if same_dir(parent, rules_dir) {
            let server_id = filename
                .strip_suffix(".yaml")
                .or_else(|| filename.strip_suffix(".yml"))?;
            if !server_id.is_empty() {
                return Some(WatchedFile::Rules {
                    server_id: server_id.to_string(),
                });
            }
        }

        None
    }

    async fn reload_bot_config(
        path: &Path,
        bot_config: &Arc<RwLock<BotConfiguration>>,
        change_notifier: &broadcast::Sender<ConfigChangeEvent>,
    ) {
        let file = path.display().to_string();

        let loaded = Self::read_bot_config(path).await.and_then(|mut config| {
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        });

        match loaded {
            Ok(config) => {
                let mut current = bot_config.write().await;
                if current.rules_dir != config.rules_dir {
                    warn!(
                        "rules_dir changed from {} to {}; restart to watch the new directory",
                        current.rules_dir.display(),
                        config.rules_dir.display()
                    );
                }
                *current = config;
                drop(current);

                let _ = change_notifier.send(ConfigChangeEvent::BotConfigUpdated { file });
            }
            Err(e) => {
                error!("Failed to reload bot config: {:#}", e);
                let _ = change_notifier.send(ConfigChangeEvent::ValidationError {
                    file,
                    error: format!("{:#}", e),
                });
            }
        }
    }

    pub async fn get_bot_config(&self) -> BotConfiguration {
        self.bot_config.read().await.clone()
    }

    /// Subscribe to configuration change events
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }
}

/// Pending paths, each with the instant it becomes due
struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event, pushing the path's deadline back to `now + window`
    fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.pending.remove(path);
        }
        due.sort();
        due
    }

    fn drain(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.pending.drain().map(|(path, _)| path).collect();
        all.sort();
        all
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
