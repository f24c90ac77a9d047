// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::elements::{KeepBrowserMode, RetryContext, ShouldRetry, TestsPerWorker, WorkerCount};
use crate::{
    errors::{BrowserNotConfigured, ConfigParseError},
    helpers::{read, write},
    list::BrowserId,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config as ConfigSource, ConfigBuilder, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    sync::{Arc, LazyLock, RwLock},
};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for browsertest.
///
/// Process-wide settings are available directly; per-browser settings are obtained through
/// [`for_browser`](Self::for_browser).
#[derive(Clone, Debug)]
pub struct Config {
    config_path: Option<Utf8PathBuf>,
    system: SystemConfig,
    browser_defaults: BrowserDefaults,
    browsers: IndexMap<BrowserId, LiveBrowserConfig>,
}

impl Config {
    /// The default configuration.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The placeholder used in errors about the default configuration.
    const DEFAULT_CONFIG_NAME: &'static str = "<default config>";

    /// Reads the config from the given file, layered over the default config.
    ///
    /// If no file is specified, only the default config is used.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }
        let error_path = config_file.map_or_else(
            || Utf8PathBuf::from(Self::DEFAULT_CONFIG_NAME),
            Utf8Path::to_path_buf,
        );

        let config = builder
            .build()
            .map_err(|err| ConfigParseError::new(&error_path, err))?;

        let mut unknown = BTreeSet::new();
        let deserialized: ConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .map_err(|err| ConfigParseError::new(&error_path, err))?;

        if !unknown.is_empty() {
            let unknown: Vec<_> = unknown.into_iter().collect();
            warn!(
                "ignoring unknown configuration keys in {error_path}: {}",
                unknown.join(", ")
            );
        }

        Ok(Self::from_deserialized(
            config_file.map(Utf8Path::to_path_buf),
            deserialized,
        ))
    }

    /// Returns the default configuration, with no browsers.
    ///
    /// Browsers can be added with [`add_browser`](Self::add_browser).
    pub fn default_config() -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");

        let mut unknown = BTreeSet::new();
        let deserialized: ConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .expect("default config is always valid");

        // Make sure there aren't any unknown keys in the default config, since it is
        // embedded/shipped with this library.
        if !unknown.is_empty() {
            let unknown: Vec<_> = unknown.into_iter().collect();
            panic!(
                "found unknown keys in default config: {}",
                unknown.join(", ")
            );
        }

        Self::from_deserialized(None, deserialized)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        ConfigSource::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn from_deserialized(config_path: Option<Utf8PathBuf>, de: ConfigDeserialize) -> Self {
        let browsers = de
            .browsers
            .into_iter()
            .map(|(id, custom)| {
                let resolved = custom.resolve(id.clone(), &de.browser_defaults);
                (id, LiveBrowserConfig::new(resolved))
            })
            .collect();
        Self {
            config_path,
            system: de.system,
            browser_defaults: de.browser_defaults,
            browsers,
        }
    }

    /// Returns the path of the config file this was read from, if any.
    pub fn config_path(&self) -> Option<&Utf8Path> {
        self.config_path.as_deref()
    }

    /// Returns the maximum number of worker processes.
    pub fn workers(&self) -> WorkerCount {
        self.system.workers
    }

    /// Sets the maximum number of worker processes.
    pub fn set_workers(&mut self, workers: WorkerCount) -> &mut Self {
        self.system.workers = workers;
        self
    }

    /// Returns how many calls a worker handles before it is replaced.
    pub fn tests_per_worker(&self) -> TestsPerWorker {
        self.system.tests_per_worker
    }

    /// Sets how many calls a worker handles before it is replaced.
    pub fn set_tests_per_worker(&mut self, tests_per_worker: TestsPerWorker) -> &mut Self {
        self.system.tests_per_worker = tests_per_worker;
        self
    }

    /// Returns true if workers run in debug mode.
    pub fn debug(&self) -> bool {
        self.system.debug
    }

    /// Enables or disables debug mode for workers.
    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.system.debug = debug;
        self
    }

    /// Adds a browser with the default browser settings, returning its live config.
    ///
    /// If the browser is already configured, its existing config is returned unchanged.
    pub fn add_browser(&mut self, id: impl Into<BrowserId>) -> LiveBrowserConfig {
        let id = id.into();
        let defaults = &self.browser_defaults;
        self.browsers
            .entry(id.clone())
            .or_insert_with(|| {
                LiveBrowserConfig::new(CustomBrowserConfig::default().resolve(id, defaults))
            })
            .clone()
    }

    /// Returns the configured browsers, in the order they were declared.
    pub fn browser_ids(&self) -> impl ExactSizeIterator<Item = &BrowserId> {
        self.browsers.keys()
    }

    /// Returns the live config for a browser.
    pub fn for_browser(&self, id: &BrowserId) -> Result<LiveBrowserConfig, BrowserNotConfigured> {
        self.browsers.get(id).cloned().ok_or_else(|| {
            BrowserNotConfigured::new(id.clone(), self.browsers.keys().map(BrowserId::as_str))
        })
    }

    /// Returns a snapshot of the configuration, in the form sent to workers.
    pub fn serialize_for_workers(&self) -> Value {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Snapshot<'a> {
            config_path: Option<&'a Utf8Path>,
            system: &'a SystemConfig,
            browsers: IndexMap<&'a BrowserId, BrowserConfig>,
        }

        let snapshot = Snapshot {
            config_path: self.config_path(),
            system: &self.system,
            browsers: self
                .browsers
                .iter()
                .map(|(id, live)| (id, live.snapshot()))
                .collect(),
        };
        serde_json::to_value(snapshot).expect("config snapshot only contains string-keyed maps")
    }
}

/// Process-wide settings, from the `[system]` table.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct SystemConfig {
    workers: WorkerCount,
    tests_per_worker: TestsPerWorker,
    debug: bool,
}

/// Resolved settings for one browser.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// The browser these settings are for.
    pub id: BrowserId,

    /// The number of times a failing test is retried.
    pub retry: usize,

    /// The maximum number of sessions the browser pool opens for this browser at once.
    pub sessions_per_browser: usize,

    /// Whether sessions are kept open after their tests finish.
    pub keep_browser_mode: KeepBrowserMode,

    /// Capabilities requested when a session is created.
    pub desired_capabilities: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BrowserDefaults {
    retry: usize,
    sessions_per_browser: usize,
    keep_browser_mode: KeepBrowserMode,
    #[serde(default)]
    desired_capabilities: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomBrowserConfig {
    #[serde(default)]
    retry: Option<usize>,
    #[serde(default)]
    sessions_per_browser: Option<usize>,
    #[serde(default)]
    keep_browser_mode: Option<KeepBrowserMode>,
    #[serde(default)]
    desired_capabilities: Option<Map<String, Value>>,
}

impl CustomBrowserConfig {
    fn resolve(self, id: BrowserId, defaults: &BrowserDefaults) -> BrowserConfig {
        BrowserConfig {
            id,
            retry: self.retry.unwrap_or(defaults.retry),
            sessions_per_browser: self
                .sessions_per_browser
                .unwrap_or(defaults.sessions_per_browser),
            keep_browser_mode: self.keep_browser_mode.unwrap_or(defaults.keep_browser_mode),
            desired_capabilities: self
                .desired_capabilities
                .unwrap_or_else(|| defaults.desired_capabilities.clone()),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ConfigDeserialize {
    system: SystemConfig,
    browser_defaults: BrowserDefaults,
    #[serde(default)]
    browsers: IndexMap<BrowserId, CustomBrowserConfig>,
}

/// A shared, mutable view of one browser's settings.
///
/// Clones share state: a change made through one clone is observed by every other clone the next
/// time it reads the setting.
#[derive(Clone, Debug)]
pub struct LiveBrowserConfig {
    inner: Arc<LiveBrowserConfigInner>,
}

#[derive(Debug)]
struct LiveBrowserConfigInner {
    config: RwLock<BrowserConfig>,
    should_retry: RwLock<ShouldRetry>,
}

impl LiveBrowserConfig {
    fn new(config: BrowserConfig) -> Self {
        Self {
            inner: Arc::new(LiveBrowserConfigInner {
                config: RwLock::new(config),
                should_retry: RwLock::new(ShouldRetry::default()),
            }),
        }
    }

    /// Returns the browser these settings are for.
    pub fn id(&self) -> BrowserId {
        read(&self.inner.config).id.clone()
    }

    /// Returns the current retry count.
    pub fn retry(&self) -> usize {
        read(&self.inner.config).retry
    }

    /// Changes the retry count. Tests already in progress see the new value at their next retry
    /// decision.
    pub fn set_retry(&self, retry: usize) -> &Self {
        write(&self.inner.config).retry = retry;
        self
    }

    /// Returns the maximum number of concurrent sessions for this browser.
    pub fn sessions_per_browser(&self) -> usize {
        read(&self.inner.config).sessions_per_browser
    }

    /// Returns the keep-browser mode.
    pub fn keep_browser_mode(&self) -> KeepBrowserMode {
        read(&self.inner.config).keep_browser_mode
    }

    /// Changes the keep-browser mode.
    pub fn set_keep_browser_mode(&self, mode: KeepBrowserMode) -> &Self {
        write(&self.inner.config).keep_browser_mode = mode;
        self
    }

    /// Returns the capabilities requested for new sessions.
    pub fn desired_capabilities(&self) -> Map<String, Value> {
        read(&self.inner.config).desired_capabilities.clone()
    }

    /// Replaces the retry policy.
    pub fn set_should_retry(&self, policy: ShouldRetry) -> &Self {
        *write(&self.inner.should_retry) = policy;
        self
    }

    /// Asks the retry policy whether the failed attempt described by `cx` should be retried.
    pub fn should_retry(&self, cx: &RetryContext<'_>) -> bool {
        // Clone the policy out so that it can't observe the lock.
        let policy = read(&self.inner.should_retry).clone();
        policy.should_retry(cx)
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> BrowserConfig {
        read(&self.inner.config).clone()
    }
}
