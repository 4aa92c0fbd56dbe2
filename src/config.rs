//! Gateway configuration.
//!
//! [`HlsConfig`] is plain data with serde defaults so a host server can
//! embed it in its own configuration tree (YAML, TOML, env layering,
//! whatever the host uses). Every knob has a workable default; an empty
//! `{}` section yields a functional live gateway.

use crate::error::{HlsError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_fragment() -> f64 {
    2.0
}

fn default_window() -> usize {
    3
}

fn default_ts_duration() -> f64 {
    3.88
}

fn default_preload() -> bool {
    true
}

/// What the puller does with downloaded segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum RelayMode {
    /// Demux into the local publisher only
    Transmux,
    /// Store bytes and mirror the manifest only
    Relay,
    /// Demux and store simultaneously
    Both,
}

impl TryFrom<u8> for RelayMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(RelayMode::Transmux),
            1 => Ok(RelayMode::Relay),
            2 => Ok(RelayMode::Both),
            other => Err(format!("relay mode must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl Default for RelayMode {
    fn default() -> Self {
        RelayMode::Transmux
    }
}

impl RelayMode {
    /// True when downloaded segments are demuxed into the publisher
    pub fn transmuxes(&self) -> bool {
        matches!(self, RelayMode::Transmux | RelayMode::Both)
    }

    /// True when downloaded segments are stored and the manifest mirrored
    pub fn relays(&self) -> bool {
        matches!(self, RelayMode::Relay | RelayMode::Both)
    }
}

/// All gateway options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Target minimum segment duration in seconds
    pub fragment: f64,
    /// Number of segments kept in the sliding manifest window
    pub window: usize,
    /// Regex over stream paths; only matching streams are segmented
    pub filter: Option<String>,
    /// On-disk root for persisted segments and recording manifests
    pub path: Option<PathBuf>,
    /// File to serve in place of missing segments; built in when unset
    pub default_ts: Option<PathBuf>,
    /// Declared duration of the placeholder segment in seconds
    pub default_ts_duration: f64,
    /// What the puller does with downloaded segments
    pub relay_mode: RelayMode,
    /// Segment every published stream up front; when false, segmentation
    /// starts on the first HTTP request and stops after 15 s idle
    pub preload: bool,
    /// Upstream HTTP proxy URL for the puller
    pub proxy: Option<String>,
    /// Streams to pull as soon as the plugin starts: streamPath → URL
    pub pull_on_start: HashMap<String, String>,
    /// Streams to pull when a subscriber asks for them: streamPath → URL
    pub pull_on_sub: HashMap<String, String>,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            fragment: default_fragment(),
            window: default_window(),
            filter: None,
            path: None,
            default_ts: None,
            default_ts_duration: default_ts_duration(),
            relay_mode: RelayMode::default(),
            preload: default_preload(),
            proxy: None,
            pull_on_start: HashMap::new(),
            pull_on_sub: HashMap::new(),
        }
    }
}

impl HlsConfig {
    /// The fragment duration as a [`Duration`]
    pub fn fragment_duration(&self) -> Duration {
        Duration::from_secs_f64(self.fragment.max(0.1))
    }

    /// The placeholder segment duration as a [`Duration`]
    pub fn default_ts_interval(&self) -> Duration {
        Duration::from_secs_f64(self.default_ts_duration.max(0.1))
    }

    /// Compiles the stream path filter, when one is configured
    pub fn compile_filter(&self) -> Result<Option<Regex>> {
        match &self.filter {
            None => Ok(None),
            Some(pattern) => Regex::new(pattern)
                .map(Some)
                .map_err(|e| HlsError::InvalidData(format!("bad filter regex: {}", e))),
        }
    }
}
