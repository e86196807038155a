// SPDX-License-Identifier: CEPL-1.0
use std::{fs, io, path::Path};

use framecycle_render_vk::{EngineConfig, PresentModePreference};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Default)]
pub struct WindowCfg {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    /// Unset means "on in debug builds".
    #[serde(default)]
    pub validation: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::default(),
            validation: None,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

impl AppCfg {
    pub fn engine_config(&self, app_name: &str) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            app_name: app_name.to_owned(),
            validation: self.render.validation.unwrap_or(defaults.validation),
            present_mode: match self.render.present_mode {
                PresentModeCfg::Mailbox => PresentModePreference::LowLatency,
                PresentModeCfg::Fifo => PresentModePreference::Fifo,
            },
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Reads `path`; a missing or malformed file yields the defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no config at {}, using defaults", path.display());
            return AppCfg::default();
        }
        Err(e) => {
            warn!("cannot read {}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    parse_cfg(&text).unwrap_or_else(|e| {
        warn!("ignoring malformed {}: {e}", path.display());
        AppCfg::default()
    })
}
