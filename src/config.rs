//! `spanreport.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{RenderOptions, ReportResult};

pub const DEFAULT_CONFIG_FILE: &str = "spanreport.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory for stored pages and stats.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Report options used unless overridden on the command line.
    #[serde(default)]
    pub render: RenderOptions,

    /// Also record the live heap size. Off by default.
    #[serde(default)]
    pub collect_mem_size: bool,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".spanreport")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            render: RenderOptions::default(),
            collect_mem_size: false,
        }
    }
}

impl Config {
    /// Reads `path`. A missing file gives the defaults; an unreadable or
    /// malformed one is reported and also gives the defaults.
    pub fn load_optional(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(crate::ReportError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(err) => {
                tracing::warn!("failed to load config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> ReportResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.base_dir.join("pages")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("spanreport-config-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("workspace");
        dir
    }

    #[test]
    fn missing_file_gives_defaults() {
        let ws = temp_workspace("missing");
        let cfg = Config::load_optional(&ws.join(DEFAULT_CONFIG_FILE));
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.pages_dir(), PathBuf::from(".spanreport").join("pages"));
    }

    #[test]
    fn render_table_is_partial() {
        let ws = temp_workspace("partial");
        let path = ws.join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            "base_dir = \"perf\"\ncollect_mem_size = true\n\n[render]\ndisplay_sql = true\ncollapse = [\"^load\"]\nwidth = 9\n",
        )
        .expect("write");

        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.base_dir, PathBuf::from("perf"));
        assert!(cfg.collect_mem_size);
        assert!(cfg.render.display_sql);
        assert!(!cfg.render.display_children);
        assert_eq!(cfg.render.collapse, vec!["^load".to_string()]);
        assert_eq!(cfg.render.width, Some(9));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let ws = temp_workspace("malformed");
        let path = ws.join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "render = 3").expect("write");
        assert!(Config::load(&path).is_err());
        assert_eq!(Config::load_optional(&path), Config::default());
    }
}
