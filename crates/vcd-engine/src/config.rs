//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use vcd_process::{SupervisorOptions, Toolbox};

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./vcd-data";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Working directory of the P-VCD tools
    pub data_dir: PathBuf,
    /// Reference databases, one subdirectory each
    pub databases_dir: PathBuf,
    /// Content-addressed query databases
    pub queries_dir: PathBuf,
    /// Search profiles, one per reference/query pair
    pub searches_dir: PathBuf,
    /// Downloaded query media
    pub downloads_dir: PathBuf,
    /// Directory holding the P-VCD executables
    pub tools_dir: PathBuf,
    pub wget_bin: PathBuf,
    pub youtube_dl_bin: PathBuf,
    /// Values above 1 are passed to the tools as `-num_cores`
    pub max_cores: usize,
    /// Interval between cancellation attempts
    pub kill_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_data_dir(DEFAULT_DATA_DIR)
    }
}

impl EngineConfig {
    /// Every directory under `data_dir`, default tool names.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            databases_dir: data_dir.join("databases"),
            queries_dir: data_dir.join("queries"),
            searches_dir: data_dir.join("searches"),
            downloads_dir: data_dir.join("downloads"),
            tools_dir: data_dir.join("bin"),
            wget_bin: PathBuf::from("wget"),
            youtube_dl_bin: PathBuf::from("youtube-dl"),
            max_cores: 1,
            kill_interval: Duration::from_millis(500),
            data_dir,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_env_in(None)
    }

    /// Like [`EngineConfig::from_env`], with `data_dir` taking precedence over
    /// `VCD_DATA_DIR`. Every other variable still applies.
    pub fn from_env_in(data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir
            .or_else(|| env_path("VCD_DATA_DIR"))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let defaults = Self::with_data_dir(data_dir);

        Self {
            databases_dir: env_path("VCD_DATABASES_DIR").unwrap_or(defaults.databases_dir),
            queries_dir: env_path("VCD_QUERIES_DIR").unwrap_or(defaults.queries_dir),
            searches_dir: env_path("VCD_SEARCHES_DIR").unwrap_or(defaults.searches_dir),
            downloads_dir: env_path("VCD_DOWNLOADS_DIR").unwrap_or(defaults.downloads_dir),
            tools_dir: env_path("VCD_TOOLS_DIR").unwrap_or(defaults.tools_dir),
            wget_bin: env_path("VCD_WGET_BIN").unwrap_or(defaults.wget_bin),
            youtube_dl_bin: env_path("VCD_YOUTUBE_DL_BIN").unwrap_or(defaults.youtube_dl_bin),
            max_cores: std::env::var("VCD_MAX_CORES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            kill_interval: Duration::from_millis(
                std::env::var("VCD_KILL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            data_dir: defaults.data_dir,
        }
    }

    /// Tool locations and global flags.
    pub fn toolbox(&self) -> Toolbox {
        Toolbox::new(&self.tools_dir, &self.data_dir)
            .with_wget(&self.wget_bin)
            .with_youtube_dl(&self.youtube_dl_bin)
            .with_max_cores(self.max_cores)
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions::default().kill_interval(self.kill_interval)
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_data_dir_layout() {
        let config = EngineConfig::with_data_dir("/srv/vcd");
        assert_eq!(config.databases_dir, Path::new("/srv/vcd/databases"));
        assert_eq!(config.queries_dir, Path::new("/srv/vcd/queries"));
        assert_eq!(config.searches_dir, Path::new("/srv/vcd/searches"));
        assert_eq!(config.downloads_dir, Path::new("/srv/vcd/downloads"));
        assert_eq!(config.tools_dir, Path::new("/srv/vcd/bin"));
        assert_eq!(config.max_cores, 1);
        assert_eq!(config.kill_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_explicit_data_dir_keeps_env_settings() {
        std::env::set_var("VCD_MAX_CORES", "6");
        std::env::set_var("VCD_KILL_INTERVAL_MS", "250");
        std::env::set_var("VCD_DATA_DIR", "/ignored");
        let config = EngineConfig::from_env_in(Some(PathBuf::from("/srv/override")));
        std::env::remove_var("VCD_MAX_CORES");
        std::env::remove_var("VCD_KILL_INTERVAL_MS");
        std::env::remove_var("VCD_DATA_DIR");

        assert_eq!(config.data_dir, Path::new("/srv/override"));
        assert_eq!(config.databases_dir, Path::new("/srv/override/databases"));
        assert_eq!(config.tools_dir, Path::new("/srv/override/bin"));
        assert_eq!(config.max_cores, 6);
        assert_eq!(config.kill_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_toolbox_uses_config() {
        let mut config = EngineConfig::with_data_dir("/srv/vcd");
        config.max_cores = 8;
        let toolbox = config.toolbox();
        assert_eq!(toolbox.data_dir(), Path::new("/srv/vcd"));
        assert_eq!(toolbox.max_cores(), 8);
    }
}
