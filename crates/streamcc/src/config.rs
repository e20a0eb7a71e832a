//! Engine configuration: chained setters plus `key=value` file parsing.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Which buffering backend stages updates between the stream and the
/// sketches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GutterSystem {
    /// Fully in-memory per-vertex buffers.
    Standalone,
    /// Disk-spilling buffers under `disk_dir`.
    GutterTree,
    /// Disk-spilling buffers with a batch-sized in-memory stage.
    CacheTree,
}

impl fmt::Display for GutterSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GutterSystem::Standalone => write!(f, "StandAloneGutters"),
            GutterSystem::GutterTree => write!(f, "GutterTree"),
            GutterSystem::CacheTree => write!(f, "CacheTree"),
        }
    }
}

/// Tunables for a [`crate::Graph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfiguration {
    gutter_sys: GutterSystem,
    disk_dir: PathBuf,
    backup_in_mem: bool,
    num_groups: usize,
    group_size: usize,
    gutter_factor: f64,
}

impl Default for GraphConfiguration {
    fn default() -> Self {
        Self {
            gutter_sys: GutterSystem::Standalone,
            disk_dir: std::env::temp_dir(),
            backup_in_mem: true,
            num_groups: 1,
            group_size: 1,
            gutter_factor: 1.0,
        }
    }
}

impl GraphConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose the buffering backend.
    pub fn gutter_sys(mut self, sys: GutterSystem) -> Self {
        self.gutter_sys = sys;
        self
    }

    /// Directory for backing files: gutter spills and disk backups.
    pub fn disk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = dir.into();
        self
    }

    /// Snapshot supernodes to RAM (`true`) or disk during continuation
    /// queries.
    pub fn backup_in_mem(mut self, in_mem: bool) -> Self {
        self.backup_in_mem = in_mem;
        self
    }

    /// Number of graph worker threads draining gutter batches.
    pub fn num_groups(mut self, num_groups: usize) -> Self {
        self.num_groups = if num_groups < 1 {
            tracing::warn!("num_groups={num_groups} is out of bounds, defaulting to 1");
            1
        } else {
            num_groups
        };
        self
    }

    /// Threads available to each worker for delta-sketch construction.
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.group_size = if group_size < 1 {
            tracing::warn!("group_size={group_size} is out of bounds, defaulting to 1");
            1
        } else {
            group_size
        };
        self
    }

    /// Scales the per-vertex batch size; larger amortizes more.
    pub fn gutter_factor(mut self, factor: f64) -> Self {
        self.gutter_factor = if factor <= 0.0 {
            tracing::warn!("gutter_factor={factor} is out of bounds, defaulting to 1");
            1.0
        } else {
            factor
        };
        self
    }

    /// Parse a `key=value` configuration file. Lines starting with `#`
    /// and blank lines are skipped; unknown keys warn and are ignored.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!("{}:{}: not a key=value line, skipped", path.display(), lineno + 1);
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "buffering_system" => {
                    config.gutter_sys = match value {
                        "standalone" => GutterSystem::Standalone,
                        "tree" => GutterSystem::GutterTree,
                        "cachetree" => GutterSystem::CacheTree,
                        other => {
                            return Err(GraphError::Config(format!(
                                "unknown buffering_system '{other}'"
                            )))
                        }
                    }
                }
                "disk_dir" => config.disk_dir = PathBuf::from(value),
                "backup_in_mem" => {
                    config.backup_in_mem = match value {
                        "ON" => true,
                        "OFF" => false,
                        other => {
                            return Err(GraphError::Config(format!(
                                "backup_in_mem must be ON or OFF, got '{other}'"
                            )))
                        }
                    }
                }
                "num_groups" => match value.parse::<usize>() {
                    Ok(v) => config = config.num_groups(v),
                    Err(_) => {
                        tracing::warn!("num_groups='{value}' is not an integer, keeping default")
                    }
                },
                "group_size" => match value.parse::<usize>() {
                    Ok(v) => config = config.group_size(v),
                    Err(_) => {
                        tracing::warn!("group_size='{value}' is not an integer, keeping default")
                    }
                },
                other => tracing::warn!("unknown configuration key '{other}', skipped"),
            }
        }
        Ok(config)
    }

    pub fn get_gutter_sys(&self) -> GutterSystem {
        self.gutter_sys
    }

    pub fn get_disk_dir(&self) -> &Path {
        &self.disk_dir
    }

    pub fn get_backup_in_mem(&self) -> bool {
        self.backup_in_mem
    }

    pub fn get_num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn get_group_size(&self) -> usize {
        self.group_size
    }

    pub fn get_gutter_factor(&self) -> f64 {
        self.gutter_factor
    }
}

impl fmt::Display for GraphConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "streamcc configuration:")?;
        writeln!(f, " Guttering system      = {}", self.gutter_sys)?;
        writeln!(f, " Number of groups      = {}", self.num_groups)?;
        writeln!(f, " Size of groups        = {}", self.group_size)?;
        writeln!(f, " On disk data location = {}", self.disk_dir.display())?;
        write!(
            f,
            " Backup sketch to RAM  = {}",
            if self.backup_in_mem { "ON" } else { "OFF" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn out_of_bounds_values_clamp_to_one() {
        let c = GraphConfiguration::new().num_groups(0).group_size(0);
        assert_eq!(c.get_num_groups(), 1);
        assert_eq!(c.get_group_size(), 1);
    }

    #[test]
    fn parses_a_configuration_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# streaming config").unwrap();
        writeln!(f, "buffering_system = tree").unwrap();
        writeln!(f, "disk_dir = /tmp/streamcc_data").unwrap();
        writeln!(f, "backup_in_mem = OFF").unwrap();
        writeln!(f, "num_groups = 4").unwrap();
        writeln!(f, "group_size = 2").unwrap();
        writeln!(f, "mystery_knob = 9").unwrap();
        f.flush().unwrap();

        let c = GraphConfiguration::from_file(f.path()).unwrap();
        assert_eq!(c.get_gutter_sys(), GutterSystem::GutterTree);
        assert_eq!(c.get_disk_dir(), Path::new("/tmp/streamcc_data"));
        assert!(!c.get_backup_in_mem());
        assert_eq!(c.get_num_groups(), 4);
        assert_eq!(c.get_group_size(), 2);
    }

    #[test]
    fn rejects_bad_enum_values() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "buffering_system = btree").unwrap();
        f.flush().unwrap();
        assert!(matches!(
            GraphConfiguration::from_file(f.path()),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn display_dumps_every_knob() {
        let c = GraphConfiguration::new().num_groups(2);
        let dump = c.to_string();
        assert!(dump.contains("StandAloneGutters"));
        assert!(dump.contains("Number of groups      = 2"));
    }
}
