//! World configuration and argument parsing.

use std::ffi::OsString;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WorldError;

/// What happens to the children of a deleted entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildCleanup {
    /// Children are deleted with their parent.
    #[default]
    Cascade,
    /// Children lose their `(ChildOf, parent)` pair and become roots.
    Orphan,
}

/// Tunables of a [`World`](crate::World).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Worker threads. Accepted for compatibility; systems run on the caller.
    pub threads: usize,
    /// Frame rate `progress` paces itself to. `0` disables pacing.
    pub target_fps: f32,
    /// Request for a monitoring dashboard. Only logged.
    pub dashboard: bool,
    /// Upper bound on the number of archetypes.
    pub max_archetypes: usize,
    pub child_cleanup: ChildCleanup,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            target_fps: 0.0,
            dashboard: false,
            max_archetypes: 65_536,
            child_cleanup: ChildCleanup::Cascade,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tessera", about = "tessera world arguments")]
struct WorldArgs {
    /// Number of worker threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Target frames per second (0 = unpaced).
    #[arg(long, default_value_t = 0.0)]
    fps: f32,

    /// Enable the monitoring dashboard.
    #[arg(long)]
    dashboard: bool,

    /// Maximum number of archetypes.
    #[arg(long, default_value_t = 65_536)]
    max_archetypes: usize,

    /// Orphan children instead of deleting them with their parent.
    #[arg(long)]
    orphan_children: bool,
}

impl WorldConfig {
    /// Parses an argument vector. The first element is the program name.
    pub fn from_args<I, T>(args: I) -> Result<Self, WorldError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = WorldArgs::try_parse_from(args).map_err(|e| WorldError::Config(e.to_string()))?;
        let config = Self {
            threads: args.threads,
            target_fps: args.fps,
            dashboard: args.dashboard,
            max_archetypes: args.max_archetypes,
            child_cleanup: if args.orphan_children {
                ChildCleanup::Orphan
            } else {
                ChildCleanup::Cascade
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the values a world cannot run with.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.threads == 0 {
            return Err(WorldError::Config("threads must be at least 1".to_owned()));
        }
        if !(self.target_fps >= 0.0 && self.target_fps.is_finite()) {
            return Err(WorldError::Config(format!(
                "target fps must be a finite value >= 0, got {}",
                self.target_fps
            )));
        }
        Ok(())
    }

    /// Replaces invalid values with their defaults, logging each one.
    pub(crate) fn sanitized(mut self) -> Self {
        if self.threads == 0 {
            warn!("threads must be at least 1, using 1");
            self.threads = 1;
        }
        if !(self.target_fps >= 0.0 && self.target_fps.is_finite()) {
            warn!(target_fps = self.target_fps, "invalid target fps, pacing disabled");
            self.target_fps = 0.0;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_arguments() {
        let config = WorldConfig::from_args(["app"]).unwrap();
        assert_eq!(config, WorldConfig::default());
    }

    #[test]
    fn test_all_arguments() {
        let config = WorldConfig::from_args([
            "app",
            "--threads",
            "4",
            "--fps",
            "60",
            "--dashboard",
            "--max-archetypes",
            "128",
            "--orphan-children",
        ])
        .unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.target_fps, 60.0);
        assert!(config.dashboard);
        assert_eq!(config.max_archetypes, 128);
        assert_eq!(config.child_cleanup, ChildCleanup::Orphan);
    }

    #[test]
    fn test_unknown_argument_is_an_error() {
        let err = WorldConfig::from_args(["app", "--warp-speed"]).unwrap_err();
        assert!(matches!(err, WorldError::Config(_)));
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(WorldConfig::from_args(["app", "--threads", "0"]).is_err());
    }

    #[test]
    fn test_invalid_fps_is_rejected_or_sanitized() {
        assert!(WorldConfig::from_args(["app", "--fps", "-5"]).is_err());
        for fps in [f32::NAN, f32::INFINITY, -1.0] {
            let config = WorldConfig {
                target_fps: fps,
                threads: 0,
                ..WorldConfig::default()
            };
            assert!(config.validate().is_err());
            let config = config.sanitized();
            assert_eq!(config.target_fps, 0.0);
            assert_eq!(config.threads, 1);
            assert!(config.validate().is_ok());
        }
    }
}
