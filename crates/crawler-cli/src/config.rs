//! Reads and writes `~/.crawler/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use crawler_runtime::PipelineConfig;
use crawler_types::CrawlerError;
use tracing::warn;

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    /// No file; built-in defaults.
    Defaults,
}

impl std::fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigOrigin::File(p) => write!(f, "{}", p.display()),
            ConfigOrigin::Defaults => write!(f, "built-in defaults"),
        }
    }
}

/// `~/.crawler/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".crawler").join("config.toml")
}

/// Load from `path`. `Ok(None)` when the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<PipelineConfig>, CrawlerError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| CrawlerError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| CrawlerError::InvalidConfig(format!("cannot parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Resolve the effective configuration.
///
/// An explicit path must exist. Without one, the default path is tried and
/// built-in defaults fill in when it is absent. Environment overrides are
/// applied last in both cases.
pub fn resolve(explicit: Option<&Path>) -> Result<(PipelineConfig, ConfigOrigin), CrawlerError> {
    let (mut cfg, origin) = match explicit {
        Some(path) => {
            let cfg = load_from(path)?
                .ok_or_else(|| CrawlerError::InvalidConfig(format!("{} does not exist", path.display())))?;
            (cfg, ConfigOrigin::File(path.to_path_buf()))
        }
        None => {
            let path = config_path();
            match load_from(&path)? {
                Some(cfg) => (cfg, ConfigOrigin::File(path)),
                None => (PipelineConfig::default(), ConfigOrigin::Defaults),
            }
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, origin))
}

/// Apply `CRAWLER_*` environment overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `CRAWLER_ROBOT_ID` | `robot_id` |
/// | `CRAWLER_BUILDER` | `builder` (`motion_edge` / `depth_fusion`) |
/// | `CRAWLER_STRATEGY` | `strategy` (`hazard` / `climb`) |
/// | `CRAWLER_FPS` | `fps` |
pub fn apply_env_overrides(cfg: &mut PipelineConfig) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Unparseable values are ignored with a warning.
pub(crate) fn apply_overrides_from(cfg: &mut PipelineConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CRAWLER_ROBOT_ID") {
        cfg.robot_id = v;
    }
    if let Some(v) = lookup("CRAWLER_BUILDER") {
        match v.parse() {
            Ok(kind) => cfg.builder = kind,
            Err(e) => warn!(error = %e, "ignoring CRAWLER_BUILDER"),
        }
    }
    if let Some(v) = lookup("CRAWLER_STRATEGY") {
        match v.parse() {
            Ok(kind) => cfg.strategy = kind,
            Err(e) => warn!(error = %e, "ignoring CRAWLER_STRATEGY"),
        }
    }
    if let Some(v) = lookup("CRAWLER_FPS") {
        match v.parse::<f32>() {
            Ok(fps) => cfg.fps = fps,
            Err(e) => warn!(value = %v, error = %e, "ignoring CRAWLER_FPS"),
        }
    }
}

/// Write `cfg` to `path`, creating parent directories.
pub(crate) fn save_to(cfg: &PipelineConfig, path: &Path) -> Result<(), CrawlerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CrawlerError::InvalidConfig(format!("cannot create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| CrawlerError::Serialization(e.to_string()))?;
    fs::write(path, raw).map_err(|e| CrawlerError::InvalidConfig(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crawler_runtime::{BuilderKind, StrategyKind};

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_round_trips_through_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&PipelineConfig::default(), &path)?;
        let loaded = load_from(&path)?.ok_or("config missing")?;
        assert_eq!(loaded, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn missing_file_is_none() -> Result<(), CrawlerError> {
        assert!(load_from(Path::new("/definitely/not/here/config.toml"))?.is_none());
        Ok(())
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = resolve(Some(Path::new("/definitely/not/here/config.toml"))).unwrap_err();
        assert!(matches!(err, CrawlerError::InvalidConfig(_)));
    }

    #[test]
    fn partial_file_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("crawler.toml");
        fs::write(&path, "robot_id = \"R7\"\n[pipeline]\nstale_after_ms = 250\n")?;
        let cfg = load_from(&path)?.ok_or("config missing")?;
        assert_eq!(cfg.robot_id, "R7");
        assert_eq!(cfg.pipeline.stale_after_ms, 250);
        assert_eq!(cfg.pipeline.command_capacity, 256);
        assert_eq!(cfg.fps, 15.0);
        Ok(())
    }

    #[test]
    fn garbage_file_is_invalid_config() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("crawler.toml");
        fs::write(&path, "fps = \"fast\"")?;
        assert!(matches!(load_from(&path), Err(CrawlerError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn config_path_points_to_crawler_dir() {
        let p = config_path_for_home("/home/robot");
        assert_eq!(p, PathBuf::from("/home/robot/.crawler/config.toml"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = PipelineConfig::default();
        apply_overrides_from(
            &mut cfg,
            env(&[
                ("CRAWLER_ROBOT_ID", "SCOUT-2"),
                ("CRAWLER_BUILDER", "depth_fusion"),
                ("CRAWLER_STRATEGY", "hazard"),
                ("CRAWLER_FPS", "30"),
            ]),
        );
        assert_eq!(cfg.robot_id, "SCOUT-2");
        assert_eq!(cfg.builder, BuilderKind::DepthFusion);
        assert_eq!(cfg.strategy, StrategyKind::Hazard);
        assert_eq!(cfg.fps, 30.0);
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let mut cfg = PipelineConfig::default();
        apply_overrides_from(&mut cfg, env(&[("CRAWLER_BUILDER", "lidar"), ("CRAWLER_FPS", "many")]));
        assert_eq!(cfg.builder, BuilderKind::MotionEdge);
        assert_eq!(cfg.fps, 15.0);
    }
}
