//! Configuration Vault – reads/writes `~/.foxbridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use foxbridge_runtime::BridgeSettings;
use foxbridge_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Largest camera resolution the operator may pick.
pub const MAX_CAMERA_WIDTH: u32 = 1280;
pub const MAX_CAMERA_HEIGHT: u32 = 800;

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Foxglove WebSocket port.
    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_camera_side")]
    pub camera_width: u32,

    #[serde(default = "default_camera_side")]
    pub camera_height: u32,

    /// Transform-tree root path.
    #[serde(default = "default_tf_root")]
    pub tf_root: String,

    /// Demo simulation rate in ticks per second.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

fn default_port() -> u16 {
    8765
}
fn default_camera_side() -> u32 {
    128
}
fn default_tf_root() -> String {
    "/".to_string()
}
fn default_tick_hz() -> u32 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_port(),
            camera_width: default_camera_side(),
            camera_height: default_camera_side(),
            tf_root: default_tf_root(),
            tick_hz: default_tick_hz(),
        }
    }
}

impl Config {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), BridgeError> {
        validate_resolution(self.camera_width, self.camera_height)?;
        if self.tick_hz == 0 {
            return Err(BridgeError::Config("tick_hz must be at least 1".to_string()));
        }
        if !self.tf_root.starts_with('/') {
            return Err(BridgeError::Config(format!(
                "tf_root must be an absolute path, got {:?}",
                self.tf_root
            )));
        }
        Ok(())
    }

    /// Runtime settings for the bridge.
    pub fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            port: self.server_port,
            camera_width: self.camera_width,
            camera_height: self.camera_height,
            tf_root: Some(self.tf_root.clone()),
        }
    }
}

/// Check a camera resolution against the operator bounds.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] when either side is out of range.
pub fn validate_resolution(width: u32, height: u32) -> Result<(), BridgeError> {
    if !(1..=MAX_CAMERA_WIDTH).contains(&width) {
        return Err(BridgeError::Config(format!(
            "camera_width must be in 1..={MAX_CAMERA_WIDTH}, got {width}"
        )));
    }
    if !(1..=MAX_CAMERA_HEIGHT).contains(&height) {
        return Err(BridgeError::Config(format!(
            "camera_height must be in 1..={MAX_CAMERA_HEIGHT}, got {height}"
        )));
    }
    Ok(())
}

/// Return the path to `~/.foxbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".foxbridge").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, BridgeError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `FOXBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FOXBRIDGE_PORT` | `server_port` |
/// | `FOXBRIDGE_CAMERA_WIDTH` | `camera_width` |
/// | `FOXBRIDGE_CAMERA_HEIGHT` | `camera_height` |
/// | `FOXBRIDGE_TF_ROOT` | `tf_root` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("FOXBRIDGE_PORT").and_then(|v| v.parse().ok()) {
        cfg.server_port = port;
    }
    if let Some(width) = var("FOXBRIDGE_CAMERA_WIDTH").and_then(|v| v.parse().ok()) {
        cfg.camera_width = width;
    }
    if let Some(height) = var("FOXBRIDGE_CAMERA_HEIGHT").and_then(|v| v.parse().ok()) {
        cfg.camera_height = height;
    }
    if let Some(root) = var("FOXBRIDGE_TF_ROOT") {
        cfg.tf_root = root;
    }
}

/// Save the config, creating `~/.foxbridge/` if necessary.
pub fn save(cfg: &Config) -> Result<(), BridgeError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| BridgeError::Config(format!("failed to set directory permissions: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
    write_private(path, raw.as_bytes())
        .map_err(|e| BridgeError::Config(format!("failed to write {}: {e}", path.display())))
}

/// Write with owner-only read/write (rw-------).
#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_operator_panel() {
        let cfg = Config::default();
        assert_eq!(cfg.server_port, 8765);
        assert_eq!((cfg.camera_width, cfg.camera_height), (128, 128));
        assert_eq!(cfg.tf_root, "/");
        assert_eq!(cfg.tick_hz, 60);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            server_port: 9001,
            camera_width: 640,
            camera_height: 480,
            tf_root: "/World/Robot".to_string(),
            tick_hz: 30,
        };
        save_to(&cfg, &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_port = 9100\n").expect("write");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.server_port, 9100);
        assert_eq!(loaded.camera_width, 128);
        assert_eq!(loaded.tf_root, "/");
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_rejects_out_of_range_resolution() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "camera_width = 4096\n").expect("write");
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_port = [").expect("write");
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_foxbridge_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.foxbridge/config.toml"));
    }

    #[test]
    fn overrides_replace_fields() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("FOXBRIDGE_PORT", "9999"),
                ("FOXBRIDGE_CAMERA_WIDTH", "320"),
                ("FOXBRIDGE_CAMERA_HEIGHT", "240"),
                ("FOXBRIDGE_TF_ROOT", "/World"),
            ]),
        );
        assert_eq!(cfg.server_port, 9999);
        assert_eq!((cfg.camera_width, cfg.camera_height), (320, 240));
        assert_eq!(cfg.tf_root, "/World");
    }

    #[test]
    fn overrides_ignore_unparsable_values() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, vars(&[("FOXBRIDGE_PORT", "not-a-port"), ("FOXBRIDGE_CAMERA_WIDTH", "-1")]));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn validation_bounds() {
        assert!(validate_resolution(1, 1).is_ok());
        assert!(validate_resolution(MAX_CAMERA_WIDTH, MAX_CAMERA_HEIGHT).is_ok());
        assert!(validate_resolution(0, 128).is_err());
        assert!(validate_resolution(128, MAX_CAMERA_HEIGHT + 1).is_err());

        let cfg = Config {
            tf_root: "World".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            tick_hz: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn settings_carry_every_bridge_field() {
        let settings = Config::default().settings();
        assert_eq!(settings.port, 8765);
        assert_eq!((settings.camera_width, settings.camera_height), (128, 128));
        assert_eq!(settings.tf_root.as_deref(), Some("/"));
    }
}
