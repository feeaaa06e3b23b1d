//! Per-user directories for the configuration file and logs.
use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "moki";

/// A moki directory resolved from the XDG base directory variables, then the
/// platform default, then a path under the home directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppDir {
    /// Holds `moki.yml`.
    Config,
    /// Holds `moki.log`.
    Data,
}

impl AppDir {
    fn env_var(self) -> &'static str {
        match self {
            AppDir::Config => "XDG_CONFIG_HOME",
            AppDir::Data => "XDG_DATA_HOME",
        }
    }

    fn platform_base(self) -> Option<PathBuf> {
        match self {
            AppDir::Config => dirs::config_dir(),
            AppDir::Data => dirs::data_local_dir(),
        }
    }

    fn home_base(self) -> &'static str {
        match self {
            AppDir::Config => "~/.config",
            AppDir::Data => "~/.local/share",
        }
    }

    fn resolve(self, xdg_base: Option<OsString>) -> PathBuf {
        xdg_base
            .filter(|base| !base.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.platform_base())
            .unwrap_or_else(|| PathBuf::from(shellexpand::tilde(self.home_base()).as_ref()))
            .join(APP_DIR)
    }

    /// Resolves the directory without touching the file system.
    pub fn path(self) -> PathBuf {
        self.resolve(std::env::var_os(self.env_var()))
    }

    /// Resolves the directory and creates it when missing.
    pub fn ensure(self) -> std::io::Result<PathBuf> {
        let path = self.path();
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xdg_base_wins() {
        let base = tempfile::tempdir().unwrap();
        let resolved = AppDir::Data.resolve(Some(base.path().as_os_str().to_owned()));
        assert_eq!(resolved, base.path().join("moki"));
    }

    #[test]
    fn test_empty_xdg_base_falls_back_to_platform() {
        let expected = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(shellexpand::tilde("~/.config").as_ref()))
            .join("moki");
        assert_eq!(AppDir::Config.resolve(Some(OsString::new())), expected);
        assert_eq!(AppDir::Config.resolve(None), expected);
    }

    #[test]
    fn test_config_and_data_dirs_differ() {
        assert_ne!(AppDir::Config.resolve(None), AppDir::Data.resolve(None));
    }
}
