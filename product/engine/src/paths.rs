use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn platform_default() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::new(dir.join("audiofetch")))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir().join("settings.json")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base_dir.join("db")
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.db_dir().join("history.sqlite3")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.db_dir())?;
        Ok(())
    }
}

/// Directory of the running executable; used as the resources root when none
/// is configured.
pub fn executable_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dirs_creates_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().join("app"));
        paths.ensure_dirs().expect("ensure dirs");

        assert!(paths.config_dir().is_dir());
        assert!(paths.db_dir().is_dir());
        assert_eq!(
            paths.history_db_path(),
            dir.path().join("app").join("db").join("history.sqlite3")
        );
    }
}
