use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base_dir.join("db")
    }

    /// Temp downloads and decompressed payloads; entries are private to a
    /// single task run and deleted when that run finishes.
    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn task_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("tasks")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.task_logs_dir())?;
        Ok(())
    }
}
