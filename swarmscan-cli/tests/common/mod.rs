use assert_cmd::Command;
use tempfile::TempDir;

pub struct TestEnv {
    pub home_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            home_dir: TempDir::new().unwrap(),
        }
    }

    pub fn swarmscan(&self) -> Command {
        let mut cmd = Command::cargo_bin("swarmscan").unwrap();
        let path = self.home_dir.path();
        cmd.env("HOME", path);
        cmd.env("USERPROFILE", path);
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config file into the temp home and return its path.
    pub fn write_config(&self, body: &str) -> std::path::PathBuf {
        let path = self.home_dir.path().join("swarmscan.toml");
        std::fs::write(&path, body).unwrap();
        path
    }
}
