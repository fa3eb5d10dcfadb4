#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const LEGACY_LEDGER: &str = r#"{
  "vpc_name": "demo",
  "created_at": "2024-05-01T10:20:30.123456",
  "resources": [
    {"type": "vpc", "id": "vpc-0abc", "created_at": "2024-05-01T10:20:31.000001"},
    {"type": "internet_gateway", "id": "igw-0abc", "created_at": "2024-05-01T10:20:32.5", "vpc_id": "vpc-0abc"}
  ],
  "main_resources": {"vpc_id": "vpc-0abc"}
}"#;

/// An isolated working directory with its own state dir and no settings file
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("state")).unwrap();
        Self { root }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join("state")
    }

    pub fn write_ledger(&self, name: &str, content: &str) -> PathBuf {
        let path = self.state_dir().join(format!("{}_rollback.json", name));
        fs::write(&path, content).unwrap();
        path
    }

    /// `bastion` with AWS pointed at a fixed region and no instance metadata
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("bastion").unwrap();
        cmd.current_dir(self.root.path())
            .env_remove("BASTIONFLOW_CONFIG_PATH")
            .env_remove("BASTIONFLOW_DB_PASSWORD")
            .env("XDG_CONFIG_HOME", self.root.path())
            .env("BASTIONFLOW_STATE_DIR", self.state_dir())
            .env("AWS_REGION", "us-east-1")
            .env("AWS_EC2_METADATA_DISABLED", "true")
            .env("NO_COLOR", "1");
        cmd
    }
}
