//! Integration tests for the orgboard CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_OVERRIDES: &[&str] = &[
    "ORGBOARD_CONFIG",
    "ORGBOARD_HOST",
    "ORGBOARD_PORT",
    "ORGBOARD_DB_PATH",
    "ORGBOARD_MEDIA_DIR",
    "ORGBOARD_AI_MODEL",
    "ORGBOARD_LOG",
    "GEMINI_API_KEY",
];

/// An orgboard command running in `dir` with no environment overrides.
fn orgboard(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("orgboard");
    cmd.current_dir(dir.path());
    for key in ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = temp_dir();
        orgboard(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"))
            .stdout(predicate::str::contains("summary"));
    }

    #[test]
    fn test_version() {
        let dir = temp_dir();
        orgboard(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("orgboard"));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = temp_dir();
        orgboard(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Database Tests
// =============================================================================

mod database {
    use super::*;

    #[test]
    fn test_init_db_creates_file() {
        let dir = temp_dir();
        orgboard(&dir)
            .args(["init-db", "--db-path", "data/board.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized at"));

        assert!(dir.path().join("data/board.db").exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = temp_dir();
        orgboard(&dir).arg("init-db").assert().success();
        orgboard(&dir).arg("init-db").assert().success();
        assert!(dir.path().join("orgboard.db").exists());
    }

    #[test]
    fn test_init_db_uses_configured_path() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("orgboard.toml"),
            "[database]\npath = \"configured.db\"\n",
        )
        .unwrap();

        orgboard(&dir).arg("init-db").assert().success();
        assert!(dir.path().join("configured.db").exists());
    }

    #[test]
    fn test_db_path_from_environment() {
        let dir = temp_dir();
        orgboard(&dir)
            .env("ORGBOARD_DB_PATH", "from-env.db")
            .arg("init-db")
            .assert()
            .success();
        assert!(dir.path().join("from-env.db").exists());
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = temp_dir();
        orgboard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 8080"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = temp_dir();
        orgboard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created orgboard.toml"));

        let content = fs::read_to_string(dir.path().join("orgboard.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("[media]"));
    }

    #[test]
    fn test_config_init_keeps_existing_file() {
        let dir = temp_dir();
        fs::write(dir.path().join("orgboard.toml"), "[server]\nport = 9000\n").unwrap();

        orgboard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join("orgboard.toml")).unwrap();
        assert_eq!(content, "[server]\nport = 9000\n");
    }

    #[test]
    fn test_config_show_reads_custom_path() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("custom.toml"),
            "[server]\nport = 9123\n\n[ai]\nmodel = \"gemini-test\"\n",
        )
        .unwrap();

        orgboard(&dir)
            .args(["--config", "custom.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9123"))
            .stdout(predicate::str::contains("gemini-test"));
    }

    #[test]
    fn test_config_show_masks_api_key() {
        let dir = temp_dir();
        orgboard(&dir)
            .env("GEMINI_API_KEY", "super-secret-key")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("super-secret-key").not())
            .stdout(predicate::str::contains("********"));
    }

    #[test]
    fn test_config_validate_warns_without_api_key() {
        let dir = temp_dir();
        orgboard(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("AI summaries are disabled"));
    }

    #[test]
    fn test_config_validate_with_api_key() {
        let dir = temp_dir();
        orgboard(&dir)
            .env("GEMINI_API_KEY", "key")
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_rejects_invalid_toml() {
        let dir = temp_dir();
        fs::write(dir.path().join("orgboard.toml"), "[server\nport = ").unwrap();

        orgboard(&dir).args(["config", "show"]).assert().failure();
    }
}

// =============================================================================
// Summary Tests
// =============================================================================

mod summary {
    use super::*;

    #[test]
    fn test_summary_requires_database() {
        let dir = temp_dir();
        orgboard(&dir)
            .args(["summary", "--board", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Run 'orgboard init-db' first"));
    }

    #[test]
    fn test_summary_unknown_board_fails() {
        let dir = temp_dir();
        orgboard(&dir).arg("init-db").assert().success();

        orgboard(&dir)
            .args(["summary", "--board", "42"])
            .assert()
            .failure();
    }
}
