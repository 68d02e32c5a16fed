//! PID file creation, deletion, and duplicate detection tests.

use logtail_daemon::pid_file::{remove_pid_file, write_pid_file};
use tempfile::TempDir;

#[test]
fn test_pid_file_contains_current_pid() {
    // Given: A temp directory for PID file
    let temp_dir = TempDir::new().expect("should create temp dir");
    let pid_path = temp_dir.path().join("logtail.pid");

    // When: Writing PID file
    write_pid_file(&pid_path).expect("should write PID file");

    // Then: File should exist with correct PID
    let content = std::fs::read_to_string(&pid_path).expect("should read PID file");
    assert_eq!(content.trim(), std::process::id().to_string());
}

#[test]
fn test_pid_file_rejects_second_instance() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let pid_path = temp_dir.path().join("logtail.pid");
    std::fs::write(&pid_path, "12345\n").expect("should write existing PID file");

    let err = write_pid_file(&pid_path).expect_err("existing PID file must be rejected");

    assert!(err.to_string().contains("12345"));
    // The existing file is left untouched
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "12345\n");
}

#[test]
fn test_pid_file_creates_parent_directory() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let pid_path = temp_dir.path().join("run").join("logtail").join("logtail.pid");

    write_pid_file(&pid_path).expect("should create parent directories");
    assert!(pid_path.exists());
}

#[cfg(unix)]
#[test]
fn test_pid_file_permissions_are_restrictive() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let pid_path = temp_dir.path().join("logtail.pid");
    write_pid_file(&pid_path).expect("should write PID file");

    let mode = std::fs::metadata(&pid_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_pid_file_remove_allows_restart() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let pid_path = temp_dir.path().join("logtail.pid");

    write_pid_file(&pid_path).expect("first write");
    remove_pid_file(&pid_path);
    assert!(!pid_path.exists());

    write_pid_file(&pid_path).expect("write after removal");
}

#[test]
fn test_pid_file_remove_missing_is_not_fatal() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    remove_pid_file(&temp_dir.path().join("missing.pid"));
}
