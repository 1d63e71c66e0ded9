//! Atomic PID file I/O operations.
//!
//! Format: Three-line text file
//! ```text
//! <pid>
//! <port>
//! <launch command>
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use myco_core::DependencyRole;

/// PID file content parsed from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFileData {
    pub pid: u32,
    pub port: u16,
    /// Rendered launch command, used to recognise the process later.
    pub command: String,
}

fn pidfile_path(dir: &Path, role: DependencyRole) -> PathBuf {
    dir.join(format!("{}.pid", role.slug()))
}

/// Write PID file atomically using temp file + rename.
///
/// # File naming
/// `<role>.pid` (e.g., `server2.pid`)
pub fn write_pidfile(dir: &Path, role: DependencyRole, data: &PidFileData) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let final_path = pidfile_path(dir, role);
    let temp_path = dir.join(format!("{}.pid.tmp", role.slug()));

    let content = format!("{}\n{}\n{}\n", data.pid, data.port, data.command);
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, &final_path)?;

    Ok(final_path)
}

/// Read PID file content.
pub fn read_pidfile(dir: &Path, role: DependencyRole) -> io::Result<PidFileData> {
    let content = fs::read_to_string(pidfile_path(dir, role))?;
    parse_pidfile_content(&content)
}

/// Delete PID file (idempotent - no error if missing).
pub fn delete_pidfile(dir: &Path, role: DependencyRole) -> io::Result<()> {
    match fs::remove_file(pidfile_path(dir, role)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// List all PID files in the directory.
///
/// Returns `(role, PidFileData)` pairs for successfully parsed files.
/// Silently ignores malformed files and unknown roles.
pub fn list_pidfiles(dir: &Path) -> io::Result<Vec<(DependencyRole, PidFileData)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().and_then(|s| s.to_str()) != Some("pid") {
            continue;
        }

        let Some(role) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(DependencyRole::from_slug)
        else {
            continue;
        };

        if let Ok(content) = fs::read_to_string(&path)
            && let Ok(data) = parse_pidfile_content(&content)
        {
            results.push((role, data));
        }
    }

    results.sort_by_key(|(role, _)| *role);
    Ok(results)
}

fn parse_pidfile_content(content: &str) -> io::Result<PidFileData> {
    let mut lines = content.lines();

    let pid = lines
        .next()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing or invalid PID"))?;

    let port = lines
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing or invalid port"))?;

    let command = lines.next().unwrap_or_default().trim().to_string();

    Ok(PidFileData { pid, port, command })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PidFileData {
        PidFileData {
            pid: 98765,
            port: 3004,
            command: "just server2".to_string(),
        }
    }

    #[test]
    fn write_read_delete_pidfile() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_pidfile(dir.path(), DependencyRole::Server2, &sample())
            .expect("write failed");
        assert!(path.ends_with("server2.pid"));
        assert!(path.exists());

        let data = read_pidfile(dir.path(), DependencyRole::Server2).expect("read failed");
        assert_eq!(data, sample());

        delete_pidfile(dir.path(), DependencyRole::Server2).expect("delete failed");
        assert!(!path.exists());

        // Second delete should be idempotent
        delete_pidfile(dir.path(), DependencyRole::Server2).expect("second delete failed");
    }

    #[test]
    fn list_pidfiles_filters_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        write_pidfile(dir.path(), DependencyRole::Server1, &sample()).unwrap();

        fs::write(dir.path().join("not_a_pid.txt"), "garbage").unwrap();
        fs::write(dir.path().join("server9.pid"), "1\n2\n").unwrap();
        fs::write(dir.path().join("server2.pid"), "not a pid\n").unwrap();

        let list = list_pidfiles(dir.path()).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].0, DependencyRole::Server1);
    }

    #[test]
    fn list_pidfiles_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = list_pidfiles(&dir.path().join("absent")).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn two_line_files_parse_without_command() {
        let data = parse_pidfile_content("42\n3002\n").unwrap();
        assert_eq!(data.pid, 42);
        assert_eq!(data.port, 3002);
        assert!(data.command.is_empty());
    }
}
