use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_LEVEL_ENV: &str = "CRM_AUTOSAVE_LOG_LEVEL";
const LOG_FILE_PREFIX: &str = "crm-autosave-";

/// Routes `tracing` output to a fresh timestamped file under the data dir.
///
/// Stdout and stderr are left to the session driver.
pub fn init_logging() -> anyhow::Result<PathBuf> {
    let log_dir = log_directory()?;
    fs::create_dir_all(&log_dir)?;

    let log_file_path = log_file_path(&log_dir);
    let file = fs::File::create(&log_file_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // Flushing worker must outlive main.
    std::mem::forget(guard);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(build_log_filter(std::env::var(LOG_LEVEL_ENV).ok().as_deref()))
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging initialized. Log file: {}", log_file_path.display());

    Ok(log_file_path)
}

fn build_log_filter(raw_level: Option<&str>) -> EnvFilter {
    let level = raw_level.and_then(normalize_log_level).unwrap_or("warn");
    EnvFilter::new(format!("{level},crm_autosave={level}"))
}

fn normalize_log_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

pub fn log_directory() -> anyhow::Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("failed to determine local data directory"))?;
    Ok(data_dir.join("crm-autosave").join("logs"))
}

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    log_dir.join(format!("{LOG_FILE_PREFIX}{timestamp}.log"))
}

pub fn print_log_location(log_path: &Path) {
    eprintln!("log file: {}", log_path.display());
}

/// Newest log file in `log_dir`, if any.
pub fn recent_log_path(log_dir: &Path) -> Option<PathBuf> {
    let mut entries = fs::read_dir(log_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"))
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| {
        std::cmp::Reverse(entry.metadata().ok().and_then(|meta| meta.modified().ok()))
    });

    entries.into_iter().next().map(|entry| entry.path())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_log_directory() {
        let path = log_directory().unwrap();
        assert!(path.to_string_lossy().contains("crm-autosave"));
        assert!(path.ends_with("logs"));
    }

    #[test]
    fn test_log_file_path() {
        let path = log_file_path(Path::new("/tmp/test-logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("crm-autosave-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_normalize_log_level() {
        assert_eq!(normalize_log_level("TRACE"), Some("trace"));
        assert_eq!(normalize_log_level(" warning "), Some("warn"));
        assert_eq!(normalize_log_level("nope"), None);
    }

    #[test]
    fn test_build_log_filter_defaults_to_warn() {
        assert!(build_log_filter(None).to_string().contains("crm_autosave=warn"));
        assert!(
            build_log_filter(Some("verbose"))
                .to_string()
                .contains("crm_autosave=warn")
        );
        assert!(
            build_log_filter(Some("debug"))
                .to_string()
                .contains("crm_autosave=debug")
        );
    }

    #[test]
    fn test_recent_log_path_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(recent_log_path(dir.path()), None);

        fs::write(dir.path().join("other.log"), "").unwrap();
        let ours = dir.path().join("crm-autosave-2026-01-01_00-00-00.log");
        fs::write(&ours, "").unwrap();

        assert_eq!(recent_log_path(dir.path()), Some(ours));
    }
}
