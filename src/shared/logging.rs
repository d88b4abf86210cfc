use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize gateway logging (rolling file + console).
///
/// Falls back to console-only output when `log_dir` is not writable, which is
/// the normal case when the gateway runs as an unprivileged user.
pub fn init_service_logging(log_dir: &Path, service_name: &str) -> Result<(), anyhow::Error> {
    // RUST_LOG wins; otherwise keep the gateway at info and silence noisy deps
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bollard=warn,hyper=warn,tungstenite=warn"));

    let write_check = log_dir.join(".test_write");
    let can_write_logs = std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&write_check))
        .map(|_| std::fs::remove_file(&write_check))
        .is_ok();

    let (non_blocking_stdout, guard_stdout) = non_blocking(std::io::stdout());

    if can_write_logs {
        use tracing_appender::rolling;

        let _ = rotate_logs_on_startup(log_dir, service_name);

        let file_appender = rolling::daily(log_dir, format!("{service_name}.log"));
        let (non_blocking_file, guard_file) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init()?;

        // Guards must outlive every log call
        std::mem::forget(guard_file);
        std::mem::forget(guard_stdout);

        info!(
            "Logging initialized - logs will be written to {}/{service_name}.log",
            log_dir.display()
        );
    } else {
        let console_layer = fmt::layer()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;

        std::mem::forget(guard_stdout);

        info!(
            "Logging initialized - console output only (could not write to {})",
            log_dir.display()
        );
    }

    Ok(())
}

pub fn rotate_logs_on_startup(log_dir: &Path, service_name: &str) -> Result<(), anyhow::Error> {
    let log_path = log_dir.join(format!("{service_name}.log"));

    if log_path.exists() {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup = log_dir.join(format!("{service_name}.{timestamp}.log"));

        std::fs::rename(&log_path, &backup)?;
        info!("Previous log file backed up to: {}", backup.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_moves_previous_log_aside() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("diffbox_api.log"), "old").unwrap();

        rotate_logs_on_startup(dir.path(), "diffbox_api").unwrap();

        assert!(!dir.path().join("diffbox_api.log").exists());
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("diffbox_api."))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn rotation_without_previous_log_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        rotate_logs_on_startup(dir.path(), "diffbox_api").unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn logging_installs_once_with_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        init_service_logging(&log_dir, "diffbox_api").unwrap();
        assert!(log_dir.is_dir());
        assert!(!log_dir.join(".test_write").exists());

        // A second subscriber is rejected, on the console-only path too
        let not_a_dir = dir.path().join("plain-file");
        std::fs::write(&not_a_dir, "x").unwrap();
        assert!(init_service_logging(&not_a_dir, "diffbox_api").is_err());
    }
}
