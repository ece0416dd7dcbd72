use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use console::Style;
use indicatif::ProgressStyle;
use indicatif::style::TemplateError;

use crate::error::ClearError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    as_millis(s.elapsed())
}

pub fn as_millis(duration: Duration) -> impl Display {
    let f = format!("(+{}ms)", duration.as_millis());
    ANSI_BLUE.apply_to(f)
}

pub(crate) fn get_style_build() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

pub(crate) fn get_style_task() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")
}

/// Installs the global subscriber: `RUST_LOG` if set, `default` otherwise,
/// with progress bars drawn by `tracing-indicatif` below the log lines.
#[cfg(feature = "logging")]
pub fn init_logging(default: &str) -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}

#[cfg(not(feature = "logging"))]
pub fn init_logging(_: &str) -> anyhow::Result<()> {
    Ok(())
}

/// Empties `dir`, keeping the entries named in `keep`. The directory itself
/// is created if missing.
pub fn clear_dir(dir: &Utf8Path, keep: &[&Utf8Path]) -> Result<(), ClearError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return fs::create_dir_all(dir).map_err(|e| ClearError::Create(dir.to_owned(), e));
        }
        Err(e) => return Err(ClearError::Remove(dir.to_owned(), e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| ClearError::Remove(dir.to_owned(), e))?;
        let Ok(path) = camino::Utf8PathBuf::try_from(entry.path()) else {
            continue;
        };

        if keep.iter().any(|keep| *keep == path) {
            continue;
        }

        let result = match entry.file_type() {
            Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
            _ => fs::remove_file(&path),
        };

        result.map_err(|e| ClearError::Remove(path, e))?;
    }

    Ok(())
}

/// Removes `dir` and everything below it, a missing directory is fine.
pub fn remove_dir(dir: &Utf8Path) -> Result<(), ClearError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClearError::Remove(dir.to_owned(), e)),
    }
}

/// Writes `bytes` to `path`, creating parent directories.
pub fn write_file(path: &Utf8Path, bytes: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn clear_keeps_listed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dist = Utf8Path::from_path(dir.path()).unwrap().join("dist");

        write_file(&dist.join(".git/HEAD"), "ref").unwrap();
        write_file(&dist.join("scripts/main.js"), "x").unwrap();
        write_file(&dist.join("index.html"), "x").unwrap();

        let git = dist.join(".git");
        clear_dir(&dist, &[&git]).unwrap();

        let left: Vec<Utf8PathBuf> = fs::read_dir(&dist)
            .unwrap()
            .map(|e| Utf8PathBuf::try_from(e.unwrap().path()).unwrap())
            .collect();

        assert_eq!(left, [git]);
        assert!(dist.join(".git/HEAD").exists());
    }

    #[test]
    fn clear_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dist = Utf8Path::from_path(dir.path()).unwrap().join("dist");

        clear_dir(&dist, &[]).unwrap();
        assert!(dist.is_dir());
    }

    #[test]
    fn remove_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = Utf8Path::from_path(dir.path()).unwrap().join(".tmp");
        assert!(remove_dir(&tmp).is_ok());
    }
}
