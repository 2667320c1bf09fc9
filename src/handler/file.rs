//! File archive handler.
//!
//! Appends one `path value timestamp` line per metric. The file is opened
//! lazily on first use and again after `close()`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, HandlerSettings};
use crate::handler::{Handler, HandlerError};
use crate::metric::Metric;

/// Options under `options:` for a `file` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOptions {
    /// Output file; parent directories are created on open.
    pub path: PathBuf,
}

/// Line-per-metric archive writer.
#[derive(Debug)]
pub struct FileHandler {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileHandler {
    /// # Errors
    /// Returns `ConfigError` if `options.path` is missing or empty.
    pub fn from_settings(settings: &HandlerSettings) -> Result<Self, ConfigError> {
        let options: FileOptions = settings.options()?;
        if options.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "handler '{}': path cannot be empty",
                settings.name
            )));
        }
        Ok(Self::new(&settings.name, options.path))
    }

    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            writer: None,
        }
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, HandlerError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            tracing::debug!(handler = %self.name, path = %self.path.display(), "Archive opened");
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| HandlerError::Unavailable("archive not open".to_string()))
    }
}

impl Handler for FileHandler {
    fn process(&mut self, metric: &Metric) -> Result<(), HandlerError> {
        let writer = self.writer()?;
        writeln!(
            writer,
            "{} {} {}",
            metric.path(),
            metric.value(),
            metric.timestamp()
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HandlerError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), HandlerError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
