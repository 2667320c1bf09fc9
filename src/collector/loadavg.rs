//! System load average collector.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::collector::{Collector, CollectorError};
use crate::config::{CollectorSettings, ConfigError};
use crate::metric::{Metric, MetricNaming, unix_now};

const DEFAULT_SOURCE: &str = "/proc/loadavg";

fn default_source() -> PathBuf {
    PathBuf::from(DEFAULT_SOURCE)
}

/// Options under `options:` for a `loadavg` collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAvgOptions {
    #[serde(default = "default_source")]
    pub source: PathBuf,
}

/// Reads `/proc/loadavg`.
#[derive(Debug)]
pub struct LoadAvgCollector {
    settings: CollectorSettings,
    source: PathBuf,
}

impl LoadAvgCollector {
    pub fn new(settings: CollectorSettings) -> Result<Self, ConfigError> {
        let options: LoadAvgOptions = settings.options()?;
        Ok(Self {
            settings,
            source: options.source,
        })
    }
}

#[async_trait::async_trait]
impl Collector for LoadAvgCollector {
    fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectorError> {
        let content = tokio::fs::read_to_string(&self.source).await?;
        parse(&self.settings.naming, &content, unix_now())
    }
}

/// Parse `0.52 0.58 0.59 2/1184 12345`.
fn parse(naming: &MetricNaming, content: &str, timestamp: f64) -> Result<Vec<Metric>, CollectorError> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(CollectorError::Parse(format!(
            "expected at least 4 fields in loadavg, got {}",
            fields.len()
        )));
    }

    let number = |raw: &str| {
        raw.parse::<f64>()
            .map_err(|e| CollectorError::Parse(format!("'{raw}': {e}")))
    };
    let (running, total) = fields[3]
        .split_once('/')
        .ok_or_else(|| CollectorError::Parse(format!("bad process field '{}'", fields[3])))?;

    Ok(vec![
        naming.metric("01", number(fields[0])?, timestamp)?,
        naming.metric("05", number(fields[1])?, timestamp)?,
        naming.metric("15", number(fields[2])?, timestamp)?,
        naming.metric("processes_running", number(running)?, timestamp)?,
        naming.metric("processes_total", number(total)?, timestamp)?,
    ])
}
