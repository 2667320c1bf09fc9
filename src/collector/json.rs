//! HTTP JSON endpoint collector.
//!
//! Polls a URL that returns a JSON document and turns every numeric leaf into
//! a metric named after its key path (`{"db": {"conn": 3}}` becomes
//! `<prefix>.<host>.<collector>.db.conn`). Booleans map to `0`/`1`; strings and
//! nulls are ignored.

use std::collections::BTreeMap;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collector::{Collector, CollectorError};
use crate::config::{CollectorSettings, ConfigError};
use crate::metric::{Metric, MetricNaming, sanitize_segment, unix_now};

/// Options under `options:` for a `json` collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOptions {
    /// Endpoint returning a JSON document.
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Flattening JSON poller.
pub struct JsonCollector {
    settings: CollectorSettings,
    options: JsonOptions,
    client: Client,
}

impl std::fmt::Debug for JsonCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCollector")
            .field("name", &self.settings.name)
            .field("url", &self.options.url)
            .finish_non_exhaustive()
    }
}

impl JsonCollector {
    /// # Errors
    /// Returns `ConfigError` for a missing or non-HTTP url, or if the HTTP
    /// client cannot be built.
    pub fn new(settings: CollectorSettings) -> Result<Self, ConfigError> {
        let options: JsonOptions = settings.options()?;
        let url = url::Url::parse(&options.url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "collector '{}': invalid url '{}': {e}",
                settings.name, options.url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "collector '{}': url must be http or https",
                settings.name
            )));
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "collector '{}': http client: {e}",
                    settings.name
                ))
            })?;

        Ok(Self {
            settings,
            options,
            client,
        })
    }
}

#[async_trait::async_trait]
impl Collector for JsonCollector {
    fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectorError> {
        let mut request = self.client.get(&self.options.url);
        for (key, value) in &self.options.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Http(format!(
                "{} returned {status}",
                self.options.url
            )));
        }

        let body = response.bytes().await?;
        let document: Value =
            serde_json::from_slice(&body).map_err(|e| CollectorError::Parse(e.to_string()))?;

        let metrics = flatten(&self.settings.naming, &document, unix_now())?;
        tracing::debug!(collector = %self.settings.name, count = metrics.len(), "JSON document flattened");
        Ok(metrics)
    }
}

/// Walk a JSON document depth-first, emitting one metric per numeric leaf.
pub fn flatten(
    naming: &MetricNaming,
    document: &Value,
    timestamp: f64,
) -> Result<Vec<Metric>, CollectorError> {
    let mut leaves = Vec::new();
    walk(document, &mut Vec::new(), &mut leaves);

    leaves
        .into_iter()
        .map(|(name, value)| naming.metric(&name, value, timestamp).map_err(Into::into))
        .collect()
}

fn walk(value: &Value, path: &mut Vec<String>, out: &mut Vec<(String, f64)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(sanitize_segment(key));
                walk(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                walk(child, path, out);
                path.pop();
            }
        }
        Value::Number(n) => {
            if let Some(v) = n.as_f64().filter(|v| v.is_finite())
                && !path.is_empty()
                && path.iter().all(|seg| !seg.is_empty())
            {
                out.push((path.join("."), v));
            }
        }
        Value::Bool(b) => {
            if !path.is_empty() && path.iter().all(|seg| !seg.is_empty()) {
                out.push((path.join("."), if *b { 1.0 } else { 0.0 }));
            }
        }
        Value::String(_) | Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn naming() -> MetricNaming {
        MetricNaming::new("servers", "web01", "app")
    }

    #[test]
    fn test_flatten_nested_document() {
        let doc = serde_json::json!({
            "requests": 42,
            "db": { "pool": { "active": 3, "idle": 7.5 } },
            "healthy": true,
            "version": "1.2.3",
            "shards": [10, 20],
            "missing": null
        });

        let metrics = flatten(&naming(), &doc, 1000.0).unwrap();
        let by_path: BTreeMap<&str, f64> =
            metrics.iter().map(|m| (m.path(), m.value())).collect();

        assert_eq!(by_path.len(), 6);
        assert_eq!(by_path["servers.web01.app.requests"], 42.0);
        assert_eq!(by_path["servers.web01.app.db.pool.active"], 3.0);
        assert_eq!(by_path["servers.web01.app.db.pool.idle"], 7.5);
        assert_eq!(by_path["servers.web01.app.healthy"], 1.0);
        assert_eq!(by_path["servers.web01.app.shards.0"], 10.0);
        assert_eq!(by_path["servers.web01.app.shards.1"], 20.0);
        assert!(metrics.iter().all(|m| m.host() == Some("web01")));
    }

    #[test]
    fn test_flatten_sanitizes_keys_and_skips_bare_scalar() {
        let doc = serde_json::json!({ "cpu.user": 1, "": 2 });
        let metrics = flatten(&naming(), &doc, 0.0).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].path(), "servers.web01.app.cpu_user");

        assert!(flatten(&naming(), &serde_json::json!(5), 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_invalid_url() {
        let settings = CollectorSettings::new("app", "json")
            .with_options(serde_json::json!({ "url": "ftp://example.com/stats" }));
        assert!(JsonCollector::new(settings).is_err());

        let settings = CollectorSettings::new("app", "json")
            .with_options(serde_json::json!({ "url": "not a url" }));
        assert!(JsonCollector::new(settings).is_err());
    }

    /// Serve a single canned HTTP response and return the bound address.
    async fn serve_once(status: &'static str, body: &'static str) -> Option<std::net::SocketAddr> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return None,
            Err(e) => panic!("Failed to bind test listener: {e}"),
        };
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        Some(addr)
    }

    fn settings_for(addr: std::net::SocketAddr) -> CollectorSettings {
        CollectorSettings::new("app", "json")
            .with_timeout(Duration::from_secs(2))
            .with_naming(naming())
            .with_options(serde_json::json!({ "url": format!("http://{addr}/stats") }))
    }

    #[tokio::test]
    async fn test_collect_from_endpoint() {
        let Some(addr) = serve_once("200 OK", r#"{"queue":{"depth":12}}"#).await else {
            return;
        };
        let collector = JsonCollector::new(settings_for(addr)).unwrap();
        let metrics = collector.collect().await.unwrap();

        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].path(), "servers.web01.app.queue.depth");
        assert_eq!(metrics[0].value(), 12.0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let Some(addr) = serve_once("503 Service Unavailable", "{}").await else {
            return;
        };
        let collector = JsonCollector::new(settings_for(addr)).unwrap();
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, CollectorError::Http(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let Some(addr) = serve_once("200 OK", "{not json").await else {
            return;
        };
        let collector = JsonCollector::new(settings_for(addr)).unwrap();
        assert!(matches!(
            collector.collect().await,
            Err(CollectorError::Parse(_))
        ));
    }
}
