//! Paginated library catalog export.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::http_transport::HttpTransport;
use crate::shutdown_signal::ShutdownSignal;

pub const CATALOG_COLUMNS: [&str; 4] = ["title", "playtime", "image_url", "last_played"];

/// One exported library entry. Missing values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CatalogRow {
    pub title: String,
    pub playtime: String,
    pub image_url: String,
    pub last_played: String,
}

impl CatalogRow {
    pub fn from_game(game: &Value) -> Self {
        Self {
            title: display_value(game.get("meta").and_then(|meta| meta.get("title"))),
            playtime: display_value(game.get("playtime")),
            image_url: display_value(game.get("resource_standard")),
            last_played: display_value(game.get("lastplayed_utc")),
        }
    }
}

/// Strings verbatim, numbers without quotes; null, zero, false and empty
/// values become `""`.
fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) if number.as_f64() == Some(0.0) => String::new(),
        Some(Value::Number(number)) => number.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Entries of a catalog page. A missing or non-array `games` is empty.
pub fn page_games(payload: &Value) -> &[Value] {
    payload
        .get("games")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

pub struct CatalogClient {
    transport: Box<dyn HttpTransport>,
    endpoint: String,
    page_delay: Duration,
    shutdown: Arc<ShutdownSignal>,
}

impl CatalogClient {
    pub fn new(
        transport: Box<dyn HttpTransport>,
        endpoint: &str,
        page_delay: Duration,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.to_string(),
            page_delay,
            shutdown,
        }
    }

    pub fn page_url(&self, page: u32) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}page={}", self.endpoint, separator, page)
    }

    fn fetch_page(&self, page: u32) -> Result<Value> {
        let url = self.page_url(page);
        let body = self.transport.get_bytes(&url)?;
        serde_json::from_slice(&body)
            .map_err(|err| PipelineError::decode(format!("catalog page {page}"), err))
    }

    /// Pages from 1 until the first empty page. Any failed page aborts the
    /// export.
    pub fn collect_rows(&self) -> Result<Vec<CatalogRow>> {
        let mut rows = Vec::new();
        let mut page = 1u32;
        loop {
            self.shutdown.check()?;
            info!("Fetching page {page}...");
            let payload = self.fetch_page(page)?;
            let games = page_games(&payload);
            if games.is_empty() {
                break;
            }
            rows.extend(games.iter().map(CatalogRow::from_game));
            page += 1;
            self.shutdown.pause(self.page_delay)?;
        }
        info!("Collected {} rows across {} page(s)", rows.len(), page - 1);
        Ok(rows)
    }
}

/// Header plus one record per row.
pub fn write_catalog_csv(rows: &[CatalogRow], path: &Path) -> Result<()> {
    let csv_error = |err: csv::Error| PipelineError::decode(format!("csv output {}", path.display()), err);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;
    writer.write_record(CATALOG_COLUMNS).map_err(csv_error)?;
    for row in rows {
        writer.serialize(row).map_err(csv_error)?;
    }
    writer.flush().map_err(|err| PipelineError::io(path, err))?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Same rows as a JSON array; readable by the viewer and the entity loader.
pub fn write_catalog_json(rows: &[CatalogRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    let file = fs::File::create(path).map_err(|err| PipelineError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, rows)
        .map_err(|err| PipelineError::decode(format!("json output {}", path.display()), err))?;
    writer.flush().map_err(|err| PipelineError::io(path, err))?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
