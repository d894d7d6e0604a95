//! Entities to enrich and the key used to identify them on disk.

use std::path::Path;

use log::{error, info, warn};

/// A named item to enrich with artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub display_name: String,
    pub key: String,
}

impl Entity {
    pub fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.trim().to_string(),
            key: normalized_key(display_name),
        }
    }
}

/// Lowercases, keeps alphanumerics, spaces, hyphens and underscores, and
/// collapses whitespace runs into a single underscore.
///
/// `normalized_key(&normalized_key(x)) == normalized_key(x)` for every `x`.
pub fn normalized_key(display_name: &str) -> String {
    let kept: String = display_name
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || *ch == '-' || *ch == '_')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

#[derive(Debug, serde::Deserialize)]
struct EntityRecord {
    #[serde(default)]
    title: Option<String>,
}

/// Loads the ordered entity list from a `.json` array of `{ "title": .. }`
/// objects or a `.csv` file with a `title` column.
///
/// Missing or malformed input is logged and yields an empty list.
pub fn load_entity_list(path: &Path) -> Vec<Entity> {
    let records = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => read_json_records(path),
        Some("csv") => read_csv_records(path),
        _ => {
            error!(
                "Unsupported entity list {} (expected .json or .csv)",
                path.display()
            );
            return Vec::new();
        }
    };
    let Some(records) = records else {
        return Vec::new();
    };

    let mut entities = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let entity = Entity::new(record.title.as_deref().unwrap_or_default());
        if entity.display_name.is_empty() {
            info!("Skipping entry {}: no title found", index + 1);
            continue;
        }
        if entity.key.is_empty() {
            warn!(
                "Skipping entry {} ({}): title has no usable characters",
                index + 1,
                entity.display_name
            );
            continue;
        }
        entities.push(entity);
    }
    entities
}

fn read_json_records(path: &Path) -> Option<Vec<EntityRecord>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            error!("Failed to read entity list {}: {}", path.display(), err);
            return None;
        }
    };
    match serde_json::from_str::<Vec<EntityRecord>>(&text) {
        Ok(records) => Some(records),
        Err(err) => {
            error!("Invalid JSON in entity list {}: {}", path.display(), err);
            None
        }
    }
}

fn read_csv_records(path: &Path) -> Option<Vec<EntityRecord>> {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(err) => {
            error!("Failed to open entity list {}: {}", path.display(), err);
            return None;
        }
    };
    let mut records = Vec::new();
    for row in reader.deserialize::<EntityRecord>() {
        match row {
            Ok(record) => records.push(record),
            Err(err) => {
                error!("Malformed row in entity list {}: {}", path.display(), err);
                return None;
            }
        }
    }
    Some(records)
}
