//! Persistent application configuration model and defaults.

use std::path::PathBuf;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Library catalog export settings.
    pub catalog: CatalogConfig,
    #[serde(default)]
    /// Storefront lookup and page rendering.
    pub storefront: StorefrontConfig,
    #[serde(default)]
    /// Artifact download behavior.
    pub fetch: FetchConfig,
    #[serde(default)]
    /// Batch enrichment run settings.
    pub batch: BatchConfig,
    #[serde(default)]
    /// Icon normalization sweep.
    pub normalize: NormalizeConfig,
    #[serde(default)]
    /// Local viewer server.
    pub viewer: ViewerConfig,
}

/// Paginated catalog endpoint used by `export`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CatalogConfig {
    /// Endpoint without the page parameter; `&page=N` is appended.
    #[serde(default = "default_catalog_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_catalog_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorefrontConfig {
    /// Absolute base used for search URLs and host-relative locations.
    #[serde(default = "default_storefront_base_url")]
    pub base_url: String,
    #[serde(default = "default_browserless_endpoint")]
    pub browserless_endpoint: String,
    #[serde(default)]
    pub browserless_token: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,
    #[serde(default)]
    pub age_gate_birthdate: Birthdate,
}

/// Placeholder adult birthdate typed into age-verification forms.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Birthdate {
    pub month: String,
    pub day: String,
    pub year: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Width substituted into size tokens when requesting high-res variants.
    #[serde(default = "default_high_res_width")]
    pub high_res_width: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BatchConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_entity_list")]
    pub entity_list: PathBuf,
    /// Politeness delay between paginated lookups and page navigations.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Pick the first candidate instead of prompting.
    #[serde(default)]
    pub auto_select: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NormalizeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_normalize_edge_px")]
    pub width: u32,
    #[serde(default = "default_normalize_edge_px")]
    pub height: u32,
    /// Lossy WebP quality, 0 to 100.
    #[serde(default = "default_normalize_quality")]
    pub quality: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ViewerConfig {
    #[serde(default = "default_viewer_root")]
    pub root: PathBuf,
    #[serde(default = "default_first_port")]
    pub first_port: u16,
    #[serde(default = "default_port_span")]
    pub port_span: u16,
    #[serde(default = "default_true")]
    pub open_browser: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: default_catalog_endpoint(),
            user_agent: default_catalog_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            base_url: default_storefront_base_url(),
            browserless_endpoint: default_browserless_endpoint(),
            browserless_token: String::new(),
            max_results: default_max_results(),
            render_timeout_secs: default_render_timeout_secs(),
            age_gate_birthdate: Birthdate::default(),
        }
    }
}

impl Default for Birthdate {
    fn default() -> Self {
        Self {
            month: "01".to_string(),
            day: "01".to_string(),
            year: "1990".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_fetch_user_agent(),
            timeout_secs: default_timeout_secs(),
            high_res_width: default_high_res_width(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            entity_list: default_entity_list(),
            request_delay_ms: default_request_delay_ms(),
            auto_select: false,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_normalize_edge_px(),
            height: default_normalize_edge_px(),
            quality: default_normalize_quality(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            root: default_viewer_root(),
            first_port: default_first_port(),
            port_span: default_port_span(),
            open_browser: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_catalog_endpoint() -> String {
    "https://api.exophase.com/public/player/4972201/games?environment=nintendo&sort=5&showHidden=0&me=744281&query=".to_string()
}

fn default_catalog_user_agent() -> String {
    "gameshelf/0.1 (+https://exophase.com)".to_string()
}

fn default_fetch_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 gameshelf/0.1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_render_timeout_secs() -> u64 {
    90
}

fn default_storefront_base_url() -> String {
    "https://www.nintendo.com".to_string()
}

fn default_browserless_endpoint() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_max_results() -> usize {
    20
}

fn default_high_res_width() -> u32 {
    1920
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_entity_list() -> PathBuf {
    PathBuf::from("games.json")
}

fn default_request_delay_ms() -> u64 {
    5000
}

fn default_normalize_edge_px() -> u32 {
    512
}

fn default_normalize_quality() -> f32 {
    85.0
}

fn default_viewer_root() -> PathBuf {
    PathBuf::from("docs")
}

fn default_first_port() -> u16 {
    8000
}

fn default_port_span() -> u16 {
    10
}

#[cfg(test)]
mod tests {
    use super::{Birthdate, Config};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.fetch.high_res_width, 1920);
        assert_eq!(config.batch.request_delay_ms, 5000);
        assert_eq!(config.batch.output_dir.to_str(), Some("images"));
        assert!(!config.batch.auto_select);
        assert!(config.normalize.enabled);
        assert_eq!((config.normalize.width, config.normalize.height), (512, 512));
        assert_eq!(config.normalize.quality, 85.0);
        assert_eq!(config.viewer.first_port, 8000);
        assert_eq!(config.viewer.port_span, 10);
        assert_eq!(
            config.storefront.age_gate_birthdate,
            Birthdate {
                month: "01".to_string(),
                day: "01".to_string(),
                year: "1990".to_string(),
            }
        );
    }

    #[test]
    fn test_partial_config_fills_missing_sections_with_defaults() {
        let partial = r#"
[batch]
output_dir = "covers"
request_delay_ms = 250

[normalize]
enabled = false
"#;
        let config: Config = toml::from_str(partial).expect("partial config should parse");

        assert_eq!(config.batch.output_dir.to_str(), Some("covers"));
        assert_eq!(config.batch.request_delay_ms, 250);
        assert_eq!(config.batch.entity_list.to_str(), Some("games.json"));
        assert!(!config.normalize.enabled);
        assert_eq!(config.normalize.width, 512);
        assert_eq!(config.storefront, Config::default().storefront);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("default config should serialize");
        let parsed: Config = toml::from_str(&text).expect("serialized config should parse");
        assert_eq!(parsed, config);
    }
}
