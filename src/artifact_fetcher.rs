//! Artifact download with high-res preference and on-disk layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use url::Url;

use crate::error::{PipelineError, Result};
use crate::http_transport::HttpTransport;

/// Width token at the start of a transformation segment, e.g. `/w_300/` or
/// `c_scale,w_300`.
static WIDTH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[/,])w_\d+").expect("width token pattern is valid"));

pub const ARTIFACT_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Square icon shown in search results.
    Square,
    /// Hero image from the product page.
    Main,
}

impl ArtifactKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Main => "main",
        }
    }
}

/// Deterministic artifact paths under one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.label())
    }

    /// `<root>/<kind>/<key>_<kind>.jpg`
    pub fn artifact_path(&self, key: &str, kind: ArtifactKind) -> PathBuf {
        self.kind_dir(kind)
            .join(format!("{key}_{}.{ARTIFACT_EXTENSION}", kind.label()))
    }

    /// Writes via a sibling temp file and rename, replacing any existing file.
    pub fn write(&self, key: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<PathBuf> {
        let target_path = self.artifact_path(key, kind);
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir).map_err(|err| PipelineError::io(&dir, err))?;
        let temp_path = target_path.with_extension(format!("{ARTIFACT_EXTENSION}.tmp"));
        fs::write(&temp_path, bytes).map_err(|err| PipelineError::io(&temp_path, err))?;
        if let Err(err) = fs::rename(&temp_path, &target_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(PipelineError::io(&target_path, err));
        }
        Ok(target_path)
    }
}

/// Turns protocol-relative (`//host/x`) and host-relative (`/x`) locations
/// into absolute URLs against `base_url`.
pub fn absolutize_location(location: &str, base_url: &str) -> Result<String> {
    let trimmed = location.trim();
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Ok(format!("https://{rest}"));
    }
    if let Ok(absolute) = Url::parse(trimmed) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(base_url).map_err(|err| {
        PipelineError::Configuration(format!("invalid storefront base url {base_url}: {err}"))
    })?;
    base.join(trimmed)
        .map(|joined| joined.to_string())
        .map_err(|err| PipelineError::decode(format!("location {trimmed}"), err))
}

/// Rewrites the embedded size token to request `width` pixels.
///
/// Returns `None` when the location carries no rewritable token or already
/// asks for that width.
pub fn high_res_variant(location: &str, width: u32) -> Option<String> {
    let rewritten = if WIDTH_TOKEN.is_match(location) {
        WIDTH_TOKEN
            .replace_all(location, format!("${{1}}w_{width}").as_str())
            .into_owned()
    } else if location.contains("c_scale") {
        location.replacen("c_scale", &format!("c_scale,w_{width}"), 1)
    } else {
        return None;
    };
    (rewritten != location).then_some(rewritten)
}

/// Fetches artifact bytes through an `HttpTransport` and stores them.
pub struct ArtifactFetcher {
    transport: Box<dyn HttpTransport>,
    store: ArtifactStore,
    base_url: String,
    high_res_width: u32,
}

impl ArtifactFetcher {
    pub fn new(
        transport: Box<dyn HttpTransport>,
        store: ArtifactStore,
        base_url: &str,
        high_res_width: u32,
    ) -> Self {
        Self {
            transport,
            store,
            base_url: base_url.to_string(),
            high_res_width,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Single attempt at `location` after absolutizing it.
    pub fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let url = absolutize_location(location, &self.base_url)?;
        let bytes = self.transport.get_bytes(&url)?;
        if bytes.is_empty() {
            return Err(PipelineError::decode(
                format!("response from {url}"),
                "empty body",
            ));
        }
        Ok(bytes)
    }

    /// Fetches and stores one artifact. With `prefer_high_res`, a rewritten
    /// high-res variant is tried first and the original is tried once on
    /// failure.
    pub fn fetch_artifact(
        &self,
        key: &str,
        kind: ArtifactKind,
        location: &str,
        prefer_high_res: bool,
    ) -> Result<PathBuf> {
        let high_res = if prefer_high_res {
            high_res_variant(location, self.high_res_width)
        } else {
            None
        };

        let bytes = match high_res {
            Some(high_res_location) => {
                debug!("Trying high-res {} image: {}", kind.label(), high_res_location);
                match self.fetch(&high_res_location) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        info!(
                            "High-res {} image failed ({}). Falling back to original.",
                            kind.label(),
                            error
                        );
                        self.fetch(location)?
                    }
                }
            }
            None => self.fetch(location)?,
        };

        let path = self.store.write(key, kind, &bytes)?;
        debug!("Saved {} image to {}", kind.label(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        absolutize_location, high_res_variant, ArtifactFetcher, ArtifactKind, ArtifactStore,
    };
    use crate::error::{PipelineError, Result};
    use crate::http_transport::HttpTransport;
    use crate::test_support::scratch_dir;
    use std::sync::{Arc, Mutex};

    /// Records every URL and fails those containing any of `failing`.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) calls: Arc<Mutex<Vec<String>>>,
        pub(crate) failing: Vec<String>,
    }

    impl HttpTransport for RecordingTransport {
        fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .expect("calls lock poisoned")
                .push(url.to_string());
            if self.failing.iter().any(|needle| url.contains(needle.as_str())) {
                return Err(PipelineError::Transport {
                    url: url.to_string(),
                    status: 404,
                });
            }
            Ok(format!("bytes:{url}").into_bytes())
        }
    }

    #[test]
    fn test_artifact_path_layout() {
        let store = ArtifactStore::new(std::path::Path::new("images"));
        assert_eq!(
            store.artifact_path("super_mario_bros", ArtifactKind::Square),
            std::path::Path::new("images/square/super_mario_bros_square.jpg")
        );
        assert_eq!(
            store.artifact_path("zelda", ArtifactKind::Main),
            std::path::Path::new("images/main/zelda_main.jpg")
        );
    }

    #[test]
    fn test_absolutize_location_handles_relative_forms() {
        let base = "https://www.nintendo.com";
        assert_eq!(
            absolutize_location("//assets.nintendo.com/a.jpg", base).expect("should absolutize"),
            "https://assets.nintendo.com/a.jpg"
        );
        assert_eq!(
            absolutize_location("/us/store/products/zelda/", base).expect("should absolutize"),
            "https://www.nintendo.com/us/store/products/zelda/"
        );
        assert_eq!(
            absolutize_location("https://cdn.example.com/x.png", base).expect("should pass through"),
            "https://cdn.example.com/x.png"
        );
    }

    #[test]
    fn test_high_res_variant_rewrites_width_token() {
        assert_eq!(
            high_res_variant("https://img/c_scale,w_300/ncom/software/a.jpg", 1920).as_deref(),
            Some("https://img/c_scale,w_1920/ncom/software/a.jpg")
        );
        assert_eq!(
            high_res_variant("https://img/upload/c_scale/ncom/a.jpg", 1920).as_deref(),
            Some("https://img/upload/c_scale,w_1920/ncom/a.jpg")
        );
    }

    #[test]
    fn test_high_res_variant_skips_locations_without_token() {
        assert_eq!(high_res_variant("https://img/plain/a.jpg", 1920), None);
        assert_eq!(high_res_variant("https://img/w_1920/a.jpg", 1920), None);
        assert_eq!(high_res_variant("https://img/media/show_12/a.jpg", 1920), None);
    }

    #[test]
    fn test_high_res_variant_leaves_embedded_path_text_alone() {
        assert_eq!(
            high_res_variant("https://img/c_scale,w_300/ncom/show_12/a.jpg", 1920).as_deref(),
            Some("https://img/c_scale,w_1920/ncom/show_12/a.jpg")
        );
    }

    #[test]
    fn test_high_res_failure_falls_back_to_original_exactly_once() {
        let dir = scratch_dir("fetch_fallback");
        let transport = RecordingTransport {
            failing: vec!["w_1920".to_string()],
            ..Default::default()
        };
        let calls = transport.calls.clone();
        let fetcher = ArtifactFetcher::new(
            Box::new(transport),
            ArtifactStore::new(&dir),
            "https://www.nintendo.com",
            1920,
        );

        let original = "https://img/c_scale,w_300/a.jpg";
        let path = fetcher
            .fetch_artifact("zelda", ArtifactKind::Main, original, true)
            .expect("fallback should succeed");

        assert_eq!(
            *calls.lock().expect("calls lock poisoned"),
            vec![
                "https://img/c_scale,w_1920/a.jpg".to_string(),
                original.to_string()
            ]
        );
        assert_eq!(
            std::fs::read(&path).expect("artifact should exist"),
            format!("bytes:{original}").into_bytes()
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_both_variants_failing_fails_the_artifact() {
        let dir = scratch_dir("fetch_both_fail");
        let transport = RecordingTransport {
            failing: vec!["img/".to_string()],
            ..Default::default()
        };
        let calls = transport.calls.clone();
        let fetcher = ArtifactFetcher::new(
            Box::new(transport),
            ArtifactStore::new(&dir),
            "https://www.nintendo.com",
            1920,
        );

        let result = fetcher.fetch_artifact("zelda", ArtifactKind::Main, "https://img/w_300/a.jpg", true);
        assert!(matches!(result, Err(PipelineError::Transport { status: 404, .. })));
        assert_eq!(calls.lock().expect("calls lock poisoned").len(), 2);
        assert!(!fetcher.store().artifact_path("zelda", ArtifactKind::Main).exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_square_fetch_without_token_makes_single_request() {
        let dir = scratch_dir("fetch_square");
        let transport = RecordingTransport::default();
        let calls = transport.calls.clone();
        let fetcher = ArtifactFetcher::new(
            Box::new(transport),
            ArtifactStore::new(&dir),
            "https://www.nintendo.com",
            1920,
        );

        let path = fetcher
            .fetch_artifact("zelda", ArtifactKind::Square, "/media/zelda.jpg", true)
            .expect("fetch should succeed");
        assert_eq!(path, dir.join("square").join("zelda_square.jpg"));
        assert_eq!(
            *calls.lock().expect("calls lock poisoned"),
            vec!["https://www.nintendo.com/media/zelda.jpg".to_string()]
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_store_write_overwrites_existing_file() {
        let dir = scratch_dir("store_overwrite");
        let store = ArtifactStore::new(&dir);
        store
            .write("zelda", ArtifactKind::Square, b"first")
            .expect("first write should succeed");
        let path = store
            .write("zelda", ArtifactKind::Square, b"second")
            .expect("second write should succeed");
        assert_eq!(std::fs::read(path).expect("file should exist"), b"second");
        let _ = std::fs::remove_dir_all(dir);
    }
}
