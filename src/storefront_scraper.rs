//! Storefront candidate extraction from rendered search and product pages.
//!
//! Page structure changes often, so every lookup tries an ordered list of
//! selector strategies and takes the first that yields something usable.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use log::{debug, info};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::artifact_fetcher::absolutize_location;
use crate::candidate_resolver::{ArtifactResolver, Candidate};
use crate::error::Result;
use crate::page_renderer::PageRenderer;
use crate::shutdown_signal::ShutdownSignal;

const CANDIDATE_SELECTORS: &[&str] = &[
    "a[href*='/store/products/']",
    "a[href*='store/products']",
    "[class*='product']",
];
const CANDIDATE_TITLE_SELECTOR: &str = "[class*='title'], h3, h4, h5";
const CANDIDATE_IMAGE_ATTRIBUTES: &[&str] =
    &["data-image", "data-src", "data-main-image", "data-hero-image"];
const UNKNOWN_TITLE: &str = "Unknown Title";

static SIZE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[/,])[wh]_(\d+)").expect("size token pattern is valid"));

const PAGE_IMAGE_SCAN_LIMIT: usize = 30;
const MIN_SIZED_IMAGE_PX: u32 = 100;
const STOREFRONT_IMAGE_MARKERS: &[&str] = &["nintendo.com", "atum-img", "ncom/"];
const TRACKING_HOST_MARKERS: &[&str] = &["t.co", "twitter.com", "facebook.com"];
const PRODUCT_IMAGE_SELECTORS: &[&str] = &[
    "img[src*='ncom/software']",
    "img[data-src*='ncom/software']",
    "img[src*='atum-img']",
    "img[data-src*='atum-img']",
    "img[class*='product'][class*='image']",
    "img[class*='hero']",
    ".product-gallery img",
    ".product-image img",
    ".image-container img",
];
const PRODUCT_CONTAINER_SELECTORS: &[&str] = &[
    "[class*='product']",
    "[class*='game']",
    "[data-testid*='product']",
    ".product-detail",
    ".game-detail",
];
const HERO_IMAGE_SELECTORS: &[&str] = &[
    "[class*='hero'] img",
    "[data-testid*='hero'] img",
    ".hero-image img",
    ".primary-image img",
];

/// Storefront search URL for a free-text query.
pub fn search_url(base_url: &str, query: &str) -> String {
    let encoded = urlencoding::encode(query.trim()).replace("%20", "+");
    format!(
        "{}/us/search/#q={}&p=1&cat=gme&sort=df",
        base_url.trim_end_matches('/'),
        encoded
    )
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(error) => {
            debug!("Skipping invalid selector {css:?}: {error}");
            None
        }
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn non_empty_attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// `src`, unless it is an inline lazy-load placeholder, then `data-src`.
fn image_source(image: ElementRef<'_>) -> Option<String> {
    non_empty_attr(image, "src")
        .filter(|source| !is_inline_data(source))
        .or_else(|| non_empty_attr(image, "data-src"))
        .filter(|source| !is_inline_data(source))
}

fn is_inline_data(location: &str) -> bool {
    location
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

fn is_tracking_location(location: &str) -> bool {
    TRACKING_HOST_MARKERS
        .iter()
        .any(|marker| location.contains(marker))
}

fn is_storefront_image(location: &str) -> bool {
    STOREFRONT_IMAGE_MARKERS
        .iter()
        .any(|marker| location.contains(marker))
        && !is_tracking_location(location)
}

fn is_loose_storefront_image(location: &str) -> bool {
    (location.to_ascii_lowercase().contains("nintendo") || location.contains("atum-img"))
        && !is_tracking_location(location)
}

fn looks_like_product_image(location: &str) -> bool {
    let lowered = location.to_ascii_lowercase();
    ["656", "1024", "product", "hero"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn extract_candidate(item: ElementRef<'_>, base_url: &str) -> Option<Candidate> {
    let href = non_empty_attr(item, "href").or_else(|| {
        let anchor = parse_selector("a[href]")?;
        item.select(&anchor)
            .next()
            .and_then(|anchor| non_empty_attr(anchor, "href"))
    })?;
    let link = match absolutize_location(&href, base_url) {
        Ok(link) => link,
        Err(error) => {
            debug!("Skipping search result with unusable link {href:?}: {error}");
            return None;
        }
    };

    let title = parse_selector(CANDIDATE_TITLE_SELECTOR)
        .and_then(|selector| item.select(&selector).next().map(element_text))
        .filter(|title| !title.is_empty())
        .or_else(|| non_empty_attr(item, "aria-label"))
        .or_else(|| non_empty_attr(item, "title"))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    let thumbnail = parse_selector("img")
        .and_then(|selector| item.select(&selector).next())
        .and_then(image_source);

    let main_image = CANDIDATE_IMAGE_ATTRIBUTES
        .iter()
        .filter_map(|name| non_empty_attr(item, name))
        .find(|value| value.contains("nintendo.com") || value.contains("atum-img"));

    Some(Candidate {
        title,
        link,
        thumbnail,
        main_image,
    })
}

/// Extracts up to `max_results` candidates from a rendered search page.
pub fn extract_candidates(html: &str, base_url: &str, max_results: usize) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    for css in CANDIDATE_SELECTORS {
        let Some(selector) = parse_selector(css) else {
            continue;
        };
        let items: Vec<ElementRef<'_>> = document.select(&selector).collect();
        if items.is_empty() {
            continue;
        }
        debug!("Found {} search items with selector {css:?}", items.len());
        return items
            .into_iter()
            .take(max_results)
            .filter_map(|item| extract_candidate(item, base_url))
            .collect();
    }
    Vec::new()
}

fn first_image_matching(
    document: &Html,
    selectors: &[&str],
    accept: fn(&str) -> bool,
) -> Option<String> {
    for css in selectors {
        let Some(selector) = parse_selector(css) else {
            continue;
        };
        let found = document
            .select(&selector)
            .filter_map(image_source)
            .find(|source| accept(source));
        if found.is_some() {
            debug!("Found main image with selector {css:?}");
            return found;
        }
    }
    None
}

fn first_image_in_containers(document: &Html, selectors: &[&str]) -> Option<String> {
    let image = parse_selector("img")?;
    for css in selectors {
        let Some(selector) = parse_selector(css) else {
            continue;
        };
        for container in document.select(&selector) {
            if let Some(source) = container
                .select(&image)
                .filter_map(image_source)
                .find(|source| is_loose_storefront_image(source))
            {
                debug!("Found main image in container {css:?}");
                return Some(source);
            }
        }
    }
    None
}

fn largest_sized_image(images: &[String]) -> Option<String> {
    let mut best: Option<(u32, &String)> = None;
    for source in images {
        let size = SIZE_TOKEN
            .captures(source)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse::<u32>().ok());
        let Some(size) = size else {
            continue;
        };
        if size > MIN_SIZED_IMAGE_PX && best.map_or(true, |(best_size, _)| size > best_size) {
            best = Some((size, source));
        }
    }
    best.map(|(_, source)| source.clone())
}

/// Picks the hero image from a rendered product page.
pub fn extract_main_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let storefront_images: Vec<String> = parse_selector("img")
        .map(|selector| {
            document
                .select(&selector)
                .take(PAGE_IMAGE_SCAN_LIMIT)
                .filter_map(image_source)
                .filter(|source| is_storefront_image(source))
                .collect()
        })
        .unwrap_or_default();

    largest_sized_image(&storefront_images)
        .or_else(|| first_image_matching(&document, PRODUCT_IMAGE_SELECTORS, is_storefront_image))
        .or_else(|| {
            first_image_matching(&document, &["img"], |source| {
                is_storefront_image(source) && looks_like_product_image(source)
            })
        })
        .or_else(|| first_image_in_containers(&document, PRODUCT_CONTAINER_SELECTORS))
        .or_else(|| first_image_matching(&document, HERO_IMAGE_SELECTORS, is_loose_storefront_image))
        .or_else(|| {
            storefront_images
                .iter()
                .find(|source| !source.contains("24") && !source.contains("16"))
                .cloned()
        })
}

/// Resolves entity names against the storefront through a `PageRenderer`.
pub struct StorefrontResolver<R: PageRenderer> {
    renderer: R,
    base_url: String,
    max_results: usize,
    request_delay: Duration,
    shutdown: Arc<ShutdownSignal>,
    last_render_at: Option<Instant>,
}

impl<R: PageRenderer> StorefrontResolver<R> {
    pub fn new(
        renderer: R,
        base_url: &str,
        max_results: usize,
        request_delay: Duration,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            renderer,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_results,
            request_delay,
            shutdown,
            last_render_at: None,
        }
    }

    /// Keeps at least `request_delay` between navigations.
    fn throttled_render(&mut self, url: &str) -> Result<String> {
        if let Some(last) = self.last_render_at {
            let remaining = self.request_delay.saturating_sub(last.elapsed());
            self.shutdown.pause(remaining)?;
        } else {
            self.shutdown.check()?;
        }
        let html = self.renderer.render(url);
        self.last_render_at = Some(Instant::now());
        html
    }
}

impl<R: PageRenderer> ArtifactResolver for StorefrontResolver<R> {
    fn resolve(&mut self, entity_name: &str) -> Result<Vec<Candidate>> {
        let url = search_url(&self.base_url, entity_name);
        info!("Searching storefront for: {entity_name}");
        let html = self.throttled_render(&url)?;
        let candidates = extract_candidates(&html, &self.base_url, self.max_results);
        debug!("{} candidates for {entity_name}", candidates.len());
        Ok(candidates)
    }

    fn resolve_main_image(&mut self, candidate: &Candidate) -> Result<Option<String>> {
        if let Some(main_image) = &candidate.main_image {
            return Ok(Some(main_image.clone()));
        }
        if candidate.link.is_empty() {
            return Ok(None);
        }
        debug!("Opening product page {}", candidate.link);
        let html = self.throttled_render(&candidate.link)?;
        Ok(extract_main_image(&html))
    }
}
