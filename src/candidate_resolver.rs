//! Resolver seam between the batch loop and whatever catalog produces
//! candidates for an entity name.

use crate::error::Result;

/// One unconfirmed lookup result. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Candidate {
    pub title: String,
    /// Navigable product location, absolute.
    pub link: String,
    /// Square icon shown next to the result.
    pub thumbnail: Option<String>,
    /// Hero image when the listing already exposes one.
    pub main_image: Option<String>,
}

/// Produces candidates for a free-text entity name.
///
/// Ordering is the external lookup's order; implementations never re-rank.
pub trait ArtifactResolver {
    /// Empty result is a miss, not an error.
    fn resolve(&mut self, entity_name: &str) -> Result<Vec<Candidate>>;

    /// Locates the hero image for a chosen candidate. Returns the candidate's
    /// pre-resolved location when present.
    fn resolve_main_image(&mut self, candidate: &Candidate) -> Result<Option<String>> {
        Ok(candidate.main_image.clone())
    }
}
