//! Batch enrichment runtime component.
//!
//! Walks the entity list in order, skips entities already in the checkpoint,
//! resolves and fetches artifacts for the rest, and records each entity as
//! soon as it completes. One entity failing never stops the batch; an
//! interrupt stops it cleanly with the checkpoint as of the last completed
//! entity.

use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::artifact_fetcher::{ArtifactFetcher, ArtifactKind};
use crate::candidate_resolver::{ArtifactResolver, Candidate};
use crate::candidate_selector::{CandidateSelector, SelectionOutcome};
use crate::checkpoint_store::CheckpointStore;
use crate::entity::Entity;
use crate::error::{PipelineError, Result};
use crate::image_pipeline::{ArtifactNormalizer, NormalizeSummary};
use crate::shutdown_signal::ShutdownSignal;

pub const NORMALIZED_DIR_NAME: &str = "square-converted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOutcome {
    /// Already checkpointed.
    Skipped,
    /// Lookup produced no candidates, or no artifact could be located.
    Miss,
    /// The selector cancelled.
    Declined,
    /// Artifacts written and checkpoint recorded.
    Done,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub skipped: usize,
    pub misses: usize,
    pub declined: usize,
    pub done: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub normalized: Option<NormalizeSummary>,
}

impl BatchSummary {
    fn tally(&mut self, outcome: EntityOutcome) {
        match outcome {
            EntityOutcome::Skipped => self.skipped += 1,
            EntityOutcome::Miss => self.misses += 1,
            EntityOutcome::Declined => self.declined += 1,
            EntityOutcome::Done => self.done += 1,
            EntityOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entities: {} done, {} skipped, {} not found, {} declined, {} failed",
            self.total, self.done, self.skipped, self.misses, self.declined, self.failed
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Drives resolve, select and fetch for every entity on one thread.
pub struct EnrichmentManager {
    resolver: Box<dyn ArtifactResolver>,
    selector: Box<dyn CandidateSelector>,
    fetcher: ArtifactFetcher,
    checkpoint: CheckpointStore,
    normalizer: Option<Box<dyn ArtifactNormalizer>>,
    normalize_dimensions: (u32, u32),
    auto_select: bool,
    shutdown: Arc<ShutdownSignal>,
}

impl EnrichmentManager {
    pub fn new(
        resolver: Box<dyn ArtifactResolver>,
        selector: Box<dyn CandidateSelector>,
        fetcher: ArtifactFetcher,
        checkpoint: CheckpointStore,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            resolver,
            selector,
            fetcher,
            checkpoint,
            normalizer: None,
            normalize_dimensions: (512, 512),
            auto_select: false,
            shutdown,
        }
    }

    /// Always take the first candidate instead of consulting the selector.
    pub fn with_auto_select(mut self, auto_select: bool) -> Self {
        self.auto_select = auto_select;
        self
    }

    pub fn with_normalizer(
        mut self,
        normalizer: Option<Box<dyn ArtifactNormalizer>>,
        dimensions: (u32, u32),
    ) -> Self {
        self.normalizer = normalizer;
        self.normalize_dimensions = dimensions;
        self
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Runs the whole batch, then the icon normalization sweep.
    pub fn run(&mut self, entities: &[Entity]) -> BatchSummary {
        let mut summary = BatchSummary {
            total: entities.len(),
            ..BatchSummary::default()
        };
        if entities.is_empty() {
            info!("No games to process. Exiting.");
            return summary;
        }
        info!("Found {} games", entities.len());
        info!("Already processed {} games.", self.checkpoint.len());

        for (index, entity) in entities.iter().enumerate() {
            let position = index + 1;
            if self.shutdown.is_signaled() {
                summary.interrupted = true;
                break;
            }
            if self.checkpoint.contains(&entity.key) {
                info!(
                    "Skipping game {}/{}: {} (already processed)",
                    position,
                    entities.len(),
                    entity.display_name
                );
                summary.tally(EntityOutcome::Skipped);
                continue;
            }

            info!(
                "Processing game {}/{}: {}",
                position,
                entities.len(),
                entity.display_name
            );
            match self.process_entity(entity) {
                Ok(outcome) => summary.tally(outcome),
                Err(PipelineError::Cancelled) => {
                    warn!(
                        "Interrupted by user while processing: {}",
                        entity.display_name
                    );
                    summary.interrupted = true;
                    break;
                }
                Err(error) if !error.is_recoverable() => {
                    error!(
                        "Stopping batch at {}: {}",
                        entity.display_name, error
                    );
                    summary.tally(EntityOutcome::Failed);
                    break;
                }
                Err(error) => {
                    error!("Error processing {}: {}", entity.display_name, error);
                    info!("Continuing with next game...");
                    summary.tally(EntityOutcome::Failed);
                }
            }
        }

        if summary.interrupted {
            info!(
                "Progress saved to {}. Run the same command again to resume.",
                self.checkpoint.path().display()
            );
        } else {
            info!(
                "Finished processing. {} games processed in total.",
                self.checkpoint.len()
            );
        }

        summary.normalized = self.run_normalizer();
        info!("{summary}");
        summary
    }

    /// One entity through the same path as the batch, without the checkpoint
    /// skip. A successful run is still recorded.
    pub fn run_single(&mut self, entity: &Entity) -> Result<EntityOutcome> {
        self.process_entity(entity)
    }

    fn select_candidate<'c>(
        &mut self,
        entity: &Entity,
        candidates: &'c [Candidate],
    ) -> Result<Option<&'c Candidate>> {
        if self.auto_select || candidates.len() == 1 {
            return Ok(candidates.first());
        }
        match self.selector.choose(&entity.display_name, candidates)? {
            SelectionOutcome::Chosen(index) => Ok(candidates.get(index)),
            SelectionOutcome::Declined => Ok(None),
        }
    }

    fn process_entity(&mut self, entity: &Entity) -> Result<EntityOutcome> {
        let candidates = self.resolver.resolve(&entity.display_name)?;
        if candidates.is_empty() {
            info!("{}", PipelineError::LookupMiss(entity.display_name.clone()));
            return Ok(EntityOutcome::Miss);
        }

        let Some(candidate) = self.select_candidate(entity, &candidates)? else {
            info!("No result selected for {}", entity.display_name);
            return Ok(EntityOutcome::Declined);
        };
        info!("Selected: {}", candidate.title);

        let mut written = 0usize;
        let mut first_failure: Option<PipelineError> = None;

        match &candidate.thumbnail {
            Some(location) => {
                match self
                    .fetcher
                    .fetch_artifact(&entity.key, ArtifactKind::Square, location, false)
                {
                    Ok(_) => written += 1,
                    Err(error) => {
                        warn!(
                            "Square image for {} failed: {}",
                            entity.display_name, error
                        );
                        first_failure.get_or_insert(error);
                    }
                }
            }
            None => info!("No square image found for {}", entity.display_name),
        }

        self.shutdown.check()?;
        match self.resolver.resolve_main_image(candidate)? {
            Some(location) => {
                match self
                    .fetcher
                    .fetch_artifact(&entity.key, ArtifactKind::Main, &location, true)
                {
                    Ok(_) => written += 1,
                    Err(error) => {
                        warn!("Main image for {} failed: {}", entity.display_name, error);
                        first_failure.get_or_insert(error);
                    }
                }
            }
            None => info!("No main image found for {}", entity.display_name),
        }

        if let Some(error) = first_failure {
            return Err(error);
        }
        if written == 0 {
            info!("No artifacts located for {}", entity.display_name);
            return Ok(EntityOutcome::Miss);
        }

        self.shutdown.check()?;
        self.checkpoint.record(&entity.key)?;
        info!("Successfully processed: {}", entity.display_name);
        Ok(EntityOutcome::Done)
    }

    fn run_normalizer(&self) -> Option<NormalizeSummary> {
        let normalizer = self.normalizer.as_ref()?;
        let store = self.fetcher.store();
        let source_dir = store.kind_dir(ArtifactKind::Square);
        let target_dir = store.root().join(NORMALIZED_DIR_NAME);
        match normalizer.normalize(&source_dir, &target_dir, self.normalize_dimensions) {
            Ok(summary) => Some(summary),
            Err(error) => {
                error!("Icon normalization sweep failed: {error}");
                None
            }
        }
    }
}
