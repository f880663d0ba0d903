// Harvest orchestrator.
//
// Drives one list through
//   Init -> Extracting -> CheckTermination -> {Scrolling -> Extracting | Done | Failed}
// Low-level stale and container faults are absorbed by the extractor and the
// scroll controller and only surface here as counters. Every loop is bounded
// by a timeout or a counter.

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{HarvestConfig, DEFAULT_TARGET_COUNT};
use crate::error::{HarvestError, SessionError};
use crate::extractor::EntryExtractor;
use crate::metadata::read_metadata;
use crate::profile::PageProfile;
use crate::scroll::{prepare_viewport, ScrollController, ScrollStep};
use crate::session::BrowserSession;
use crate::tracker::HarvestState;
use crate::types::{Entry, HarvestOutcome, ListMetadata, PartialReason};

/// Everything one harvest call hands back.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub list_url: String,
    pub metadata: ListMetadata,
    pub target_count: u32,
    /// Contiguous ranks starting at 1, at most `target_count` of them.
    pub entries: Vec<Entry>,
    pub outcome: HarvestOutcome,
    pub scroll_attempts: u32,
    pub passes: u32,
}

enum Phase {
    Init,
    Extracting,
    CheckTermination { stale_pass: bool },
    Scrolling,
    Done(HarvestOutcome),
}

pub struct Harvester<'a> {
    session: &'a dyn BrowserSession,
    profile: &'a PageProfile,
    config: &'a HarvestConfig,
    scroller: ScrollController,
}

impl<'a> Harvester<'a> {
    pub fn new(
        session: &'a dyn BrowserSession,
        profile: &'a PageProfile,
        config: &'a HarvestConfig,
    ) -> Self {
        Self {
            session,
            profile,
            config,
            scroller: ScrollController::new(profile, config),
        }
    }

    /// Harvest one list. `target_count` of `None` uses the count the page
    /// advertises, falling back to 50.
    pub async fn harvest(&self, list_url: &str, target_count: Option<u32>) -> HarvestReport {
        let mut state = HarvestState::new();
        let mut metadata = ListMetadata::default();
        let mut target = target_count.filter(|&t| t > 0).unwrap_or(DEFAULT_TARGET_COUNT);
        let mut passes = 0;
        let mut at_bottom = false;
        let mut phase = Phase::Init;

        info!(list_url, ?target_count, "Starting harvest");

        let outcome = loop {
            phase = match phase {
                Phase::Init => match self.init(list_url).await {
                    Ok(meta) => {
                        target = resolve_target(target_count, &meta);
                        metadata = meta;
                        Phase::Extracting
                    }
                    Err(e) => Phase::Done(HarvestOutcome::Failed(e)),
                },
                Phase::Extracting => {
                    passes += 1;
                    match self.extract(&mut state).await {
                        Ok(stale_pass) => Phase::CheckTermination { stale_pass },
                        Err(e) => Phase::Done(HarvestOutcome::Failed(e)),
                    }
                }
                Phase::CheckTermination { stale_pass } => {
                    self.check_termination(&state, target, stale_pass).await
                }
                Phase::Scrolling => match self.scroller.advance(self.session).await {
                    Ok(ScrollStep::Moved(report)) => {
                        state.scroll_attempts += 1;
                        debug!(
                            attempt = state.scroll_attempts,
                            strategy = report.strategy,
                            relocations = report.relocations,
                            "Scroll complete"
                        );
                        state.consecutive_stale_count = 0;
                        at_bottom = false;
                        Phase::Extracting
                    }
                    // One more read of the last frame for rows skipped as stale.
                    Ok(ScrollStep::AtBottom) if !at_bottom => {
                        at_bottom = true;
                        Phase::Extracting
                    }
                    Ok(ScrollStep::AtBottom) => {
                        Phase::Done(HarvestOutcome::Partial(PartialReason::EndOfList))
                    }
                    Err(e) => {
                        state.scroll_attempts += 1;
                        Phase::Done(HarvestOutcome::Failed(e))
                    }
                },
                Phase::Done(outcome) => break outcome,
            };
        };

        let entries = state.ordered_result(target);
        match &outcome {
            HarvestOutcome::Complete => info!(
                list_url,
                entries = entries.len(),
                scrolls = state.scroll_attempts,
                passes,
                "Harvest complete"
            ),
            HarvestOutcome::Partial(reason) => warn!(
                list_url,
                ?reason,
                entries = entries.len(),
                target_count = target,
                highest_rank = ?state.highest_rank(),
                scrolls = state.scroll_attempts,
                "Harvest ended with a partial list"
            ),
            HarvestOutcome::Failed(error) => warn!(
                list_url,
                error = %error,
                entries = entries.len(),
                scrolls = state.scroll_attempts,
                "Harvest failed"
            ),
        }

        HarvestReport {
            list_url: list_url.to_string(),
            metadata,
            target_count: target,
            entries,
            outcome,
            scroll_attempts: state.scroll_attempts,
            passes,
        }
    }

    async fn init(&self, list_url: &str) -> Result<ListMetadata, HarvestError> {
        let parsed = url::Url::parse(list_url)
            .map_err(|e| HarvestError::Navigation(format!("invalid list URL {list_url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(HarvestError::Navigation(format!(
                "only http/https lists are supported, got {}",
                parsed.scheme()
            )));
        }

        self.session.open(list_url).await?;
        self.dismiss_overlay().await;
        self.wait_for_first_frame().await?;

        let metadata = read_metadata(self.session, self.profile).await;
        prepare_viewport(self.session, &self.scroller).await;
        tokio::time::sleep(self.config.settle).await;
        Ok(metadata)
    }

    /// Click the first consent button present. Never fails the harvest.
    async fn dismiss_overlay(&self) {
        for selector in &self.profile.consent_buttons {
            let buttons = match self.session.query_all(selector).await {
                Ok(buttons) => buttons,
                Err(e) => {
                    debug!(selector = selector.as_str(), error = %e, "Consent lookup failed");
                    continue;
                }
            };
            let Some(button) = buttons.first() else {
                continue;
            };
            match self.session.click(button).await {
                Ok(()) => {
                    info!(selector = selector.as_str(), "Dismissed consent overlay");
                    tokio::time::sleep(self.config.settle).await;
                    return;
                }
                Err(e) => warn!(selector = selector.as_str(), error = %e, "Could not dismiss consent overlay"),
            }
        }
        debug!("No consent overlay dismissed");
    }

    async fn wait_for_first_frame(&self) -> Result<(), HarvestError> {
        let started = Instant::now();
        let deadline = started + self.config.initial_load_timeout;

        loop {
            match self.session.query_all(&self.profile.row).await {
                Ok(rows) if !rows.is_empty() => {
                    debug!(
                        rows = rows.len(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "First frame mounted"
                    );
                    return Ok(());
                }
                Ok(_) | Err(SessionError::Stale) => {}
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(HarvestError::InitialLoadTimeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.initial_poll_interval).await;
        }
    }

    /// One extraction pass with a small budget of immediate re-reads for
    /// stale frames. Returns whether the pass ended stale.
    async fn extract(&self, state: &mut HarvestState) -> Result<bool, HarvestError> {
        let extractor = EntryExtractor::new(self.profile);

        for attempt in 0..=self.config.stale_retries_per_pass {
            match extractor.extract_pass(self.session).await {
                Ok(pass) if !pass.is_stale_frame() => {
                    let merged = state.merge(&pass.candidates);
                    if merged.made_progress() {
                        state.consecutive_no_progress_count = 0;
                    } else {
                        state.consecutive_no_progress_count += 1;
                    }
                    debug!(
                        read = pass.read(),
                        skipped = pass.stale,
                        accepted = merged.accepted,
                        moved = merged.moved,
                        conflicts = merged.conflicts,
                        contiguous = state.contiguous_len(),
                        no_progress = state.consecutive_no_progress_count,
                        "Merged pass"
                    );
                    return Ok(false);
                }
                Ok(pass) => {
                    debug!(attempt, nodes = pass.nodes, "Stale frame, re-reading");
                }
                Err(SessionError::Stale) => {
                    debug!(attempt, "Row query went stale, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.config.settle).await;
        }

        state.consecutive_stale_count += 1;
        warn!(
            consecutive = state.consecutive_stale_count,
            "Extraction pass stale after retries"
        );
        Ok(true)
    }

    async fn check_termination(&self, state: &HarvestState, target: u32, stale_pass: bool) -> Phase {
        if state.is_complete(target) {
            return Phase::Done(HarvestOutcome::Complete);
        }
        if state.scroll_attempts >= self.config.max_scroll_attempts {
            return Phase::Done(HarvestOutcome::Partial(PartialReason::ScrollCeiling));
        }
        if state.consecutive_no_progress_count > self.config.no_progress_threshold {
            return Phase::Done(HarvestOutcome::Partial(PartialReason::NoProgress));
        }
        if stale_pass {
            if state.consecutive_stale_count >= self.config.stale_threshold {
                return Phase::Done(HarvestOutcome::Partial(PartialReason::StaleFrames));
            }
            // Re-read in place; scrolling blind could skip ranks.
            tokio::time::sleep(self.config.settle).await;
            return Phase::Extracting;
        }
        Phase::Scrolling
    }
}

fn resolve_target(requested: Option<u32>, metadata: &ListMetadata) -> u32 {
    if requested == Some(0) {
        warn!("Ignoring a target count of zero");
    }
    match (requested.filter(|&target| target > 0), metadata.advertised_count) {
        (Some(target), Some(advertised)) if advertised < target => {
            warn!(requested = target, advertised, "Page advertises fewer entries than requested");
            target
        }
        (Some(target), _) => target,
        (None, Some(advertised)) if advertised > 0 => advertised,
        (None, _) => DEFAULT_TARGET_COUNT,
    }
}
