// Scroll controller.
//
// One scroll action = locate a container that can actually scroll, then try
// each strategy in order until one measurably moves the viewport. The
// container handle is located fresh for every action and dropped afterwards.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{HarvestError, SessionError};
use crate::profile::PageProfile;
use crate::session::{BrowserSession, NodeHandle, ScriptArg};

/// Scripts injected by the controller.
pub mod scripts {
    pub const MEASURE: &str = "const el = arguments[0]; \
        return { top: el.scrollTop, height: el.scrollHeight, visible: el.clientHeight };";
    pub const SET_OFFSET: &str =
        "arguments[0].scrollTop = arguments[1]; return arguments[0].scrollTop;";
    pub const SCROLL_BY: &str = "arguments[0].scrollBy(0, arguments[1]);";
    pub const WINDOW_OFFSET: &str =
        "return window.scrollY || document.documentElement.scrollTop || 0;";
    pub const WINDOW_SCROLL_BY: &str = "window.scrollBy(0, arguments[0]);";
    pub const RESET: &str = "arguments[0].scrollTop = 0;";
    pub const FOCUS: &str = "window.focus();";
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Extent {
    pub top: f64,
    pub height: f64,
    pub visible: f64,
}

/// Slack allowed when deciding the container sits at its bottom edge.
const BOTTOM_TOLERANCE_PX: f64 = 50.0;

impl Extent {
    pub fn is_scrollable(&self) -> bool {
        self.height > self.visible
    }

    pub fn is_at_bottom(&self) -> bool {
        self.top + self.visible >= self.height - BOTTOM_TOLERANCE_PX
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    pub handle: NodeHandle,
    pub selector: String,
    pub extent: Extent,
}

pub async fn measure(
    session: &dyn BrowserSession,
    handle: &NodeHandle,
) -> Result<Extent, SessionError> {
    let value = session
        .run_script(scripts::MEASURE, &[ScriptArg::from(handle)])
        .await?;
    serde_json::from_value(value)
        .map_err(|e| SessionError::Script(format!("unexpected measurement: {e}")))
}

/// First candidate whose content is taller than its viewport.
///
/// Candidates that measure as non-scrollable, or go stale while being
/// measured, are skipped. If none qualify the result is
/// `NonScrollableContainer`, never a fallback to a dead container.
pub async fn locate_container(
    session: &dyn BrowserSession,
    selectors: &[String],
) -> Result<Container, HarvestError> {
    for selector in selectors {
        let handles = match session.query_all(selector).await {
            Ok(handles) => handles,
            Err(SessionError::Stale) => continue,
            Err(e) => return Err(e.into()),
        };
        for handle in handles {
            match measure(session, &handle).await {
                Ok(extent) if extent.is_scrollable() => {
                    debug!(
                        selector = selector.as_str(),
                        height = extent.height,
                        visible = extent.visible,
                        "Found scrollable container"
                    );
                    return Ok(Container {
                        handle,
                        selector: selector.clone(),
                        extent,
                    });
                }
                Ok(extent) => {
                    debug!(
                        selector = selector.as_str(),
                        height = extent.height,
                        visible = extent.visible,
                        "Rejecting non-scrollable container"
                    );
                }
                Err(SessionError::Stale) => {
                    debug!(selector = selector.as_str(), "Container candidate went stale");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Err(HarvestError::NonScrollableContainer)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ScrollStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn needs_container(&self) -> bool {
        true
    }

    /// Current scroll position as seen by this strategy.
    async fn offset(
        &self,
        session: &dyn BrowserSession,
        container: Option<&Container>,
    ) -> Result<f64, SessionError>;

    async fn advance(
        &self,
        session: &dyn BrowserSession,
        container: Option<&Container>,
        step: u32,
    ) -> Result<(), SessionError>;
}

fn require(container: Option<&Container>) -> Result<&Container, SessionError> {
    container.ok_or_else(|| SessionError::Script("strategy needs a container".into()))
}

async fn container_offset(
    session: &dyn BrowserSession,
    container: Option<&Container>,
) -> Result<f64, SessionError> {
    Ok(measure(session, &require(container)?.handle).await?.top)
}

/// Assign `scrollTop = current + step` directly.
pub struct OffsetAssign;

#[async_trait]
impl ScrollStrategy for OffsetAssign {
    fn name(&self) -> &'static str {
        "offset-assign"
    }

    async fn offset(
        &self,
        session: &dyn BrowserSession,
        container: Option<&Container>,
    ) -> Result<f64, SessionError> {
        container_offset(session, container).await
    }

    async fn advance(
        &self,
        session: &dyn BrowserSession,
        container: Option<&Container>,
        step: u32,
    ) -> Result<(), SessionError> {
        let container = require(container)?;
        let current = measure(session, &container.handle).await?.top;
        let target = current.round() as i64 + i64::from(step);
        session
            .run_script(
                scripts::SET_OFFSET,
                &[ScriptArg::from(&container.handle), ScriptArg::from(target)],
            )
            .await?;
        Ok(())
    }
}

/// `element.scrollBy(0, step)` on the container.
pub struct ContainerScrollBy;

#[async_trait]
impl ScrollStrategy for ContainerScrollBy {
    fn name(&self) -> &'static str {
        "container-scroll-by"
    }

    async fn offset(
        &self,
        session: &dyn BrowserSession,
        container: Option<&Container>,
    ) -> Result<f64, SessionError> {
        container_offset(session, container).await
    }

    async fn advance(
        &self,
        session: &dyn BrowserSession,
        container: Option<&Container>,
        step: u32,
    ) -> Result<(), SessionError> {
        let container = require(container)?;
        session
            .run_script(
                scripts::SCROLL_BY,
                &[ScriptArg::from(&container.handle), ScriptArg::from(i64::from(step))],
            )
            .await?;
        Ok(())
    }
}

/// Scroll the whole window. Works without a container.
pub struct WindowScroll;

#[async_trait]
impl ScrollStrategy for WindowScroll {
    fn name(&self) -> &'static str {
        "window-scroll-by"
    }

    fn needs_container(&self) -> bool {
        false
    }

    async fn offset(
        &self,
        session: &dyn BrowserSession,
        _container: Option<&Container>,
    ) -> Result<f64, SessionError> {
        let value = session.run_script(scripts::WINDOW_OFFSET, &[]).await?;
        Ok(value.as_f64().unwrap_or(0.0))
    }

    async fn advance(
        &self,
        session: &dyn BrowserSession,
        _container: Option<&Container>,
        step: u32,
    ) -> Result<(), SessionError> {
        session
            .run_script(scripts::WINDOW_SCROLL_BY, &[ScriptArg::from(i64::from(step))])
            .await?;
        Ok(())
    }
}

pub fn default_strategies() -> Vec<Box<dyn ScrollStrategy>> {
    vec![
        Box::new(OffsetAssign),
        Box::new(ContainerScrollBy),
        Box::new(WindowScroll),
    ]
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Result of one successful scroll action.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollReport {
    pub strategy: &'static str,
    pub before: f64,
    /// `None` when the scroll re-rendered the container before it could be
    /// measured again.
    pub after: Option<f64>,
    /// How many times the container had to be re-located.
    pub relocations: u32,
}

/// What one scroll action did to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollStep {
    Moved(ScrollReport),
    /// The container already sits at its true bottom; nothing is left to reveal.
    AtBottom,
}

enum Attempt {
    Moved {
        strategy: &'static str,
        before: f64,
        after: Option<f64>,
    },
    AtBottom,
    StaleContainer,
    Exhausted,
}

pub struct ScrollController {
    strategies: Vec<Box<dyn ScrollStrategy>>,
    containers: Vec<String>,
    step_px: u32,
    settle: Duration,
    max_relocations: u32,
}

impl ScrollController {
    pub fn new(profile: &PageProfile, config: &HarvestConfig) -> Self {
        Self {
            strategies: default_strategies(),
            containers: profile.containers.clone(),
            step_px: config.scroll_step_px,
            settle: config.settle,
            max_relocations: config.max_relocations,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ScrollStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub async fn locate(&self, session: &dyn BrowserSession) -> Result<Container, HarvestError> {
        locate_container(session, &self.containers).await
    }

    /// Advance the viewport by one step, then wait for the page to settle.
    ///
    /// At most one strategy moves the page per call. A container that is
    /// replaced before any strategy moved it is re-located, up to
    /// `max_relocations` times.
    pub async fn advance(&self, session: &dyn BrowserSession) -> Result<ScrollStep, HarvestError> {
        let mut relocations = 0;

        loop {
            let container = match self.locate(session).await {
                Ok(container) => Some(container),
                Err(HarvestError::NonScrollableContainer) => {
                    warn!(relocations, "No scrollable container, container-free strategies only");
                    None
                }
                Err(e) => return Err(e),
            };

            match self.attempt(session, container.as_ref()).await {
                Attempt::Moved {
                    strategy,
                    before,
                    after,
                } => {
                    debug!(strategy, before, ?after, "Scrolled");
                    tokio::time::sleep(self.settle).await;
                    return Ok(ScrollStep::Moved(ScrollReport {
                        strategy,
                        before,
                        after,
                        relocations,
                    }));
                }
                Attempt::AtBottom => {
                    info!(relocations, "Container is at the bottom of the list");
                    return Ok(ScrollStep::AtBottom);
                }
                Attempt::StaleContainer if relocations < self.max_relocations => {
                    relocations += 1;
                    info!(relocations, "Scroll container replaced mid-scroll, re-locating");
                }
                Attempt::StaleContainer | Attempt::Exhausted => {
                    warn!(relocations, "All scroll strategies failed");
                    return Err(HarvestError::ScrollExhausted);
                }
            }
        }
    }

    async fn attempt(&self, session: &dyn BrowserSession, container: Option<&Container>) -> Attempt {
        if container.is_some_and(|c| c.extent.is_at_bottom()) {
            return Attempt::AtBottom;
        }

        for strategy in &self.strategies {
            let name = strategy.name();
            if strategy.needs_container() && container.is_none() {
                continue;
            }

            let before = match strategy.offset(session, container).await {
                Ok(offset) => offset,
                Err(SessionError::Stale) if strategy.needs_container() => {
                    return Attempt::StaleContainer
                }
                Err(e) => {
                    debug!(strategy = name, error = %e, "Could not read offset");
                    continue;
                }
            };

            if let Err(e) = strategy.advance(session, container, self.step_px).await {
                if e.is_stale() && strategy.needs_container() {
                    return Attempt::StaleContainer;
                }
                debug!(strategy = name, error = %e, "Scroll strategy failed");
                continue;
            }

            match strategy.offset(session, container).await {
                Ok(after) if after > before => {
                    return Attempt::Moved {
                        strategy: name,
                        before,
                        after: Some(after),
                    }
                }
                Ok(after) => {
                    debug!(strategy = name, before, after, "Scroll strategy did not move the viewport");
                }
                // The scroll went through and the page re-rendered the
                // container. Another step now would skip a frame.
                Err(SessionError::Stale) if strategy.needs_container() => {
                    debug!(strategy = name, "Container replaced by the scroll");
                    return Attempt::Moved {
                        strategy: name,
                        before,
                        after: None,
                    };
                }
                Err(e) => {
                    debug!(strategy = name, error = %e, "Could not re-measure offset");
                }
            }
        }
        Attempt::Exhausted
    }
}

/// Best-effort: focus the window and rewind the container before the first pass.
pub async fn prepare_viewport(session: &dyn BrowserSession, controller: &ScrollController) {
    if let Err(e) = session.run_script(scripts::FOCUS, &[]).await {
        debug!(error = %e, "Could not focus window");
    }
    match controller.locate(session).await {
        Ok(container) => {
            if let Err(e) = session
                .run_script(scripts::RESET, &[ScriptArg::from(&container.handle)])
                .await
            {
                debug!(error = %e, "Could not rewind container");
            }
        }
        Err(e) => debug!(error = %e, "No container to rewind yet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_config, numbered_frames, FakeContainer, ScrollKind, VirtualPage};

    const LIST: &str = "https://example.test/list";

    fn profile() -> PageProfile {
        PageProfile::spotify_playlist()
    }

    async fn moved(controller: &ScrollController, page: &VirtualPage) -> ScrollReport {
        match controller.advance(page).await.unwrap() {
            ScrollStep::Moved(report) => report,
            ScrollStep::AtBottom => panic!("container unexpectedly at its bottom"),
        }
    }

    /// Scrolls by half the configured step through `scrollBy`.
    struct HalfStep;

    #[async_trait]
    impl ScrollStrategy for HalfStep {
        fn name(&self) -> &'static str {
            "half-step"
        }

        async fn offset(
            &self,
            session: &dyn BrowserSession,
            container: Option<&Container>,
        ) -> Result<f64, SessionError> {
            container_offset(session, container).await
        }

        async fn advance(
            &self,
            session: &dyn BrowserSession,
            container: Option<&Container>,
            step: u32,
        ) -> Result<(), SessionError> {
            let container = require(container)?;
            session
                .run_script(
                    scripts::SCROLL_BY,
                    &[ScriptArg::from(&container.handle), ScriptArg::from(i64::from(step / 2))],
                )
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn non_scrollable_candidate_is_never_selected() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=10]))
            .with_containers(vec![
                FakeContainer::new(&p.containers[0], 800.0, 800.0),
                FakeContainer::new(&p.containers[1], 6000.0, 800.0),
            ]);
        page.open(LIST).await.unwrap();

        let container = locate_container(&page, &p.containers).await.unwrap();
        assert_eq!(container.selector, p.containers[1]);
        assert!(container.extent.is_scrollable());
    }

    #[tokio::test]
    async fn only_non_scrollable_candidates_is_an_error() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=10]))
            .with_containers(vec![FakeContainer::new(&p.containers[0], 800.0, 800.0)]);
        page.open(LIST).await.unwrap();

        let err = locate_container(&page, &p.containers).await.unwrap_err();
        assert_eq!(err, HarvestError::NonScrollableContainer);
    }

    #[test]
    fn bottom_edge_allows_some_slack() {
        let extent = |top| Extent {
            top,
            height: 2000.0,
            visible: 800.0,
        };
        assert!(!extent(0.0).is_at_bottom());
        assert!(!extent(1100.0).is_at_bottom());
        assert!(extent(1170.0).is_at_bottom());
        assert!(extent(1200.0).is_at_bottom());
    }

    #[tokio::test]
    async fn falls_back_to_window_scroll() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=40]))
            .with_scroll_kinds(&[ScrollKind::Window]);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;

        assert_eq!(report.strategy, "window-scroll-by");
        assert_eq!(report.after, Some(report.before + 1200.0));
        assert_eq!(page.moves(), vec![ScrollKind::Window]);
    }

    #[tokio::test]
    async fn first_strategy_wins_when_it_moves() {
        let p = profile();
        let page = VirtualPage::new(&p).with_list(LIST, numbered_frames(&[1..=20, 15..=40]));
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;
        assert_eq!(report.strategy, "offset-assign");
        assert_eq!(report.after, Some(report.before + 1200.0));
        assert_eq!(page.moves(), vec![ScrollKind::Offset]);
    }

    #[tokio::test]
    async fn custom_strategies_replace_the_defaults() {
        let p = profile();
        let page = VirtualPage::new(&p).with_list(LIST, numbered_frames(&[1..=20, 15..=40]));
        page.open(LIST).await.unwrap();

        let controller =
            ScrollController::new(&p, &fast_config()).with_strategies(vec![Box::new(HalfStep)]);
        let report = moved(&controller, &page).await;

        assert_eq!(report.strategy, "half-step");
        assert_eq!(report.after, Some(600.0));
        assert_eq!(page.moves(), vec![ScrollKind::ScrollBy]);
    }

    #[tokio::test]
    async fn exhausted_when_nothing_moves() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20]))
            .with_scroll_kinds(&[]);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let err = controller.advance(&page).await.unwrap_err();
        assert_eq!(err, HarvestError::ScrollExhausted);
    }

    #[tokio::test]
    async fn container_at_its_bottom_is_reported_not_exhausted() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=37]))
            .with_containers(vec![FakeContainer::new(&p.containers[0], 2000.0, 800.0)])
            .with_scroll_kinds(&[ScrollKind::Offset, ScrollKind::ScrollBy]);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;
        assert_eq!(report.after, Some(1200.0));

        assert_eq!(controller.advance(&page).await.unwrap(), ScrollStep::AtBottom);
        assert_eq!(page.moves(), vec![ScrollKind::Offset]);
    }

    #[tokio::test]
    async fn replaced_container_is_relocated() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=40]))
            .with_container_replacements(1);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;
        assert_eq!(report.relocations, 1);
        assert_eq!(report.strategy, "offset-assign");
    }

    #[tokio::test]
    async fn container_rerendered_by_the_scroll_counts_as_one_move() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=40, 35..=50]))
            .with_container_replacements_after_scroll(1);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;

        assert_eq!(report.strategy, "offset-assign");
        assert_eq!(report.after, None);
        assert_eq!(report.relocations, 0);
        assert_eq!(page.moves(), vec![ScrollKind::Offset]);
    }

    #[tokio::test]
    async fn relocation_skips_an_unscrollable_replacement() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=40]))
            .with_containers(vec![
                FakeContainer::new(&p.containers[0], 100_000.0, 800.0),
                FakeContainer::new(&p.containers[1], 6000.0, 800.0),
            ])
            .with_container_replacements(1)
            .with_replacement_container(FakeContainer::new(&p.containers[0], 800.0, 800.0));
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;

        assert_eq!(report.relocations, 1);
        assert_eq!(page.moves(), vec![ScrollKind::Offset]);
        let container = controller.locate(&page).await.unwrap();
        assert_eq!(container.selector, p.containers[1]);
        assert_eq!(container.extent.top, 1200.0);
    }

    #[tokio::test]
    async fn relocation_budget_runs_out() {
        let p = profile();
        let config = fast_config();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=40]))
            .with_container_replacements(config.max_relocations + 1);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &config);
        let err = controller.advance(&page).await.unwrap_err();

        assert_eq!(err, HarvestError::ScrollExhausted);
        assert!(page.moves().is_empty());
    }

    #[tokio::test]
    async fn window_scroll_used_when_no_container_scrolls() {
        let p = profile();
        let page = VirtualPage::new(&p)
            .with_list(LIST, numbered_frames(&[1..=20, 15..=40]))
            .with_containers(vec![FakeContainer::new(&p.containers[0], 500.0, 800.0)]);
        page.open(LIST).await.unwrap();

        let controller = ScrollController::new(&p, &fast_config());
        let report = moved(&controller, &page).await;
        assert_eq!(report.strategy, "window-scroll-by");
    }
}
