// Test doubles for the harvest pipeline.
//
// VirtualPage (BrowserSession) simulates a virtualized list: only one frame
// of rows is mounted at a time, every effective scroll swaps in the next
// frame and invalidates the previous row handles. Faults (stale rows, stale
// frames, replaced containers, blank polls, failed navigations) are opt-in
// through builder methods.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::HarvestConfig;
use crate::error::SessionError;
use crate::profile::PageProfile;
use crate::scroll::scripts;
use crate::session::{BrowserSession, NodeHandle, ScriptArg};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Defaults with every pause shortened so tests run instantly.
pub fn fast_config() -> HarvestConfig {
    HarvestConfig {
        settle: Duration::ZERO,
        initial_load_timeout: Duration::from_millis(200),
        initial_poll_interval: Duration::from_millis(10),
        ..HarvestConfig::default()
    }
}

/// One frame of numbered rows per range.
pub fn numbered_frames(ranges: &[RangeInclusive<u32>]) -> Vec<Vec<FakeRow>> {
    ranges
        .iter()
        .map(|range| range.clone().map(FakeRow::numbered).collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Page content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FakeRow {
    pub rank: u32,
    pub title: String,
    pub track_id: String,
    /// (name, id)
    pub artists: Vec<(String, String)>,
    pub album: Option<(String, String)>,
    pub explicit: bool,
    pub linked: bool,
}

impl FakeRow {
    /// "Track n" by "Artist n", id `tn`. Every seventh rank is explicit.
    pub fn numbered(rank: u32) -> Self {
        Self {
            rank,
            title: format!("Track {rank}"),
            track_id: format!("t{rank}"),
            artists: vec![(format!("Artist {rank}"), format!("a{rank}"))],
            album: None,
            explicit: rank % 7 == 0,
            linked: true,
        }
    }

    pub fn with_album(mut self, name: &str, id: &str) -> Self {
        self.album = Some((name.to_string(), id.to_string()));
        self
    }

    /// Render the same track at another rank.
    pub fn at_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// No track link; only the row's aria-label carries the title.
    pub fn without_link(mut self) -> Self {
        self.linked = false;
        self
    }

    fn aria_label(&self) -> String {
        let names: Vec<&str> = self.artists.iter().map(|(name, _)| name.as_str()).collect();
        format!("Play {} by {}", self.title, names.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeContainer {
    pub selector: String,
    pub height: f64,
    pub visible: f64,
    top: f64,
}

impl FakeContainer {
    pub fn new(selector: &str, height: f64, visible: f64) -> Self {
        Self {
            selector: selector.to_string(),
            height,
            visible,
            top: 0.0,
        }
    }

    fn max_top(&self) -> f64 {
        (self.height - self.visible).max(0.0)
    }
}

/// Which scroll mechanism actually moved the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollKind {
    Offset,
    ScrollBy,
    Window,
}

const ALL_SCROLL_KINDS: [ScrollKind; 3] = [ScrollKind::Offset, ScrollKind::ScrollBy, ScrollKind::Window];

#[derive(Debug, Clone)]
struct Metadata {
    title: String,
    description: String,
    stats: String,
}

enum RowPart {
    Row,
    Track,
    Artist(usize),
    Album,
    Explicit,
    Index,
}

// ---------------------------------------------------------------------------
// VirtualPage
// ---------------------------------------------------------------------------

struct PageState {
    profile: PageProfile,
    lists: HashMap<String, Vec<Vec<FakeRow>>>,
    containers: Vec<FakeContainer>,
    working: HashSet<ScrollKind>,
    stale_once: HashSet<u32>,
    stale_frames: u32,
    blank_polls: u32,
    never_renders: bool,
    consent: Option<String>,
    consent_pending: bool,
    consent_clicks: u32,
    metadata: Option<Metadata>,
    container_replacements: u32,
    container_replacements_after_scroll: u32,
    replacement: Option<FakeContainer>,
    rank_attribute: bool,
    failing_opens: u32,

    current: Option<String>,
    frame: usize,
    row_generation: u64,
    container_generation: u64,
    window_offset: f64,
    moves: Vec<ScrollKind>,
    open_count: u32,
    closed: bool,
}

/// In-memory stand-in for a browser showing a virtualized list.
pub struct VirtualPage {
    state: Mutex<PageState>,
}

impl VirtualPage {
    pub fn new(profile: &PageProfile) -> Self {
        let default_container = profile
            .containers
            .first()
            .map(|selector| FakeContainer::new(selector, 100_000.0, 800.0));
        Self {
            state: Mutex::new(PageState {
                profile: profile.clone(),
                lists: HashMap::new(),
                containers: default_container.into_iter().collect(),
                working: ALL_SCROLL_KINDS.into_iter().collect(),
                stale_once: HashSet::new(),
                stale_frames: 0,
                blank_polls: 0,
                never_renders: false,
                consent: None,
                consent_pending: false,
                consent_clicks: 0,
                metadata: None,
                container_replacements: 0,
                container_replacements_after_scroll: 0,
                replacement: None,
                rank_attribute: true,
                failing_opens: 0,
                current: None,
                frame: 0,
                row_generation: 0,
                container_generation: 0,
                window_offset: 0.0,
                moves: Vec::new(),
                open_count: 0,
                closed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    fn configure(self, f: impl FnOnce(&mut PageState)) -> Self {
        f(&mut *self.state());
        self
    }

    /// Register a list page. Each inner vec is one mounted frame.
    pub fn with_list(self, url: &str, frames: Vec<Vec<FakeRow>>) -> Self {
        self.configure(|s| {
            s.lists.insert(url.to_string(), frames);
        })
    }

    pub fn with_containers(self, containers: Vec<FakeContainer>) -> Self {
        self.configure(|s| s.containers = containers)
    }

    /// Only these mechanisms move the page; the rest are silently ignored.
    pub fn with_scroll_kinds(self, kinds: &[ScrollKind]) -> Self {
        self.configure(|s| s.working = kinds.iter().copied().collect())
    }

    /// The first read of each of these ranks fails as stale.
    pub fn with_stale_once(self, ranks: &[u32]) -> Self {
        self.configure(|s| s.stale_once = ranks.iter().copied().collect())
    }

    /// The next `n` row queries return handles that are already dead.
    pub fn with_stale_frames(self, n: u32) -> Self {
        self.configure(|s| s.stale_frames = n)
    }

    /// The next `n` row queries find nothing mounted yet.
    pub fn with_blank_polls(self, n: u32) -> Self {
        self.configure(|s| s.blank_polls = n)
    }

    pub fn never_rendering(self) -> Self {
        self.configure(|s| s.never_renders = true)
    }

    /// Show a consent overlay behind `selector` on every load.
    pub fn with_consent(self, selector: &str) -> Self {
        self.configure(|s| s.consent = Some(selector.to_string()))
    }

    pub fn with_metadata(self, title: &str, description: &str, stats: &str) -> Self {
        self.configure(|s| {
            s.metadata = Some(Metadata {
                title: title.to_string(),
                description: description.to_string(),
                stats: stats.to_string(),
            })
        })
    }

    /// The container is swapped out from under the next `n` scroll scripts,
    /// before they take effect.
    pub fn with_container_replacements(self, n: u32) -> Self {
        self.configure(|s| s.container_replacements = n)
    }

    /// The container is re-rendered right after each of the next `n`
    /// container scrolls that moved the page.
    pub fn with_container_replacements_after_scroll(self, n: u32) -> Self {
        self.configure(|s| s.container_replacements_after_scroll = n)
    }

    /// The next replacement mounts `container` in place of the old one
    /// instead of an identical copy.
    pub fn with_replacement_container(self, container: FakeContainer) -> Self {
        self.configure(|s| s.replacement = Some(container))
    }

    pub fn without_rank_attribute(self) -> Self {
        self.configure(|s| s.rank_attribute = false)
    }

    pub fn failing_first_opens(self, n: u32) -> Self {
        self.configure(|s| s.failing_opens = n)
    }

    /// Every scroll that actually moved the page, in order.
    pub fn moves(&self) -> Vec<ScrollKind> {
        self.state().moves.clone()
    }

    pub fn consent_clicked(&self) -> bool {
        self.state().consent_clicks > 0
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn open_count(&self) -> u32 {
        self.state().open_count
    }

    fn live(&self) -> Result<MutexGuard<'_, PageState>, SessionError> {
        let state = self.state();
        if state.closed {
            return Err(SessionError::Transport("page closed".into()));
        }
        Ok(state)
    }
}

impl PageState {
    fn mounted(&self) -> &[FakeRow] {
        let Some(frames) = self.current.as_ref().and_then(|url| self.lists.get(url)) else {
            return &[];
        };
        match frames.get(self.frame).or_else(|| frames.last()) {
            Some(frame) => frame.as_slice(),
            None => &[],
        }
    }

    fn query_rows(&mut self) -> Vec<NodeHandle> {
        if self.never_renders || self.current.is_none() {
            return Vec::new();
        }
        if self.blank_polls > 0 {
            self.blank_polls -= 1;
            return Vec::new();
        }
        let count = self.mounted().len();
        if self.stale_frames > 0 {
            self.stale_frames -= 1;
            return (0..count)
                .map(|i| NodeHandle::new(format!("row:dead:{i}")))
                .collect();
        }
        let generation = self.row_generation;
        (0..count)
            .map(|i| NodeHandle::new(format!("row:{generation}:{i}")))
            .collect()
    }

    fn resolve_row(&mut self, handle: &NodeHandle) -> Result<(FakeRow, RowPart), SessionError> {
        let mut parts = handle.id().split(':');
        if parts.next() != Some("row") {
            return Err(SessionError::Script(format!("not a row: {}", handle.id())));
        }
        let generation = parts.next().unwrap_or_default();
        if generation != self.row_generation.to_string() {
            return Err(SessionError::Stale);
        }
        let index: usize = parts
            .next()
            .and_then(|i| i.parse().ok())
            .ok_or(SessionError::Stale)?;
        let row = self.mounted().get(index).cloned().ok_or(SessionError::Stale)?;
        if self.stale_once.remove(&row.rank) {
            return Err(SessionError::Stale);
        }

        let part = match (parts.next(), parts.next()) {
            (None, _) => RowPart::Row,
            (Some("track"), _) => RowPart::Track,
            (Some("artist"), Some(k)) => RowPart::Artist(k.parse().unwrap_or_default()),
            (Some("album"), _) => RowPart::Album,
            (Some("explicit"), _) => RowPart::Explicit,
            (Some("index"), _) => RowPart::Index,
            _ => return Err(SessionError::Script(format!("unknown handle {}", handle.id()))),
        };
        Ok((row, part))
    }

    fn query_within(&mut self, node: &NodeHandle, selector: &str) -> Result<Vec<NodeHandle>, SessionError> {
        let (row, _) = self.resolve_row(node)?;
        let base = node.id();
        let handle = |suffix: &str| NodeHandle::new(format!("{base}:{suffix}"));
        let profile = &self.profile;

        let found = if selector == profile.entry_link {
            if row.linked { vec![handle("track")] } else { Vec::new() }
        } else if selector == profile.secondary_link {
            (0..row.artists.len()).map(|k| handle(&format!("artist:{k}"))).collect()
        } else if profile.collection_links.first().is_some_and(|s| s == selector) {
            row.album.iter().map(|_| handle("album")).collect()
        } else if selector == profile.explicit_marker {
            if row.explicit { vec![handle("explicit")] } else { Vec::new() }
        } else if profile.rank_cells.first().is_some_and(|s| s == selector) {
            vec![handle("index")]
        } else {
            Vec::new()
        };
        Ok(found)
    }

    fn text(&mut self, node: &NodeHandle) -> Result<String, SessionError> {
        if let Some(field) = node.id().strip_prefix("meta:") {
            let meta = self.metadata.as_ref().ok_or(SessionError::Stale)?;
            return Ok(match field {
                "title" => meta.title.clone(),
                "description" => meta.description.clone(),
                _ => meta.stats.clone(),
            });
        }
        if node.id() == "consent" {
            return Ok("Accept cookies".into());
        }
        let (row, part) = self.resolve_row(node)?;
        Ok(match part {
            RowPart::Row | RowPart::Track => row.title,
            RowPart::Artist(k) => row.artists.get(k).map(|(n, _)| n.clone()).unwrap_or_default(),
            RowPart::Album => row.album.map(|(name, _)| name).unwrap_or_default(),
            RowPart::Explicit => "E".into(),
            RowPart::Index => row.rank.to_string(),
        })
    }

    fn attribute(&mut self, node: &NodeHandle, name: &str) -> Result<Option<String>, SessionError> {
        if !node.id().starts_with("row:") {
            return Ok(None);
        }
        let (row, part) = self.resolve_row(node)?;
        let value = match (part, name) {
            (RowPart::Row, n) if n == self.profile.rank_attribute => self
                .rank_attribute
                .then(|| (row.rank + self.profile.rank_attribute_offset).to_string()),
            (RowPart::Row, "aria-label") => Some(row.aria_label()),
            (RowPart::Track, "href") => Some(format!(
                "https://open.spotify.com/track/{}?si=fake",
                row.track_id
            )),
            (RowPart::Artist(k), "href") => row
                .artists
                .get(k)
                .map(|(_, id)| format!("https://open.spotify.com/artist/{id}")),
            (RowPart::Album, "href") => row
                .album
                .map(|(_, id)| format!("https://open.spotify.com/album/{id}")),
            _ => None,
        };
        Ok(value)
    }

    fn query_all(&mut self, selector: &str) -> Vec<NodeHandle> {
        if selector == self.profile.row {
            return self.query_rows();
        }
        if self.consent_pending && self.consent.as_deref() == Some(selector) {
            return vec![NodeHandle::new("consent")];
        }
        let containers: Vec<NodeHandle> = self
            .containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.selector == selector)
            .map(|(i, _)| NodeHandle::new(format!("container:{}:{i}", self.container_generation)))
            .collect();
        if !containers.is_empty() {
            return containers;
        }
        if self.metadata.is_some() {
            let profile = &self.profile;
            let field = if profile.title.first().is_some_and(|s| s == selector) {
                Some("title")
            } else if profile.description.first().is_some_and(|s| s == selector) {
                Some("description")
            } else if profile.stats.first().is_some_and(|s| s == selector) {
                Some("stats")
            } else {
                None
            };
            if let Some(field) = field {
                return vec![NodeHandle::new(format!("meta:{field}"))];
            }
        }
        Vec::new()
    }

    fn container_index(&self, arg: Option<&ScriptArg>) -> Result<usize, SessionError> {
        let Some(ScriptArg::Node(handle)) = arg else {
            return Err(SessionError::Script("expected a container argument".into()));
        };
        let mut parts = handle.id().split(':');
        if parts.next() != Some("container") {
            return Err(SessionError::Script(format!("not a container: {}", handle.id())));
        }
        if parts.next() != Some(self.container_generation.to_string().as_str()) {
            return Err(SessionError::Stale);
        }
        parts
            .next()
            .and_then(|i| i.parse::<usize>().ok())
            .filter(|&i| i < self.containers.len())
            .ok_or(SessionError::Stale)
    }

    fn replace_container(&mut self, index: usize) -> bool {
        if self.container_replacements == 0 {
            return false;
        }
        self.container_replacements -= 1;
        self.rerender_container(index);
        true
    }

    /// Invalidate every container handle, mounting the pending replacement
    /// at `index` if there is one.
    fn rerender_container(&mut self, index: usize) {
        if let Some(replacement) = self.replacement.take() {
            self.containers[index] = replacement;
        }
        self.container_generation += 1;
    }

    fn record_move(&mut self, kind: ScrollKind) {
        self.moves.push(kind);
        self.frame += 1;
        self.row_generation += 1;
    }

    /// Move container `index` to `target` if `kind` works. Returns the new top.
    fn scroll_container(&mut self, index: usize, target: f64, kind: ScrollKind) -> f64 {
        let container = &mut self.containers[index];
        if !self.working.contains(&kind) {
            return container.top;
        }
        let next = target.clamp(0.0, container.max_top());
        let moved = next > container.top;
        container.top = next;
        if moved {
            self.record_move(kind);
            if self.container_replacements_after_scroll > 0 {
                self.container_replacements_after_scroll -= 1;
                self.rerender_container(index);
            }
        }
        next
    }

    fn run_script(&mut self, code: &str, args: &[ScriptArg]) -> Result<Value, SessionError> {
        let number = |arg: Option<&ScriptArg>| match arg {
            Some(ScriptArg::Value(v)) => v.as_f64().ok_or_else(|| SessionError::Script("expected a number".into())),
            _ => Err(SessionError::Script("expected a number".into())),
        };

        match code {
            scripts::MEASURE => {
                let c = &self.containers[self.container_index(args.first())?];
                Ok(json!({ "top": c.top, "height": c.height, "visible": c.visible }))
            }
            scripts::SET_OFFSET => {
                let index = self.container_index(args.first())?;
                if self.replace_container(index) {
                    return Err(SessionError::Stale);
                }
                let target = number(args.get(1))?;
                let top = self.scroll_container(index, target, ScrollKind::Offset);
                Ok(json!(top))
            }
            scripts::SCROLL_BY => {
                let index = self.container_index(args.first())?;
                if self.replace_container(index) {
                    return Err(SessionError::Stale);
                }
                let target = self.containers[index].top + number(args.get(1))?;
                self.scroll_container(index, target, ScrollKind::ScrollBy);
                Ok(Value::Null)
            }
            scripts::WINDOW_OFFSET => Ok(json!(self.window_offset)),
            scripts::WINDOW_SCROLL_BY => {
                let step = number(args.first())?;
                if self.working.contains(&ScrollKind::Window) && step > 0.0 {
                    self.window_offset += step;
                    self.record_move(ScrollKind::Window);
                }
                Ok(Value::Null)
            }
            scripts::RESET => {
                let index = self.container_index(args.first())?;
                self.containers[index].top = 0.0;
                Ok(Value::Null)
            }
            scripts::FOCUS => Ok(Value::Null),
            other => Err(SessionError::Script(format!("unsupported script: {other}"))),
        }
    }
}

#[async_trait]
impl BrowserSession for VirtualPage {
    async fn open(&self, url: &str) -> Result<(), SessionError> {
        let mut s = self.live()?;
        s.open_count += 1;
        if s.failing_opens > 0 {
            s.failing_opens -= 1;
            return Err(SessionError::Navigation("net::ERR_CONNECTION_RESET".into()));
        }
        if !s.lists.contains_key(url) {
            return Err(SessionError::Navigation(format!("VirtualPage: no list registered for {url}")));
        }
        s.current = Some(url.to_string());
        s.frame = 0;
        s.row_generation += 1;
        s.container_generation += 1;
        s.window_offset = 0.0;
        s.consent_pending = s.consent.is_some();
        for container in &mut s.containers {
            container.top = 0.0;
        }
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<NodeHandle>, SessionError> {
        Ok(self.live()?.query_all(selector))
    }

    async fn query_within(
        &self,
        node: &NodeHandle,
        selector: &str,
    ) -> Result<Vec<NodeHandle>, SessionError> {
        self.live()?.query_within(node, selector)
    }

    async fn text(&self, node: &NodeHandle) -> Result<String, SessionError> {
        self.live()?.text(node)
    }

    async fn attribute(
        &self,
        node: &NodeHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        self.live()?.attribute(node, name)
    }

    async fn click(&self, node: &NodeHandle) -> Result<(), SessionError> {
        let mut s = self.live()?;
        if node.id() == "consent" {
            if !s.consent_pending {
                return Err(SessionError::Stale);
            }
            s.consent_pending = false;
            s.consent_clicks += 1;
        }
        Ok(())
    }

    async fn run_script(&self, code: &str, args: &[ScriptArg]) -> Result<Value, SessionError> {
        self.live()?.run_script(code, args)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.state().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_url_fails_to_open() {
        let page = VirtualPage::new(&PageProfile::spotify_playlist());
        let err = page.open("https://example.test/missing").await.unwrap_err();
        assert!(matches!(err, SessionError::Navigation(_)));
        assert_eq!(page.open_count(), 1);
    }

    #[tokio::test]
    async fn scrolling_invalidates_row_handles() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile)
            .with_list("https://example.test/l", numbered_frames(&[1..=3, 4..=6]));
        page.open("https://example.test/l").await.unwrap();

        let rows = page.query_all(&profile.row).await.unwrap();
        page.run_script(scripts::WINDOW_SCROLL_BY, &[ScriptArg::from(1200_i64)])
            .await
            .unwrap();

        assert_eq!(page.text(&rows[0]).await.unwrap_err(), SessionError::Stale);
        let fresh = page.query_all(&profile.row).await.unwrap();
        assert_eq!(page.text(&fresh[0]).await.unwrap(), "Track 4");
    }

    #[tokio::test]
    async fn closed_page_rejects_calls() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile).with_list("https://example.test/l", numbered_frames(&[1..=3]));
        page.close().await.unwrap();
        page.close().await.unwrap();

        assert!(page.is_closed());
        assert!(page.query_all(&profile.row).await.is_err());
    }
}
