use tracing::debug;

use crate::error::SessionError;
use crate::profile::{id_after, strip_query, PageProfile};
use crate::session::{BrowserSession, NodeHandle};
use crate::types::{Entry, EntryFlags, LinkedLabel};

const UNKNOWN_TITLE: &str = "Unknown Track";

/// What one read of the mounted rows produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub candidates: Vec<Entry>,
    /// Rows present when the pass started.
    pub nodes: usize,
    /// Rows skipped because they went stale mid-read.
    pub stale: usize,
    /// Rows read fine but carrying no usable rank.
    pub unranked: usize,
}

impl PassReport {
    pub fn read(&self) -> usize {
        self.candidates.len()
    }

    /// Rows were present but none could be read: the frame was swapped under us.
    pub fn is_stale_frame(&self) -> bool {
        self.nodes > 0 && self.candidates.is_empty()
    }
}

pub struct EntryExtractor<'a> {
    profile: &'a PageProfile,
}

impl<'a> EntryExtractor<'a> {
    pub fn new(profile: &'a PageProfile) -> Self {
        Self { profile }
    }

    /// Read every currently mounted row. Stale rows are skipped, not fatal.
    pub async fn extract_pass(&self, session: &dyn BrowserSession) -> Result<PassReport, SessionError> {
        let rows = session.query_all(&self.profile.row).await?;
        let mut report = PassReport {
            nodes: rows.len(),
            ..Default::default()
        };

        for row in &rows {
            match self.read_row(session, row).await {
                Ok(Some(entry)) => report.candidates.push(entry),
                Ok(None) => report.unranked += 1,
                Err(SessionError::Stale) => report.stale += 1,
                Err(e) => return Err(e),
            }
        }

        debug!(
            nodes = report.nodes,
            read = report.read(),
            stale = report.stale,
            unranked = report.unranked,
            "Extraction pass"
        );
        Ok(report)
    }

    async fn read_row(
        &self,
        session: &dyn BrowserSession,
        row: &NodeHandle,
    ) -> Result<Option<Entry>, SessionError> {
        let Some(rank) = self.read_rank(session, row).await? else {
            return Ok(None);
        };

        let mut entry_href = None;
        let mut entry_text = None;
        for link in session.query_within(row, &self.profile.entry_link).await? {
            let href = session.attribute(&link, "href").await?.unwrap_or_default();
            if href.contains(&self.profile.entry_path) {
                entry_text = Some(session.text(&link).await?.trim().to_string());
                entry_href = Some(href);
                break;
            }
        }

        let primary_label = match entry_text.filter(|t| !t.is_empty()) {
            Some(text) => text,
            None => session
                .attribute(row, "aria-label")
                .await?
                .and_then(|label| title_from_aria_label(&label))
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        };

        let mut secondary_labels = Vec::new();
        for link in session.query_within(row, &self.profile.secondary_link).await? {
            let name = session.text(&link).await?.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let href = session.attribute(&link, "href").await?;
            secondary_labels.push(self.linked(name, href.as_deref(), &self.profile.secondary_path));
        }

        let collection = self.read_collection(session, row).await?;
        let explicit = !session
            .query_within(row, &self.profile.explicit_marker)
            .await?
            .is_empty();

        Ok(Some(Entry {
            rank,
            primary_label,
            secondary_labels,
            collection,
            canonical_id: entry_href
                .as_deref()
                .and_then(|href| id_after(href, &self.profile.entry_path)),
            flags: EntryFlags { explicit },
            source_url: entry_href.as_deref().map(|href| strip_query(href).to_string()),
        }))
    }

    async fn read_rank(
        &self,
        session: &dyn BrowserSession,
        row: &NodeHandle,
    ) -> Result<Option<u32>, SessionError> {
        if let Some(raw) = session.attribute(row, &self.profile.rank_attribute).await? {
            if let Ok(value) = raw.trim().parse::<u32>() {
                let rank = value.saturating_sub(self.profile.rank_attribute_offset);
                if rank > 0 {
                    return Ok(Some(rank));
                }
            }
        }

        for selector in &self.profile.rank_cells {
            for cell in session.query_within(row, selector).await? {
                if let Ok(rank) = session.text(&cell).await?.trim().parse::<u32>() {
                    if rank > 0 {
                        return Ok(Some(rank));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn read_collection(
        &self,
        session: &dyn BrowserSession,
        row: &NodeHandle,
    ) -> Result<Option<LinkedLabel>, SessionError> {
        for selector in &self.profile.collection_links {
            let Some(element) = session.query_within(row, selector).await?.into_iter().next() else {
                continue;
            };
            let name = session.text(&element).await?.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let href = session
                .attribute(&element, "href")
                .await?
                .filter(|h| h.contains(&self.profile.collection_path));
            return Ok(Some(self.linked(name, href.as_deref(), &self.profile.collection_path)));
        }
        Ok(None)
    }

    fn linked(&self, name: String, href: Option<&str>, marker: &str) -> LinkedLabel {
        LinkedLabel {
            name,
            url: href.map(|h| strip_query(h).to_string()),
            id: href.and_then(|h| id_after(h, marker)),
        }
    }
}

/// "Play Espresso by Sabrina Carpenter" -> "Espresso".
fn title_from_aria_label(label: &str) -> Option<String> {
    let rest = label.strip_prefix("Play ")?;
    let title = rest.split(" by ").next()?.trim();
    (!title.is_empty()).then(|| title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{numbered_frames, FakeRow, VirtualPage};

    const URL: &str = "https://example.test/list";

    #[tokio::test]
    async fn reads_all_fields_of_a_row() {
        let profile = PageProfile::spotify_playlist();
        let row = FakeRow::numbered(7).with_album("Short n' Sweet", "alb7");
        let page = VirtualPage::new(&profile).with_list(URL, vec![vec![row]]);
        page.open(URL).await.unwrap();

        let pass = EntryExtractor::new(&profile).extract_pass(&page).await.unwrap();
        assert_eq!(pass.nodes, 1);
        let entry = &pass.candidates[0];
        assert_eq!(entry.rank, 7);
        assert_eq!(entry.primary_label, "Track 7");
        assert_eq!(entry.canonical_id.as_deref(), Some("t7"));
        assert_eq!(
            entry.source_url.as_deref(),
            Some("https://open.spotify.com/track/t7")
        );
        assert_eq!(entry.secondary_labels[0].name, "Artist 7");
        assert_eq!(entry.secondary_labels[0].id.as_deref(), Some("a7"));
        let album = entry.collection.as_ref().unwrap();
        assert_eq!(album.name, "Short n' Sweet");
        assert_eq!(album.id.as_deref(), Some("alb7"));
        assert!(entry.flags.explicit);
    }

    #[tokio::test]
    async fn stale_rows_are_skipped_and_counted() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile)
            .with_list(URL, numbered_frames(&[1..=10]))
            .with_stale_once(&[3, 4]);
        page.open(URL).await.unwrap();

        let pass = EntryExtractor::new(&profile).extract_pass(&page).await.unwrap();
        assert_eq!(pass.nodes, 10);
        assert_eq!(pass.read(), 8);
        assert_eq!(pass.stale, 2);
        assert!(!pass.is_stale_frame());
        assert!(pass.candidates.iter().all(|e| e.rank != 3 && e.rank != 4));
    }

    #[tokio::test]
    async fn fully_stale_frame_is_flagged() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile)
            .with_list(URL, numbered_frames(&[1..=5]))
            .with_stale_frames(1);
        page.open(URL).await.unwrap();

        let extractor = EntryExtractor::new(&profile);
        let first = extractor.extract_pass(&page).await.unwrap();
        assert!(first.is_stale_frame());
        assert_eq!(first.stale, 5);

        let second = extractor.extract_pass(&page).await.unwrap();
        assert_eq!(second.read(), 5);
    }

    #[tokio::test]
    async fn rank_falls_back_to_index_cell() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile)
            .with_list(URL, numbered_frames(&[4..=6]))
            .without_rank_attribute();
        page.open(URL).await.unwrap();

        let pass = EntryExtractor::new(&profile).extract_pass(&page).await.unwrap();
        let ranks: Vec<u32> = pass.candidates.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn title_falls_back_to_aria_label_without_link() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile).with_list(URL, vec![vec![FakeRow::numbered(2).without_link()]]);
        page.open(URL).await.unwrap();

        let pass = EntryExtractor::new(&profile).extract_pass(&page).await.unwrap();
        let entry = &pass.candidates[0];
        assert_eq!(entry.primary_label, "Track 2");
        assert_eq!(entry.canonical_id, None);
        assert_eq!(entry.source_url, None);
    }

    #[test]
    fn aria_label_parsing() {
        assert_eq!(
            title_from_aria_label("Play Die With A Smile by Lady Gaga, Bruno Mars"),
            Some("Die With A Smile".into())
        );
        assert_eq!(title_from_aria_label("Pause"), None);
    }
}
