/// CSS selectors and URL conventions for one family of list pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProfile {
    /// Prefix that turns a bare list id into a URL.
    pub list_base_url: String,
    /// One mounted entry row.
    pub row: String,
    /// Candidate scroll containers, in preference order.
    pub containers: Vec<String>,
    /// Consent/cookie buttons that may block the page.
    pub consent_buttons: Vec<String>,
    pub rank_attribute: String,
    /// Subtracted from `rank_attribute` (e.g. when a header row takes index 1).
    pub rank_attribute_offset: u32,
    /// Cells whose text holds the rank, used when the attribute is missing.
    pub rank_cells: Vec<String>,
    pub entry_link: String,
    pub entry_path: String,
    pub secondary_link: String,
    pub secondary_path: String,
    pub collection_links: Vec<String>,
    pub collection_path: String,
    pub explicit_marker: String,
    pub title: Vec<String>,
    pub description: Vec<String>,
    pub stats: Vec<String>,
}

impl PageProfile {
    /// Spotify web player playlist pages.
    pub fn spotify_playlist() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            list_base_url: "https://open.spotify.com/playlist/".into(),
            row: r#"[data-testid="tracklist-row"]"#.into(),
            containers: strings(&[
                r#"div[data-testid="playlist-tracklist"]"#,
                r#"div[data-testid="scroll-wrapper"]"#,
                "div[data-overlayscrollbars-viewport]",
            ]),
            consent_buttons: strings(&[
                r#"button[id="onetrust-accept-btn-handler"]"#,
                r#"button[data-testid="cookie-banner-accept-button"]"#,
                r#"button[data-testid="consent-accept-button"]"#,
            ]),
            rank_attribute: "aria-rowindex".into(),
            rank_attribute_offset: 0,
            rank_cells: strings(&[
                r#"[data-testid="tracklist-row-index"]"#,
                r#"span[data-testid="index"]"#,
            ]),
            entry_link: r#"a[href*="/track/"]"#.into(),
            entry_path: "/track/".into(),
            secondary_link: r#"a[href*="/artist/"]"#.into(),
            secondary_path: "/artist/".into(),
            collection_links: strings(&[
                r#"a[href*="/album/"]"#,
                r#"[data-testid="tracklist-row-album-name"]"#,
            ]),
            collection_path: "/album/".into(),
            explicit_marker: r#"span[aria-label="Explicit"]"#.into(),
            title: strings(&[
                r#"[data-testid="entityTitle"]"#,
                r#"h1[data-encore-id="type"]"#,
            ]),
            description: strings(&[
                r#"[data-testid="entityDescription"]"#,
                r#"div[data-testid="description"]"#,
            ]),
            stats: strings(&[
                r#"[data-testid="entityStats"]"#,
                r#"span[class*="Stat"]"#,
            ]),
        }
    }

    /// Accept a bare id or a full URL; drop any query string.
    pub fn list_url(&self, reference: &str) -> String {
        let reference = reference.trim();
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return strip_query(reference).to_string();
        }
        format!("{}{}", self.list_base_url, reference)
    }
}

impl Default for PageProfile {
    fn default() -> Self {
        Self::spotify_playlist()
    }
}

pub fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// The path segment following `marker`, e.g. the id in `/track/<id>?si=..`.
pub fn id_after(href: &str, marker: &str) -> Option<String> {
    let href = strip_query(href);
    let (_, rest) = href.split_once(marker)?;
    let id = rest.split('/').next().unwrap_or_default();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ids_become_playlist_urls() {
        let profile = PageProfile::spotify_playlist();
        assert_eq!(
            profile.list_url("37i9dQZEVXbLRQDuF5jeBp"),
            "https://open.spotify.com/playlist/37i9dQZEVXbLRQDuF5jeBp"
        );
    }

    #[test]
    fn urls_lose_their_query() {
        let profile = PageProfile::spotify_playlist();
        assert_eq!(
            profile.list_url("https://open.spotify.com/playlist/abc?si=123"),
            "https://open.spotify.com/playlist/abc"
        );
    }

    #[test]
    fn id_after_marker() {
        assert_eq!(
            id_after("https://open.spotify.com/track/4uLU6h?si=x", "/track/"),
            Some("4uLU6h".into())
        );
        assert_eq!(id_after("https://open.spotify.com/album/", "/album/"), None);
        assert_eq!(id_after("https://example.com/other", "/track/"), None);
    }
}
