use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::profile::PageProfile;
use crate::session::BrowserSession;
use crate::types::ListMetadata;

static RE_ADVERTISED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,.]*)\s+(?:songs|tracks|items)\b").unwrap());

/// "50 songs, about 2 hr 45 min" -> 50.
pub fn parse_advertised_count(stats: &str) -> Option<u32> {
    let caps = RE_ADVERTISED_COUNT.captures(stats)?;
    let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Read the list header. Every field is optional and failures are ignored.
pub async fn read_metadata(session: &dyn BrowserSession, profile: &PageProfile) -> ListMetadata {
    let title = first_text(session, &profile.title).await;
    let description = first_text(session, &profile.description).await;
    let stats = first_text(session, &profile.stats).await;
    let advertised_count = stats.as_deref().and_then(parse_advertised_count);

    debug!(?title, ?advertised_count, "List metadata");
    ListMetadata {
        title,
        description,
        advertised_count,
    }
}

async fn first_text(session: &dyn BrowserSession, selectors: &[String]) -> Option<String> {
    for selector in selectors {
        let Ok(nodes) = session.query_all(selector).await else {
            continue;
        };
        let Some(node) = nodes.first() else {
            continue;
        };
        if let Ok(text) = session.text(node).await {
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{numbered_frames, VirtualPage};

    #[test]
    fn advertised_count_variants() {
        assert_eq!(parse_advertised_count("50 songs, 2 hr 41 min"), Some(50));
        assert_eq!(parse_advertised_count("1,234 Tracks"), Some(1234));
        assert_eq!(parse_advertised_count("12 items"), Some(12));
        assert_eq!(parse_advertised_count("2 hr 41 min"), None);
    }

    #[tokio::test]
    async fn reads_header_fields() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile)
            .with_list("https://example.test/top", numbered_frames(&[1..=5]))
            .with_metadata("Top 50 - Global", "Your daily update", "50 songs, 2 hr 41 min");
        page.open("https://example.test/top").await.unwrap();

        let meta = read_metadata(&page, &profile).await;
        assert_eq!(meta.title.as_deref(), Some("Top 50 - Global"));
        assert_eq!(meta.description.as_deref(), Some("Your daily update"));
        assert_eq!(meta.advertised_count, Some(50));
    }

    #[tokio::test]
    async fn missing_header_is_empty_metadata() {
        let profile = PageProfile::spotify_playlist();
        let page = VirtualPage::new(&profile)
            .with_list("https://example.test/top", numbered_frames(&[1..=5]));
        page.open("https://example.test/top").await.unwrap();

        assert_eq!(read_metadata(&page, &profile).await, ListMetadata::default());
    }
}
