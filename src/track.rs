use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use serde::de;
use serde::Deserialize;
use serde::Deserializer;

/// One track record from a listing page.
///
/// Fetched fresh on every pagination pass and never persisted; the archive
/// directory itself is the sync state.
#[derive(Debug, Deserialize)]
pub struct Track {
    pub id: u64,
    pub title: String,
    #[serde(default, deserialize_with = "opt_datetime_from_iso")]
    release_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_datetime_from_iso")]
    created_at: Option<DateTime<Utc>>,
    pub download_url: String,
    /// Byte size from the track metadata. The live response's content-length
    /// takes precedence; this only fills in when that header is missing.
    pub original_content_size: u64,
}

fn opt_datetime_from_iso<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = de::Deserialize::deserialize(deserializer)?;
    match raw {
        Some(raw) => {
            let datetime = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%SZ")
                .map_err(de::Error::custom)?;
            Ok(Some(Utc.from_utc_datetime(&datetime)))
        }
        None => Ok(None),
    }
}

impl Track {
    /// Release instant, falling back to the upload instant for tracks that
    /// never carried an explicit release date.
    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.release_date.or(self.created_at)
    }

    /// Final on-disk name: `[YYYY-MM-DD] <sanitized title> [<id>].mp3`.
    ///
    /// The id embedded in the name maps the file back to exactly one track,
    /// so a file's existence marks that track as archived. `None` when the
    /// record carries no usable timestamp at all.
    pub fn target_filename(&self) -> Option<String> {
        let released = self.released_at()?;
        Some(format!(
            "[{}] {} [{}].mp3",
            released.format("%Y-%m-%d"),
            sanitize_filename(&self.title),
            self.id
        ))
    }

    /// Transient name used while the body is being streamed to disk.
    pub fn temp_filename(&self) -> String {
        format!("!track-{}.tmp", self.id)
    }
}

/// One page of the track listing.
#[derive(Debug, Deserialize)]
pub struct TracksPage {
    pub collection: Vec<Track>,
    next_href: Option<String>,
}

impl TracksPage {
    /// A present, non-empty `next_href` signals a further page.
    pub fn has_more(&self) -> bool {
        self.next_href.as_deref().is_some_and(|href| !href.is_empty())
    }
}

/// Strips every character outside the allow-list (ASCII letters, digits,
/// space and `- _ . , ( )`). Titles differing only in stripped characters
/// collide onto the same name; the later track wins the path.
pub fn sanitize_filename(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ',' | '(' | ')'))
        .collect()
}

#[cfg(test)]
mod test {
    use std::fs::File;

    use super::*;

    #[test]
    fn parse_tracks_page() {
        let page: TracksPage =
            serde_json::from_reader(File::open("tests/fixtures/tracks.json").unwrap()).unwrap();
        assert_eq!(page.collection.len(), 3);
        assert!(page.has_more());
        assert_eq!(page.collection[0].id, 186342);
        assert_eq!(
            page.collection[0].released_at().unwrap(),
            Utc.with_ymd_and_hms(2014, 7, 21, 9, 52, 16).unwrap()
        );
    }

    #[test]
    fn released_at_falls_back_to_created_at() {
        let track: Track = serde_json::from_value(serde_json::json!({
            "id": 7,
            "title": "Untitled",
            "release_date": null,
            "created_at": "2015-03-02T18:00:00Z",
            "download_url": "https://api-v2.soundcloud.com/tracks/7/download",
            "original_content_size": 42,
        }))
        .unwrap();
        assert_eq!(
            track.released_at().unwrap(),
            Utc.with_ymd_and_hms(2015, 3, 2, 18, 0, 0).unwrap()
        );
    }

    #[test]
    fn target_filename_embeds_date_title_and_id() {
        let track: Track = serde_json::from_value(serde_json::json!({
            "id": 186342,
            "title": "Morning / Glory?",
            "release_date": "2014-07-21T09:52:16Z",
            "download_url": "https://api-v2.soundcloud.com/tracks/186342/download",
            "original_content_size": 42,
        }))
        .unwrap();
        assert_eq!(
            track.target_filename().unwrap(),
            "[2014-07-21] Morning  Glory [186342].mp3"
        );
        assert_eq!(track.temp_filename(), "!track-186342.tmp");
    }

    #[test]
    fn target_filename_requires_some_timestamp() {
        let track: Track = serde_json::from_value(serde_json::json!({
            "id": 9,
            "title": "No dates",
            "download_url": "https://api-v2.soundcloud.com/tracks/9/download",
            "original_content_size": 42,
        }))
        .unwrap();
        assert!(track.target_filename().is_none());
    }

    #[test]
    fn sanitize_drops_disallowed_characters() {
        assert_eq!(sanitize_filename("A/B: Test?"), "AB Test");
        assert_eq!(sanitize_filename("mix_03.2 (live, demo)"), "mix_03.2 (live, demo)");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_filename("Ünt/it:led №5");
        assert_eq!(sanitize_filename(&once), once);
    }

    #[test]
    fn no_next_page_when_next_href_missing_or_empty() {
        let page: TracksPage =
            serde_json::from_value(serde_json::json!({ "collection": [] })).unwrap();
        assert!(!page.has_more());

        let page: TracksPage =
            serde_json::from_value(serde_json::json!({ "collection": [], "next_href": "" }))
                .unwrap();
        assert!(!page.has_more());

        let page: TracksPage =
            serde_json::from_value(serde_json::json!({ "collection": [], "next_href": null }))
                .unwrap();
        assert!(!page.has_more());
    }
}
