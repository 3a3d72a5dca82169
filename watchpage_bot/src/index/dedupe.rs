use std::collections::HashSet;

use url::Url;

use super::record::VideoRecord;

/// File extensions that get stripped off source references.
const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "avi", "flv", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ts", "webm", "wmv",
];

/// Canonical form of a source reference: trimmed, with trailing video file
/// extensions removed, so `abc123.mp4` and `abc123` are the same video.
/// Other dotted suffixes are part of the reference (`movie.2023` stays as is).
/// Returns `None` for empty references.
///
/// Normalizing an already normalized reference changes nothing.
#[must_use]
pub fn normalize_source_ref(source_ref: &str) -> Option<String> {
    let mut stem = source_ref.trim();
    if stem.is_empty() {
        return None;
    }

    while let Some((rest, ext)) = stem.rsplit_once('.') {
        let is_video_extension = VIDEO_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext));
        if rest.trim_end().is_empty() || !is_video_extension {
            break;
        }
        stem = rest.trim_end();
    }

    Some(stem.to_string())
}

/// Canonical form of an origin URL: trimmed, without fragment and without a
/// trailing slash on a non-root path. Strings that aren't URLs are only trimmed.
#[must_use]
pub fn normalize_origin_url(origin_url: &str) -> Option<String> {
    let trimmed = origin_url.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(mut url) = Url::parse(trimmed) else {
        return Some(trimmed.to_string());
    };
    url.set_fragment(None);
    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/').to_string();
        url.set_path(&stripped);
    }
    Some(url.to_string())
}

fn record_source_ref(record: &VideoRecord) -> Option<String> {
    record.source_ref.as_deref().and_then(normalize_source_ref)
}

fn record_origin_url(record: &VideoRecord) -> Option<String> {
    record.origin_url.as_deref().and_then(normalize_origin_url)
}

/// Find a record that already covers this source.
///
/// Source references are compared first, then origin URLs, both normalized.
/// Absent or empty keys never match anything.
#[must_use]
pub fn is_duplicate<'a>(
    records: &'a [VideoRecord],
    source_ref: Option<&str>,
    origin_url: Option<&str>,
) -> Option<&'a VideoRecord> {
    if let Some(wanted) = source_ref.and_then(normalize_source_ref) {
        if let Some(found) = records
            .iter()
            .find(|r| record_source_ref(r).as_deref() == Some(wanted.as_str()))
        {
            return Some(found);
        }
    }

    let wanted = origin_url.and_then(normalize_origin_url)?;
    records
        .iter()
        .find(|r| record_origin_url(r).as_deref() == Some(wanted.as_str()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Records dropped as duplicates.
    pub removed: usize,
    /// Records whose `source_ref` was rewritten to its normalized form.
    pub fixed: usize,
    /// Records left in the index.
    pub remaining: usize,
}

impl ReindexReport {
    #[must_use]
    pub fn changed_anything(&self) -> bool {
        self.removed > 0 || self.fixed > 0
    }
}

/// Drop duplicate records in place and normalize stored source references.
///
/// The first record seen wins for each `video_id`, source reference and
/// origin URL. Running it twice changes nothing the second time.
pub fn reindex(records: &mut Vec<VideoRecord>) -> ReindexReport {
    let mut report = ReindexReport::default();
    let mut seen_ids = HashSet::new();
    let mut seen_refs = HashSet::new();
    let mut seen_origins = HashSet::new();

    records.retain_mut(|record| {
        let source_ref = record_source_ref(record);
        let origin_url = record_origin_url(record);

        let duplicate = seen_ids.contains(&record.video_id)
            || source_ref.as_ref().is_some_and(|r| seen_refs.contains(r))
            || origin_url.as_ref().is_some_and(|u| seen_origins.contains(u));
        if duplicate {
            log::info!("Reindex: dropping duplicate record {}", record.video_id);
            report.removed += 1;
            return false;
        }

        seen_ids.insert(record.video_id.clone());
        if let Some(origin_url) = origin_url {
            seen_origins.insert(origin_url);
        }
        if let Some(source_ref) = source_ref {
            if record.source_ref.as_deref() != Some(source_ref.as_str()) {
                log::info!(
                    "Reindex: normalizing source ref of {} to {source_ref}",
                    record.video_id
                );
                record.source_ref = Some(source_ref.clone());
                report.fixed += 1;
            }
            seen_refs.insert(source_ref);
        }
        true
    });

    report.remaining = records.len();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::record::SourceKind;

    fn record(id: &str, source_ref: Option<&str>, origin_url: Option<&str>) -> VideoRecord {
        let mut record = VideoRecord::new(id, format!("Video {id}"), SourceKind::ManualUpload);
        record.source_ref = source_ref.map(String::from);
        record.origin_url = origin_url.map(String::from);
        record
    }

    #[test]
    fn source_refs_lose_extensions() {
        assert_eq!(normalize_source_ref("abc123.mp4").as_deref(), Some("abc123"));
        assert_eq!(normalize_source_ref("  abc123  ").as_deref(), Some("abc123"));
        assert_eq!(normalize_source_ref("abc.WebM").as_deref(), Some("abc"));
        assert_eq!(normalize_source_ref("abc.mp4.mkv").as_deref(), Some("abc"));
        // Not a video extension.
        assert_eq!(normalize_source_ref("abc.toolong").as_deref(), Some("abc.toolong"));
        assert_eq!(normalize_source_ref("abc.m-4").as_deref(), Some("abc.m-4"));
        assert_eq!(normalize_source_ref("movie.2023.mp4").as_deref(), Some("movie.2023"));
        assert_eq!(normalize_source_ref(".mp4").as_deref(), Some(".mp4"));
        assert_eq!(normalize_source_ref("   "), None);
        assert_eq!(normalize_source_ref(""), None);
    }

    #[test]
    fn source_ref_normalization_is_stable() {
        for source_ref in ["movie.2023.mp4", "abc.mp4.mp4", "v1.2.3", "x .mp4", ".mp4", "AgADBAAD"] {
            let once = normalize_source_ref(source_ref).unwrap();
            assert_eq!(normalize_source_ref(&once).as_deref(), Some(once.as_str()), "{source_ref}");
        }
    }

    #[test]
    fn dotted_refs_stay_distinct() {
        let stored = normalize_source_ref("movie.2023.mp4");
        let records = vec![record("a", stored.as_deref(), None)];
        assert!(is_duplicate(&records, Some("movie.2024.mp4"), None).is_none());
        assert!(is_duplicate(&records, Some("movie.2023"), None).is_some());
        assert!(is_duplicate(&records, Some("movie.2023.MP4"), None).is_some());

        let mut records = records;
        assert!(!reindex(&mut records).changed_anything());
        assert_eq!(records[0].source_ref.as_deref(), Some("movie.2023"));
    }

    #[test]
    fn origin_urls_lose_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_origin_url(" https://host.example/v/xyz/#t=10 ").as_deref(),
            Some("https://host.example/v/xyz")
        );
        assert_eq!(
            normalize_origin_url("https://host.example/v/xyz?a=1").as_deref(),
            Some("https://host.example/v/xyz?a=1")
        );
        assert_eq!(
            normalize_origin_url("https://host.example/").as_deref(),
            Some("https://host.example/")
        );
        assert_eq!(normalize_origin_url("not a url").as_deref(), Some("not a url"));
        assert_eq!(normalize_origin_url(""), None);
    }

    #[test]
    fn duplicate_by_normalized_source_ref() {
        let records = vec![record("a", Some("abc123"), None)];
        let found = is_duplicate(&records, Some("abc123.mp4"), None).unwrap();
        assert_eq!(found.video_id, "a");
        assert!(is_duplicate(&records, Some("abc124"), None).is_none());
    }

    #[test]
    fn duplicate_by_origin_url() {
        let records = vec![
            record("a", None, Some("https://host.example/v/1")),
            record("b", Some("zzz"), None),
        ];
        let found = is_duplicate(&records, Some("other"), Some("https://host.example/v/1/")).unwrap();
        assert_eq!(found.video_id, "a");
    }

    #[test]
    fn absent_keys_never_match() {
        let records = vec![record("a", None, None), record("b", Some(""), Some(" "))];
        assert!(is_duplicate(&records, None, None).is_none());
        assert!(is_duplicate(&records, Some(""), Some("")).is_none());
        assert!(is_duplicate(&records, Some("   "), None).is_none());
    }

    #[test]
    fn reindex_keeps_first_and_fixes_refs() {
        let mut records = vec![
            record("new", Some("abc.mp4"), None),
            record("old", Some("abc"), None),
            record("other", Some("def"), Some("https://host.example/x")),
            record("copy", None, Some("https://host.example/x#frag")),
            record("other", Some("ghi"), None),
            record("plain", None, None),
        ];

        let report = reindex(&mut records);
        assert_eq!(
            report,
            ReindexReport {
                removed: 3,
                fixed: 1,
                remaining: 3
            }
        );
        let ids: Vec<_> = records.iter().map(|r| r.video_id.as_str()).collect();
        assert_eq!(ids, ["new", "other", "plain"]);
        assert_eq!(records[0].source_ref.as_deref(), Some("abc"));

        // Idempotent.
        let again = reindex(&mut records);
        assert!(!again.changed_anything());
        assert_eq!(again.remaining, 3);
    }

    #[test]
    fn reindex_of_nothing() {
        let mut records = Vec::new();
        assert_eq!(reindex(&mut records), ReindexReport::default());
    }
}
