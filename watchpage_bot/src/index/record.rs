use std::fmt::Display;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a video came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    ManualUpload,
    RemoteFetch,
    ChatUpload,
    HostSync,
}

impl SourceKind {
    /// Parse a label, including the ones older index documents used.
    /// Anything unrecognized is a manual upload.
    #[must_use]
    pub fn from_label(label: &str) -> SourceKind {
        match label.trim() {
            "remote_fetch" | "remote_link" => SourceKind::RemoteFetch,
            "chat_upload" | "telegram" => SourceKind::ChatUpload,
            "host_sync" | "sync" => SourceKind::HostSync,
            _ => SourceKind::ManualUpload,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ManualUpload => "manual_upload",
            SourceKind::RemoteFetch => "remote_fetch",
            SourceKind::ChatUpload => "chat_upload",
            SourceKind::HostSync => "host_sync",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the index.
///
/// Deserialization goes through a JSON map so documents written by older
/// tooling (`videoid`, `thumburl`, `streamtape_id`, `date`...) still load,
/// and fields this bot doesn't know about are written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub thumb_url: String,
    pub safe_thumb_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub source_kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_page_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VideoRecord {
    #[must_use]
    pub fn new(video_id: impl Into<String>, title: impl Into<String>, kind: SourceKind) -> Self {
        VideoRecord {
            video_id: video_id.into(),
            title: title.into(),
            description: String::new(),
            video_url: String::new(),
            thumb_url: String::new(),
            safe_thumb_url: String::new(),
            source_ref: None,
            origin_url: None,
            created_at: None,
            source_kind: kind,
            page_url: None,
            safe_page_url: None,
            extra: Map::new(),
        }
    }
}

/// A fresh random video ID: 32 lowercase hex characters.
#[must_use]
pub fn new_video_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse RFC 3339, or the `YYYY-MM-DD HH:MM:SS` format older documents used (taken as UTC).
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, LEGACY_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn value_into_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Remove every one of `names` from `map`, returning the first non-empty string among them.
fn take_string(map: &mut Map<String, Value>, names: &[&str]) -> Option<String> {
    let mut found = None;
    for name in names {
        if let Some(value) = map.remove(*name) {
            if found.is_none() {
                found = value_into_string(value).filter(|s| !s.is_empty());
            }
        }
    }
    found
}

impl TryFrom<Map<String, Value>> for VideoRecord {
    type Error = String;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let Some(video_id) = take_string(&mut map, &["video_id", "videoid"]) else {
            return Err(String::from("index entry has no video_id"));
        };

        let raw_created_at = map.remove("created_at").filter(|v| !v.is_null());
        let raw_date = map.remove("date").filter(|v| !v.is_null());
        let parse = |value: &Value| value.as_str().and_then(parse_timestamp);
        let created_at = raw_created_at
            .as_ref()
            .and_then(parse)
            .or_else(|| raw_date.as_ref().and_then(parse));

        // Keep what we can't read, without clashing with `created_at` on write.
        if let Some(date) = raw_date.filter(|v| parse(v).is_none()) {
            map.insert("date".to_string(), date);
        }
        if let Some(unreadable) = raw_created_at.filter(|v| parse(v).is_none()) {
            let key = if created_at.is_some() { "date" } else { "created_at" };
            map.insert(key.to_string(), unreadable);
        }

        let source_kind = take_string(&mut map, &["source_kind", "source"])
            .map(|label| SourceKind::from_label(&label))
            .unwrap_or_default();

        Ok(VideoRecord {
            video_id,
            title: take_string(&mut map, &["title"]).unwrap_or_default(),
            description: take_string(&mut map, &["description"]).unwrap_or_default(),
            video_url: take_string(&mut map, &["video_url"]).unwrap_or_default(),
            thumb_url: take_string(&mut map, &["thumb_url", "thumburl", "thumb"])
                .unwrap_or_default(),
            safe_thumb_url: take_string(
                &mut map,
                &["safe_thumb_url", "thumburl_blur", "safe_thumb"],
            )
            .unwrap_or_default(),
            source_ref: take_string(&mut map, &["source_ref", "streamtape_id"]),
            origin_url: take_string(&mut map, &["origin_url"]),
            created_at,
            source_kind,
            page_url: take_string(&mut map, &["page_url", "player_page_url"]),
            safe_page_url: take_string(&mut map, &["safe_page_url", "player_page_safe_url"]),
            extra: map,
        })
    }
}

/// Explicit edit of a stored record. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordEdit {
    pub title: Option<String>,
    pub thumb_url: Option<String>,
    pub safe_thumb_url: Option<String>,
    pub page_url: Option<String>,
    pub safe_page_url: Option<String>,
}

impl RecordEdit {
    /// Returns whether anything actually changed.
    pub fn apply(&self, record: &mut VideoRecord) -> bool {
        fn set(target: &mut String, value: &Option<String>) -> bool {
            match value {
                Some(value) if target != value => {
                    value.clone_into(target);
                    true
                }
                _ => false,
            }
        }
        fn set_opt(target: &mut Option<String>, value: &Option<String>) -> bool {
            match value {
                Some(value) if target.as_ref() != Some(value) => {
                    *target = Some(value.clone());
                    true
                }
                _ => false,
            }
        }

        let mut changed = set(&mut record.title, &self.title);
        changed |= set(&mut record.thumb_url, &self.thumb_url);
        changed |= set(&mut record.safe_thumb_url, &self.safe_thumb_url);
        changed |= set_opt(&mut record.page_url, &self.page_url);
        changed |= set_opt(&mut record.safe_page_url, &self.safe_page_url);
        changed
    }
}
