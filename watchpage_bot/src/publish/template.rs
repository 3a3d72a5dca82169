use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

/// Values substituted into a page template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageFields {
    pub video_url: String,
    pub thumb_url: String,
    pub player_page_url: String,
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub time_ago: String,
    /// Serialized listing of other videos, inserted as-is into a script block.
    pub all_videos_json: String,
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Z_]+)\s*\}\}").expect("Regex will always be valid")
});

/// Keep a JSON document from closing the `<script>` element it sits in.
fn escape_json_for_script(json: &str) -> String {
    json.replace("</", "<\\/")
}

fn url(s: &str) -> String {
    html_escape::encode_double_quoted_attribute(s).into_owned()
}

fn text(s: &str) -> String {
    html_escape::encode_safe(s).into_owned()
}

/// Replace every placeholder `value` knows. The rest stay as they are.
fn substitute(template: &str, value: impl Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            value(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Substitute the `{{PLACEHOLDER}}`s of `template`.
///
/// Unknown placeholders stay as they are, known ones without a value become
/// empty. Text is HTML-escaped, URLs are escaped for attribute values.
#[must_use]
pub fn render(template: &str, fields: &PageFields) -> String {
    substitute(template, |name| {
        Some(match name {
            "VIDEO_URL" => url(&fields.video_url),
            "THUMB_URL" => url(&fields.thumb_url),
            "PLAYER_PAGE_URL" => url(&fields.player_page_url),
            "VIDEO_ID" => text(&fields.video_id),
            "TITLE" | "VIDEO_TITLE" => text(&fields.title),
            "DESCRIPTION" | "VIDEO_DESCRIPTION" => text(&fields.description),
            "TIME_AGO" => text(&fields.time_ago),
            "ALL_VIDEOS_JSON" => escape_json_for_script(&fields.all_videos_json),
            _ => return None,
        })
    })
}

/// Values substituted into the gallery template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalleryFields {
    pub video_count: usize,
    /// Ready-made markup, see [`video_card`].
    pub video_cards: String,
    pub all_videos_json: String,
}

#[must_use]
pub fn render_gallery(template: &str, fields: &GalleryFields) -> String {
    substitute(template, |name| {
        Some(match name {
            "VIDEO_COUNT" => fields.video_count.to_string(),
            "VIDEO_CARDS" => fields.video_cards.clone(),
            "ALL_VIDEOS_JSON" => escape_json_for_script(&fields.all_videos_json),
            _ => return None,
        })
    })
}

/// One linked thumbnail of the gallery.
#[must_use]
pub fn video_card(page_url: &str, thumb_url: &str, title: &str) -> String {
    format!(
        "<a class=\"video-card\" href=\"{}\"><img src=\"{}\" alt=\"{}\" loading=\"lazy\"><h3>{}</h3></a>\n",
        url(page_url),
        url(thumb_url),
        url(title),
        text(title),
    )
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

/// Human label for how long ago `then` was, like `5 minutes ago`.
/// Moments in the future count as `just now`.
#[must_use]
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if seconds < 60 {
        "just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else if days < 30 {
        plural(days, "day")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}
