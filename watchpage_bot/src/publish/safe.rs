use crate::index::VideoRecord;

/// Remove every whitespace-separated word matching one of `strip_words`
/// (ignoring case and surrounding punctuation), and collapse what's left
/// onto single spaces.
#[must_use]
pub fn sanitize_text(text: &str, strip_words: &[String]) -> String {
    let strip: Vec<String> = strip_words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    text.split_whitespace()
        .filter(|word| {
            let bare = word
                .trim_matches(|c: char| c.is_ascii_punctuation())
                .to_lowercase();
            !strip.contains(&bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thumbnail for the safe page: the pre-blurred one if there is one,
/// otherwise the normal one asking the image server for a blur.
#[must_use]
pub fn safe_thumb_url(record: &VideoRecord) -> String {
    if !record.safe_thumb_url.is_empty() {
        return record.safe_thumb_url.clone();
    }
    if record.thumb_url.is_empty() {
        return String::new();
    }
    let separator = if record.thumb_url.contains('?') { '&' } else { '?' };
    format!("{}{separator}blur=10", record.thumb_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SourceKind;

    #[test]
    fn strips_words_and_collapses_whitespace() {
        let words = vec!["Hot".to_string(), "spicy".to_string()];
        assert_eq!(
            sanitize_text("  HOT   new video,  very Spicy!  ", &words),
            "new video, very"
        );
        assert_eq!(sanitize_text("hotel   stays", &words), "hotel stays");
        assert_eq!(sanitize_text("", &words), "");
        assert_eq!(sanitize_text("a \n b", &[]), "a b");
    }

    #[test]
    fn safe_thumbnail_fallbacks() {
        let mut record = VideoRecord::new("a", "A", SourceKind::ManualUpload);
        assert_eq!(safe_thumb_url(&record), "");

        record.thumb_url = "https://cdn/thumbs/a.jpg".to_string();
        assert_eq!(safe_thumb_url(&record), "https://cdn/thumbs/a.jpg?blur=10");

        record.thumb_url = "https://cdn/thumbs/a.jpg?v=2".to_string();
        assert_eq!(safe_thumb_url(&record), "https://cdn/thumbs/a.jpg?v=2&blur=10");

        record.safe_thumb_url = "https://cdn/thumbs/a_blur.jpg".to_string();
        assert_eq!(safe_thumb_url(&record), "https://cdn/thumbs/a_blur.jpg");
    }
}
