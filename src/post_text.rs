use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::error::{ReelError, ReelResult};
use crate::external::Translator;

fn link_patterns() -> &'static [Regex; 2] {
    static LINK_RES: OnceLock<[Regex; 2]> = OnceLock::new();
    LINK_RES.get_or_init(|| {
        [
            Regex::new(r"https?://\S+").expect("link regex should compile"),
            Regex::new(r"pic\.twitter\.com/\S+").expect("media link regex should compile"),
        ]
    })
}

fn post_url_pattern() -> &'static Regex {
    static POST_URL_RE: OnceLock<Regex> = OnceLock::new();
    POST_URL_RE.get_or_init(|| {
        Regex::new(r"^https?://(?:www\.)?(twitter\.com|x\.com|vxtwitter\.com|fxtwitter\.com)/")
            .expect("post url regex should compile")
    })
}

fn job_id_pattern() -> &'static Regex {
    static JOB_ID_RE: OnceLock<Regex> = OnceLock::new();
    JOB_ID_RE.get_or_init(|| Regex::new(r"^[a-f0-9]{8}$").expect("job id regex should compile"))
}

/// Strip links, trim every line and drop the empty ones.
pub fn clean_post_text(text: &str) -> String {
    let mut cleaned = text.to_owned();
    for pattern in link_patterns() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text that goes on the card: optionally translated, then cleaned. Empty results are
/// rejected so no render starts without text.
pub fn prepare_post(
    raw: &str,
    translation: Option<(&dyn Translator, &str)>,
) -> ReelResult<String> {
    let text = match translation {
        Some((translator, credential)) => {
            if credential.trim().is_empty() {
                return Err(ReelError::input("translation requested without a credential"));
            }
            let translated = translator.translate(raw, credential)?;
            info!(chars = translated.chars().count(), "post text translated");
            translated
        }
        None => raw.to_owned(),
    };

    let cleaned = clean_post_text(&text);
    if cleaned.is_empty() {
        return Err(ReelError::input("post text is empty after removing links"));
    }
    Ok(cleaned)
}

/// Accept post URLs from the supported hosts and rewrite embed mirrors to the canonical host.
pub fn normalize_post_url(url: &str) -> ReelResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ReelError::input("post URL is missing"));
    }
    if !post_url_pattern().is_match(url) {
        return Err(ReelError::input(format!("unsupported post URL '{url}'")));
    }
    Ok(url
        .replacen("vxtwitter.com", "twitter.com", 1)
        .replacen("fxtwitter.com", "twitter.com", 1))
}

/// Short job id: the first 8 hex characters of a random v4 UUID.
pub fn new_job_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub fn is_valid_job_id(id: &str) -> bool {
    job_id_pattern().is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shouting;

    impl Translator for Shouting {
        fn translate(&self, text: &str, _credential: &str) -> ReelResult<String> {
            Ok(text.to_uppercase())
        }
    }

    struct Unavailable;

    impl Translator for Unavailable {
        fn translate(&self, _text: &str, _credential: &str) -> ReelResult<String> {
            Err(ReelError::collaborator("translator", "quota exceeded"))
        }
    }

    #[test]
    fn links_and_blank_lines_are_removed() {
        let raw = "  Big news today https://t.co/abc123  \n\n pic.twitter.com/xyz\nsecond line  ";
        assert_eq!(clean_post_text(raw), "Big news today\nsecond line");
    }

    #[test]
    fn text_made_only_of_links_is_rejected() {
        assert!(matches!(
            prepare_post("https://t.co/a http://b.co", None),
            Err(ReelError::Input(_))
        ));
    }

    #[test]
    fn translation_happens_before_cleaning() {
        let translator: &dyn Translator = &Shouting;
        let text = prepare_post("hello https://t.co/x", Some((translator, "key"))).unwrap();
        assert_eq!(text, "HELLO");
    }

    #[test]
    fn translation_needs_a_credential_and_surfaces_failures() {
        let shouting: &dyn Translator = &Shouting;
        let unavailable: &dyn Translator = &Unavailable;
        assert!(matches!(
            prepare_post("hello", Some((shouting, " "))),
            Err(ReelError::Input(_))
        ));
        assert!(matches!(
            prepare_post("hello", Some((unavailable, "key"))),
            Err(ReelError::Collaborator { .. })
        ));
    }

    #[test]
    fn mirror_hosts_are_normalized() {
        assert_eq!(
            normalize_post_url("https://vxtwitter.com/a/status/1").unwrap(),
            "https://twitter.com/a/status/1"
        );
        assert_eq!(
            normalize_post_url("https://x.com/a/status/1").unwrap(),
            "https://x.com/a/status/1"
        );
        assert!(normalize_post_url("https://example.com/a").is_err());
        assert!(normalize_post_url("").is_err());
    }

    #[test]
    fn job_ids_are_eight_hex_chars() {
        let id = new_job_id();
        assert!(is_valid_job_id(&id), "{id}");
        assert!(!is_valid_job_id("../etc"));
        assert!(!is_valid_job_id("ABCDEF12"));
    }
}
