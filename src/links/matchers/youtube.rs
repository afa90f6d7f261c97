use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::error;
use url::Url;

use super::Matcher;
use crate::catalog::Service;

// `\w` and `\S` are spelled out as ASCII classes.
static VIDEO_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^((?:https?:)?//)?((?:www|m|music)\.)?((?:youtube\.com|youtu.be))(/(?:[0-9A-Za-z_\-]+\?v=|embed/|v/)?)([0-9A-Za-z_\-]+)([^\t\n\f\r ]+)?$",
    )
    .expect("Invalid regex")
});

/// Scheme-less and protocol-relative matches are resolved against this.
static RELATIVE_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("https://youtube.com/").expect("Invalid base URL"));

#[derive(Debug)]
pub struct YoutubeMatcher;

impl Matcher for YoutubeMatcher {
    fn service(&self) -> Service {
        Service::Youtube
    }

    fn find<'a>(&self, href: &'a str) -> Option<&'a str> {
        VIDEO_REGEX.find(href).map(|m| m.as_str())
    }

    /// The `v` query parameter, or empty when there is none.
    fn canonical_id(&self, link: &str) -> String {
        let url = match Url::options().base_url(Some(&*RELATIVE_BASE)).parse(link) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, link, "Could not get URL queries from YouTube URL");
                return String::new();
            }
        };

        url.query()
            .and_then(|query| first_query_value(query, "v"))
            .unwrap_or_default()
    }
}

/// Strict query lookup: pairs containing `;` or a malformed `%` escape are
/// dropped instead of being decoded leniently.
fn first_query_value(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.contains(';'))
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if decode_component(key)? != name {
                return None;
            }
            decode_component(value)
        })
}

fn decode_component(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let well_formed = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'%')
        .all(|(i, _)| {
            bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        });
    if !well_formed {
        return None;
    }

    Some(
        percent_decode_str(&raw.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned(),
    )
}
