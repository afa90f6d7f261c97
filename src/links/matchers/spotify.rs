use once_cell::sync::Lazy;
use regex::Regex;

use super::{last_path_segment, Matcher};
use crate::catalog::Service;

static TRACK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^(https://open.spotify.com/track/)(.*)$").expect("Invalid regex")
});

#[derive(Debug)]
pub struct SpotifyMatcher;

impl Matcher for SpotifyMatcher {
    fn service(&self) -> Service {
        Service::Spotify
    }

    fn find<'a>(&self, href: &'a str) -> Option<&'a str> {
        TRACK_REGEX.find(href).map(|m| m.as_str())
    }

    fn canonical_id(&self, link: &str) -> String {
        last_path_segment(link).to_owned()
    }
}
