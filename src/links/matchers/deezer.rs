use once_cell::sync::Lazy;
use regex::Regex;

use super::{last_path_segment, Matcher};
use crate::catalog::Service;

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^https?://(?:www\.)?deezer\.com/(track|album|playlist)/([0-9]+)$")
        .expect("Invalid regex")
});

#[derive(Debug)]
pub struct DeezerMatcher;

impl Matcher for DeezerMatcher {
    fn service(&self) -> Service {
        Service::Deezer
    }

    fn find<'a>(&self, href: &'a str) -> Option<&'a str> {
        ENTITY_REGEX.find(href).map(|m| m.as_str())
    }

    fn canonical_id(&self, link: &str) -> String {
        last_path_segment(link).to_owned()
    }
}
