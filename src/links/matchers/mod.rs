pub(super) mod deezer;
pub(super) mod spotify;
pub(super) mod youtube;

use once_cell::sync::Lazy;

use super::ServiceLink;
use crate::catalog::Service;

/// Every service a link on the lookup page can be classified as.
///
/// Patterns are not mutually exclusive, so callers test an href against all
/// of them rather than stopping at the first match.
pub static MATCHERS: Lazy<Vec<LinkMatcher>> = Lazy::new(|| {
    vec![
        LinkMatcher::new(spotify::SpotifyMatcher),
        LinkMatcher::new(deezer::DeezerMatcher),
        LinkMatcher::new(youtube::YoutubeMatcher),
    ]
});

#[derive(Debug)]
pub struct LinkMatcher {
    matcher: Box<dyn Matcher>,
}
impl LinkMatcher {
    fn new<T>(matcher: T) -> Self
    where
        T: Matcher + 'static,
    {
        Self {
            matcher: Box::new(matcher),
        }
    }

    pub fn service(&self) -> Service {
        self.matcher.service()
    }

    pub fn classify(&self, href: &str) -> Option<ServiceLink> {
        let link = self.matcher.find(href)?;

        Some(ServiceLink {
            link: link.to_owned(),
            id: self.matcher.canonical_id(link),
        })
    }
}

pub trait Matcher: std::fmt::Debug + Send + Sync {
    fn service(&self) -> Service;

    /// The part of `href` matched by this service's pattern.
    fn find<'a>(&self, href: &'a str) -> Option<&'a str>;

    fn canonical_id(&self, link: &str) -> String;
}

/// Last `/`-separated element of `link`, ignoring trailing slashes.
fn last_path_segment(link: &str) -> &str {
    let trimmed = link.trim_end_matches('/');
    if trimmed.is_empty() {
        return if link.is_empty() { "." } else { "/" };
    }

    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
