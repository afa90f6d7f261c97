pub mod matchers;

use std::collections::BTreeMap;

use matchers::MATCHERS;
use tracing::trace;

use crate::catalog::Service;

/// A link matched for one service together with its canonical ID.
///
/// The link is never empty. The ID may be, when none could be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLink {
    pub link: String,
    pub id: String,
}

/// Tests `href` against every registered pattern and returns one entry per
/// matching service.
pub fn classify(href: &str) -> Vec<(Service, ServiceLink)> {
    MATCHERS
        .iter()
        .filter_map(|matcher| matcher.classify(href).map(|found| (matcher.service(), found)))
        .collect()
}

/// Links found for a single catalog item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    links: BTreeMap<Service, ServiceLink>,
}
impl LinkSet {
    /// Classifies `hrefs` in order. A later match for a service replaces an
    /// earlier one.
    pub fn from_hrefs<I, S>(hrefs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for href in hrefs {
            set.absorb(href.as_ref());
        }
        set
    }

    pub fn absorb(&mut self, href: &str) {
        for (service, found) in classify(href) {
            trace!(%service, link = ?found.link, id = ?found.id, "Matched link");
            self.links.insert(service, found);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Service, &ServiceLink)> {
        self.links.iter().map(|(service, found)| (*service, found))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
impl LinkSet {
    pub fn get(&self, service: Service) -> Option<&ServiceLink> {
        self.links.get(&service)
    }
}
