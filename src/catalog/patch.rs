use std::collections::BTreeMap;

use super::Service;
use crate::links::LinkSet;

/// Partial update for the link columns of one catalog row.
///
/// A column is only written when it is present here. Empty values are never
/// stored, so a patch can add links but never clear one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPatch {
    urls: BTreeMap<Service, String>,
    ids: BTreeMap<Service, String>,
}
impl LinkPatch {
    pub fn set(&mut self, service: Service, link: impl Into<String>, id: impl Into<String>) {
        let link = link.into();
        let id = id.into();

        if !link.is_empty() {
            self.urls.insert(service, link);
        }
        if !id.is_empty() {
            self.ids.insert(service, id);
        }
    }

    pub fn url(&self, service: Service) -> Option<&str> {
        self.urls.get(&service).map(String::as_str)
    }

    pub fn id(&self, service: Service) -> Option<&str> {
        self.ids.get(&service).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.ids.is_empty()
    }

    /// Column/value pairs to write, in a stable order.
    pub fn assignments(&self) -> Vec<(&'static str, &str)> {
        Service::ALL
            .into_iter()
            .flat_map(|service| {
                [
                    self.url(service).map(|v| (service.url_column(), v)),
                    self.id(service).map(|v| (service.id_column(), v)),
                ]
            })
            .flatten()
            .collect()
    }
}

impl From<&LinkSet> for LinkPatch {
    fn from(links: &LinkSet) -> Self {
        let mut patch = Self::default();
        for (service, found) in links.iter() {
            patch.set(service, found.link.as_str(), found.id.as_str());
        }
        patch
    }
}
