mod patch;

use std::fmt::Display;

pub use patch::LinkPatch;

use crate::links::matchers::MATCHERS;

/// External services a catalog item can carry a link for.
///
/// Only some of these have a registered link matcher. The rest exist as
/// storage columns so a matcher can be added later without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Service {
    Deezer,
    Soundcloud,
    Spotify,
    Youtube,
    Tidal,
    AppleMusic,
}
impl Service {
    pub const ALL: [Self; 6] = [
        Self::Deezer,
        Self::Soundcloud,
        Self::Spotify,
        Self::Youtube,
        Self::Tidal,
        Self::AppleMusic,
    ];

    pub const fn url_column(self) -> &'static str {
        match self {
            Self::Deezer => "deezer_url",
            Self::Soundcloud => "soundcloud_url",
            Self::Spotify => "spotify_url",
            Self::Youtube => "youtube_url",
            Self::Tidal => "tidal_url",
            Self::AppleMusic => "applemusic_url",
        }
    }

    pub const fn id_column(self) -> &'static str {
        match self {
            Self::Deezer => "deezer_id",
            Self::Soundcloud => "soundcloud_id",
            Self::Spotify => "spotify_id",
            Self::Youtube => "youtube_id",
            Self::Tidal => "tidal_id",
            Self::AppleMusic => "applemusic_id",
        }
    }

    /// Whether a link matcher is registered for this service.
    pub fn is_classified(self) -> bool {
        MATCHERS.iter().any(|m| m.service() == self)
    }
}
impl Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deezer => f.write_str("Deezer"),
            Self::Soundcloud => f.write_str("Soundcloud"),
            Self::Spotify => f.write_str("Spotify"),
            Self::Youtube => f.write_str("YouTube"),
            Self::Tidal => f.write_str("Tidal"),
            Self::AppleMusic => f.write_str("Apple Music"),
        }
    }
}

/// Per-service link columns embedded in a catalog row.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct LinkMetadata {
    pub deezer_url: String,
    pub deezer_id: String,
    pub soundcloud_url: String,
    pub soundcloud_id: String,
    pub spotify_url: String,
    pub spotify_id: String,
    pub youtube_url: String,
    pub youtube_id: String,
    pub tidal_url: String,
    pub tidal_id: String,
    pub applemusic_url: String,
    pub applemusic_id: String,
}
impl LinkMetadata {
    pub fn url(&self, service: Service) -> &str {
        match service {
            Service::Deezer => &self.deezer_url,
            Service::Soundcloud => &self.soundcloud_url,
            Service::Spotify => &self.spotify_url,
            Service::Youtube => &self.youtube_url,
            Service::Tidal => &self.tidal_url,
            Service::AppleMusic => &self.applemusic_url,
        }
    }
}

#[cfg(test)]
impl LinkMetadata {
    pub fn id(&self, service: Service) -> &str {
        match service {
            Service::Deezer => &self.deezer_id,
            Service::Soundcloud => &self.soundcloud_id,
            Service::Spotify => &self.spotify_id,
            Service::Youtube => &self.youtube_id,
            Service::Tidal => &self.tidal_id,
            Service::AppleMusic => &self.applemusic_id,
        }
    }

    /// Writes only the fields present in `patch`.
    pub fn apply(&mut self, patch: &LinkPatch) {
        for service in Service::ALL {
            if let Some(url) = patch.url(service) {
                *self.url_mut(service) = url.to_owned();
            }
            if let Some(id) = patch.id(service) {
                *self.id_mut(service) = id.to_owned();
            }
        }
    }

    fn url_mut(&mut self, service: Service) -> &mut String {
        match service {
            Service::Deezer => &mut self.deezer_url,
            Service::Soundcloud => &mut self.soundcloud_url,
            Service::Spotify => &mut self.spotify_url,
            Service::Youtube => &mut self.youtube_url,
            Service::Tidal => &mut self.tidal_url,
            Service::AppleMusic => &mut self.applemusic_url,
        }
    }

    fn id_mut(&mut self, service: Service) -> &mut String {
        match service {
            Service::Deezer => &mut self.deezer_id,
            Service::Soundcloud => &mut self.soundcloud_id,
            Service::Spotify => &mut self.spotify_id,
            Service::Youtube => &mut self.youtube_id,
            Service::Tidal => &mut self.tidal_id,
            Service::AppleMusic => &mut self.applemusic_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct CatalogItem {
    pub item_id: i64,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub url: String,
    #[sqlx(rename = "acr_id")]
    pub lookup_key: String,
    #[sqlx(flatten)]
    pub links: LinkMetadata,
}
impl CatalogItem {
    /// An item needs enrichment when it has a lookup key and none of the
    /// classified services has a link yet.
    pub fn is_eligible(&self) -> bool {
        !self.lookup_key.is_empty()
            && Service::ALL
                .into_iter()
                .filter(|s| s.is_classified())
                .all(|s| self.links.url(s).is_empty())
    }
}
