use std::collections::HashSet;
use std::sync::RwLock;

use url::Url;

/// Service URLs the connector is allowed to send bearer tokens to.
///
/// An authenticated bot refuses to call a service URL that has not been
/// trusted, so a forged inbound activity cannot redirect its token.
/// Entries are keyed by origin (`scheme://host[:port]`).
#[derive(Debug, Default)]
pub struct TrustedServiceUrls {
    origins: RwLock<HashSet<String>>,
}

impl TrustedServiceUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a service URL as trusted. Idempotent; unparseable URLs are ignored.
    pub fn trust(&self, service_url: &str) {
        let Some(origin) = origin_of(service_url) else {
            tracing::warn!(service_url, "refusing to trust unparseable service url");
            return;
        };
        let mut origins = self
            .origins
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        origins.insert(origin);
    }

    pub fn is_trusted(&self, service_url: &str) -> bool {
        let Some(origin) = origin_of(service_url) else {
            return false;
        };
        self.origins
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&origin)
    }
}

fn origin_of(service_url: &str) -> Option<String> {
    let url = Url::parse(service_url).ok()?;
    if !url.has_host() {
        return None;
    }
    Some(url.origin().ascii_serialization())
}
