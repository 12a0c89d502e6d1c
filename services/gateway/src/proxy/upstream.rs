//! Upstream address composition.
//!
//! The base URL is a deployment secret: it is held here, joined with the
//! percent-encoded camera key, and never rendered into logs, errors or
//! responses. `Debug` is redacted accordingly.
use super::format::StreamFormat;
use crate::config::UpstreamConfig;
use anyhow::{Context, bail};
use reqwest::Url;
use std::fmt;

#[derive(Clone)]
pub struct UpstreamTarget {
    base: Url,
}

impl fmt::Debug for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamTarget")
            .field("base", &"<redacted>")
            .finish()
    }
}

impl UpstreamTarget {
    pub fn parse(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).context("parse upstream base url")?;
        if !matches!(base.scheme(), "http" | "https") {
            bail!("upstream base url must use http or https");
        }
        if base.cannot_be_a_base() {
            bail!("upstream base url cannot carry path segments");
        }
        Ok(Self { base })
    }

    pub fn from_config(config: &UpstreamConfig) -> anyhow::Result<Self> {
        Self::parse(&config.base_url)
    }

    /// `<base>/<encoded camera key>/<format suffix>`; the key always occupies
    /// exactly one path segment.
    pub fn url_for(&self, camera_key: &str, format: StreamFormat) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(camera_key)
                .push(format.upstream_suffix());
        }
        url
    }
}
