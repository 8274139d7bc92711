//! # Icecast Listener Scrape
//!
//! Current listeners are read off Icecast's admin page
//! `/admin/listclients.xsl?mount=/<mount>.ogg`. The page is HTML meant for
//! humans; the IPs sit in the first cell of each row of the table inside
//! `<div class="scrolltable">`.
//!
//! Any failure (no credentials, HTTP error, different markup) gives an empty
//! list. A layout change on the Icecast side therefore shows up as "no
//! listeners", not as an error.

use crate::config::BasicAuth;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::time::Duration;

lazy_static! {
    static ref SCROLLTABLE: Regex =
        Regex::new(r#"(?is)<div class="scrolltable">(.+?)</div>"#).expect("valid regex");
    static ref TBODY: Regex = Regex::new(r"(?is)<tbody>(.+?)</tbody>").expect("valid regex");
    static ref FIRST_CELL: Regex = Regex::new(r"(?is)<tr>\s*<td>([^<]+)</td>").expect("valid regex");
}

/// Source of the current listener set.
pub trait ListenerSource {
    /// Listener IPs in page order. `paused` selects the fallback mount.
    fn listeners(&self, paused: bool) -> Vec<String>;
}

/// Icecast admin client.
pub struct IcecastAdmin {
    agent: ureq::Agent,
    base_url: String,
    live_mount: String,
    fallback_mount: String,
    auth: Option<BasicAuth>,
}

impl IcecastAdmin {
    pub fn new(
        base_url: impl Into<String>,
        live_mount: impl Into<String>,
        fallback_mount: impl Into<String>,
        auth: Option<BasicAuth>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.into(),
            live_mount: live_mount.into(),
            fallback_mount: fallback_mount.into(),
            auth,
        }
    }

    /// Admin page URL for the live mount, or the silence mount when paused.
    pub fn admin_url(&self, paused: bool) -> String {
        let mount = if paused { &self.fallback_mount } else { &self.live_mount };
        format!(
            "{}/admin/listclients.xsl?mount=/{}.ogg",
            self.base_url.trim_end_matches('/'),
            mount
        )
    }

    fn fetch(&self, url: &str, auth: &BasicAuth) -> Result<String> {
        let response = self
            .agent
            .get(url)
            .set("Authorization", &auth.header_value())
            .call()
            .context("Icecast admin request failed")?;
        response.into_string().context("Failed to read Icecast admin page")
    }
}

impl ListenerSource for IcecastAdmin {
    fn listeners(&self, paused: bool) -> Vec<String> {
        let Some(auth) = &self.auth else {
            debug!("No Icecast credentials configured, listener list left empty");
            return Vec::new();
        };

        let url = self.admin_url(paused);
        match self.fetch(&url, auth) {
            Ok(page) => parse_listeners(&page),
            Err(e) => {
                warn!("Unable to fetch listeners from {url}: {e:#}");
                Vec::new()
            }
        }
    }
}

/// Pull listener IPs out of the admin page HTML.
pub fn parse_listeners(page: &str) -> Vec<String> {
    let Some(table) = SCROLLTABLE.captures(page).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    let Some(body) = TBODY.captures(table.as_str()).and_then(|c| c.get(1)) else {
        return Vec::new();
    };

    FIRST_CELL
        .captures_iter(body.as_str())
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}
