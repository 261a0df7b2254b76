//! Upload protocol of the bake/bootery test rig.
//!
//! Bootloader blobs go to the bake instance with one `PUT` per file; the
//! boot image goes to bootery's `/testboot`, which flashes and power-cycles
//! the board and answers once it booted something newer than `boot-newer`.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::blocking::{Body, Client};
use tracing::info;

use crate::error::{Error, Result};
use crate::github::RepoSlug;
use crate::log_sanitize::sanitize_body;
use crate::workspace::resolve_under;

pub struct BootRig {
    http: Client,
    bake_url: Url,
    bootery_url: Url,
}

impl BootRig {
    pub fn new(bake_url: Url, bootery_url: Url) -> Result<Self> {
        // Test boots wait for real hardware; no request timeout.
        let http = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            bake_url,
            bootery_url,
        })
    }

    pub fn device_file_url(&self, name: &str) -> Result<Url> {
        let mut url = self.bake_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::msg(format!("bake URL '{}' cannot be a base", self.bake_url)))?
            .pop_if_empty()
            .extend(["device-specific", name]);
        Ok(url)
    }

    /// `PUT` the file at `src` to `url`; any 2xx counts as success.
    pub fn stream_to(&self, url: Url, src: &Path) -> Result<()> {
        let f = File::open(src)
            .map_err(|e| Error::msg(format!("failed to open {}: {e}", src.display())))?;
        let res = self
            .http
            .put(url.clone())
            .body(Body::from(f))
            .send()
            .map_err(|e| Error::msg(format!("PUT {url} failed: {e}")))?;

        let status = res.status();
        let body = res.text().unwrap_or_default();
        for line in sanitize_body(&body)? {
            info!(%url, "{line}");
        }
        if !status.is_success() {
            return Err(Error::msg(format!("PUT {url} failed with status {status}")));
        }
        Ok(())
    }

    /// Push the bootloader blobs built into `dir` to the bake instance.
    pub fn upload_bootloader(&self, dir: &Path, files: &[String]) -> Result<()> {
        for name in files {
            let src = resolve_under(dir, name)?;
            if !src.is_file() {
                return Err(Error::msg(format!(
                    "bootloader file {} is missing",
                    src.display()
                )));
            }
            info!(file = %name, "updating");
            self.stream_to(self.device_file_url(name)?, &src)?;
        }
        Ok(())
    }

    pub fn test_boot(&self, image: &Path, slug: &RepoSlug, built_at: DateTime<Utc>) -> Result<()> {
        let url = testboot_url(&self.bootery_url, slug, built_at);
        info!(%url, "test booting");
        self.stream_to(url, image)
    }
}

/// `{bootery}/testboot?slug=<owner/repo>&boot-newer=<built_at - 1s>`.
///
/// The bootery URL's path is replaced; unrelated query parameters survive.
pub fn testboot_url(bootery: &Url, slug: &RepoSlug, built_at: DateTime<Utc>) -> Url {
    let mut url = bootery.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "slug" && k != "boot-newer")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_path("/testboot");
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("slug", &slug.to_string())
        .append_pair("boot-newer", &(built_at.timestamp() - 1).to_string());
    url
}
