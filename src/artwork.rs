//! # Album Artwork
//!
//! On album change the loop asks for a fresh cover:
//!
//! 1. **resolve**: look in the track's directory for `Folder`, `Cover`,
//!    `folder`, `cover` with `.jpg` then `.png`; first hit wins
//! 2. **stage**: copy it into the local art directory under its own basename,
//!    overwriting whatever was there
//! 3. **publish**: multipart `POST` of the staged file (field `image`) to the
//!    station's upload endpoint with basic auth
//!
//! Publish failures are logged and otherwise ignored; the row still records
//! the cover's basename so the web page can show the last uploaded copy.

use crate::automation::HostFs;
use crate::config::BasicAuth;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Candidate basenames in lookup order.
pub const ART_NAMES: [&str; 4] = ["Folder", "Cover", "folder", "cover"];
pub const ART_EXTENSIONS: [&str; 2] = [".jpg", ".png"];

const FALLBACK_MIME: &str = "application/octet-stream";

/// Album-change hook used by the reconciliation loop.
pub trait ArtworkService {
    /// Find, stage and publish the cover for a track directory. Returns the
    /// cover's basename, or `None` when the directory has no cover.
    fn refresh(&self, track_dir: &Path) -> Option<String>;
}

/// Resolver, stager and publisher wired together.
pub struct ArtworkPipeline {
    fs: Box<dyn HostFs>,
    art_dir: PathBuf,
    uploader: ArtUploader,
}

impl ArtworkPipeline {
    pub fn new(fs: Box<dyn HostFs>, art_dir: PathBuf, uploader: ArtUploader) -> Self {
        Self { fs, art_dir, uploader }
    }

    /// First existing cover candidate inside `dir`.
    pub fn resolve(&self, dir: &Path) -> Option<PathBuf> {
        ART_NAMES
            .iter()
            .flat_map(|name| ART_EXTENSIONS.iter().map(move |ext| dir.join(format!("{name}{ext}"))))
            .find(|candidate| self.fs.file_exists(candidate))
    }

    /// Copy `source` into the art directory, keeping its basename.
    pub fn stage_local(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .with_context(|| format!("Art path has no file name: {}", source.display()))?;
        let destination = self.art_dir.join(name);

        debug!("Copying album art {} -> {}", source.display(), destination.display());
        self.fs.copy_file(source, &destination)?;
        Ok(destination)
    }

    pub fn publish(&self, local: &Path) -> bool {
        self.uploader.publish(local)
    }
}

impl ArtworkService for ArtworkPipeline {
    fn refresh(&self, track_dir: &Path) -> Option<String> {
        let Some(cover) = self.resolve(track_dir) else {
            info!("No album art found in {}", track_dir.display());
            return None;
        };
        let name = cover.file_name()?.to_string_lossy().into_owned();

        match self.stage_local(&cover) {
            Ok(staged) => {
                self.publish(&staged);
            }
            Err(e) => warn!("{e:#}"),
        }

        Some(name)
    }
}

/// Uploads staged covers to the web server.
pub struct ArtUploader {
    agent: ureq::Agent,
    url: String,
    auth: Option<BasicAuth>,
}

impl ArtUploader {
    pub fn new(url: impl Into<String>, auth: Option<BasicAuth>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            url: url.into(),
            auth,
        }
    }

    /// Upload `local`. Never fails loudly: every problem is logged and
    /// reported as `false`.
    pub fn publish(&self, local: &Path) -> bool {
        let Some(auth) = &self.auth else {
            warn!("No uploader credentials configured, skipping art upload");
            return false;
        };

        match self.try_publish(local, auth) {
            Ok(true) => {
                info!("Uploaded art {}", local.display());
                true
            }
            Ok(false) => {
                warn!("Unable to upload art: upload endpoint did not acknowledge");
                false
            }
            Err(e) => {
                warn!("Unable to upload art: {e:#}");
                false
            }
        }
    }

    fn try_publish(&self, local: &Path, auth: &BasicAuth) -> Result<bool> {
        let bytes = fs::read(local)
            .with_context(|| format!("Failed to read staged art: {}", local.display()))?;
        let filename = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cover".to_string());

        let boundary = format!("----nowplaying{:016x}", rand::random::<u64>());
        let body = multipart_body(&boundary, "image", &filename, mime_for(&bytes), &bytes);

        let response = self
            .agent
            .post(&self.url)
            .set("Authorization", &auth.header_value())
            .set("Content-Type", &format!("multipart/form-data; boundary={boundary}"))
            .send_bytes(&body)
            .context("Art upload request failed")?;

        let reply = response.into_string().context("Failed to read upload response")?;
        Ok(is_acknowledged(&reply))
    }
}

/// MIME type sniffed from the image bytes.
pub fn mime_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(FALLBACK_MIME)
}

/// The upload script answers with a bare number on success.
fn is_acknowledged(reply: &str) -> bool {
    let reply = reply.trim();
    !reply.is_empty() && reply.parse::<f64>().is_ok()
}

/// Single-file `multipart/form-data` body.
pub fn multipart_body(
    boundary: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let filename: String = filename
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\r' | '\n' => '_',
            c => c,
        })
        .collect();
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
