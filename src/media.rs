//! Storage and retrieval of event thumbnails and clips
//!
//! Files live under the media directory and are referenced from event rows
//! by their path relative to that directory, e.g. *thumbnails/12.jpg*.


use std::io::ErrorKind;
use std::path::PathBuf;

use log::{debug, trace, warn};
use reqwest::Client;
use tokio::fs;

use crate::config::Config;
use crate::error::{Error, Result};


/// Kind of media Frigate provides for an event
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaKind {
    Thumbnail,
    Snapshot,
    Clip,
}

impl MediaKind {

    /// Last path segment of the Frigate API endpoint
    fn endpoint(self) -> &'static str {
        match self {
            MediaKind::Thumbnail => "thumbnail.jpg",
            MediaKind::Snapshot => "snapshot.jpg",
            MediaKind::Clip => "clip.mp4",
        }
    }

    /// Relative storage path for the given event
    ///
    /// Snapshots replace thumbnails, so both share one file.
    pub fn file_name(self, event_id: i32) -> String {
        match self {
            MediaKind::Thumbnail | MediaKind::Snapshot => format!("thumbnails/{}.jpg", event_id),
            MediaKind::Clip => format!("clips/{}.mp4", event_id),
        }
    }
}


/// Media files on local disk
#[derive(Clone, Debug)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {

    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        MediaStore { root: root.into() }
    }

    /// Creates the media directories if they do not yet exist
    pub async fn init(&self) -> Result<()> {

        for dir in &["thumbnails", "clips"] {
            let path = self.root.join(dir);
            trace!("ensuring {} exists", path.display());
            fs::create_dir_all(&path).await?;
        }

        Ok(())
    }

    /// Absolute path of a stored file
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn write(&self, relative: &str, data: &[u8]) -> Result<()> {

        let path = self.resolve(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        debug!("writing {} bytes to {}", data.len(), path.display());
        fs::write(&path, data).await?;

        Ok(())
    }

    /// Deletes a stored file
    ///
    /// Missing files are ignored and other failures are only logged, since
    /// the database row referencing the file is removed regardless.
    pub async fn remove(&self, relative: Option<&str>) {

        let Some(relative) = relative else {
            return;
        };

        let path = self.resolve(relative);
        match fs::remove_file(&path).await {
            Ok(()) => trace!("removed {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => warn!("failed to remove {}: {}", path.display(), err),
        }
    }
}


/// Downloads event media from the Frigate API
#[derive(Debug)]
pub struct MediaFetcher {
    client: Client,
    frigate_url: Option<String>,
}

impl MediaFetcher {

    pub fn new(client: Client, config: &Config) -> Self {
        MediaFetcher {
            client,
            frigate_url: config.frigate_url.clone(),
        }
    }

    /// Whether a Frigate API is configured
    pub fn enabled(&self) -> bool {
        self.frigate_url.is_some()
    }

    pub fn url(&self, frigate_id: &str, kind: MediaKind) -> Option<String> {
        self.frigate_url.as_ref()
            .map(|base| format!("{}/api/events/{}/{}", base, frigate_id, kind.endpoint()))
    }

    /// Downloads one media file of a Frigate event
    pub async fn fetch(&self, frigate_id: &str, kind: MediaKind) -> Result<Vec<u8>> {

        let url = self.url(frigate_id, kind)
            .ok_or_else(|| Error::Config(String::from("PW_FRIGATE_URL"), String::from("not set")))?;

        debug!("downloading {}", url);
        let data = self.client.get(&url)
            .send().await?
            .error_for_status()?
            .bytes().await?;

        Ok(data.to_vec())
    }
}
