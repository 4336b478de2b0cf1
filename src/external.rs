//! Interfaces of the collaborators that live outside the engine: the media fetcher that
//! downloads a post's clip and text, and the translation service.

use std::path::{Path, PathBuf};

use crate::error::ReelResult;

/// What a fetcher hands to the engine for one post.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMedia {
    pub video_path: PathBuf,
    pub text: String,
    pub author_name: Option<String>,
    /// Duration reported by the platform, used when ffprobe cannot tell.
    pub duration_hint: Option<f64>,
}

pub trait MediaFetcher {
    /// Download the clip for `url` into `workdir`. Failures are `ReelError::Collaborator`.
    fn fetch(&self, url: &str, workdir: &Path) -> ReelResult<FetchedMedia>;
}

pub trait Translator {
    /// Return `text` translated with the given credential. The result replaces the post
    /// text verbatim.
    fn translate(&self, text: &str, credential: &str) -> ReelResult<String>;
}

/// Fetcher for media that is already on disk, e.g. a clip passed on the command line.
/// The URL only identifies the post; nothing is downloaded.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub video_path: PathBuf,
    pub text: String,
    pub author_name: Option<String>,
    pub duration_hint: Option<f64>,
}

impl MediaFetcher for LocalMedia {
    fn fetch(&self, _url: &str, _workdir: &Path) -> ReelResult<FetchedMedia> {
        Ok(FetchedMedia {
            video_path: self.video_path.clone(),
            text: self.text.clone(),
            author_name: self.author_name.clone(),
            duration_hint: self.duration_hint,
        })
    }
}
