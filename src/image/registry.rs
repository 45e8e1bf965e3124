//! The ordered set of uploaded images and their roles.

use crate::image::types::{ImageFormat, ImageInput, ImageRole, ImageSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Maximum number of images held at once.
pub const MAX_IMAGES: usize = 5;

/// Unique identifier of an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A file offered for upload.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    /// Display name (usually the file name).
    pub name: String,
    /// Declared MIME type, if the source provided one.
    pub mime_type: Option<String>,
    /// Content handle.
    pub source: ImageSource,
}

impl CandidateFile {
    /// A candidate backed by a file on disk. The type comes from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            mime_type: None,
            source: ImageSource::File(path),
        }
    }

    /// A candidate backed by in-memory bytes.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: Option<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type,
            source: ImageSource::Bytes(bytes.into()),
        }
    }

    /// Returns the accepted format, or `None` if the candidate must be dropped.
    ///
    /// A declared MIME type is authoritative. Without one, the name's
    /// extension decides, then the magic bytes of in-memory content.
    pub fn accepted_format(&self) -> Option<ImageFormat> {
        if let Some(mime) = &self.mime_type {
            return ImageFormat::from_mime_type(mime);
        }
        let by_name = match &self.source {
            ImageSource::File(path) => ImageFormat::from_path(path),
            ImageSource::Bytes(_) => ImageFormat::from_path(Path::new(&self.name)),
        };
        by_name.or_else(|| match &self.source {
            ImageSource::Bytes(bytes) => ImageFormat::from_magic_bytes(bytes),
            ImageSource::File(_) => None,
        })
    }
}

/// Tracks which preview references are currently live.
#[derive(Debug, Clone, Default)]
pub struct PreviewTracker {
    live: Arc<Mutex<HashSet<ImageId>>>,
    released: Arc<AtomicUsize>,
}

impl PreviewTracker {
    fn lock(&self) -> MutexGuard<'_, HashSet<ImageId>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self, id: ImageId, name: &str) -> Preview {
        self.lock().insert(id);
        Preview {
            uri: format!("preview://{}/{}", id, name),
            id,
            tracker: self.clone(),
        }
    }

    fn release(&self, id: &ImageId) {
        if self.lock().remove(id) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Returns true if the preview for `id` has not been released.
    pub fn is_live(&self, id: &ImageId) -> bool {
        self.lock().contains(id)
    }

    /// Number of previews currently held.
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Total number of previews released so far.
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// A locally-renderable preview reference, released when dropped.
#[derive(Debug)]
pub struct Preview {
    uri: String,
    id: ImageId,
    tracker: PreviewTracker,
}

impl Preview {
    /// Returns the preview URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for Preview {
    fn drop(&mut self) {
        tracing::trace!(id = %self.id, "released preview");
        self.tracker.release(&self.id);
    }
}

/// An image accepted into the registry.
#[derive(Debug)]
pub struct UploadedImage {
    id: ImageId,
    name: String,
    format: ImageFormat,
    source: ImageSource,
    preview: Preview,
    role: ImageRole,
}

impl UploadedImage {
    /// Unique id.
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Content handle.
    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// Preview reference.
    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    /// Assigned role.
    pub fn role(&self) -> ImageRole {
        self.role
    }

    fn to_input(&self) -> ImageInput {
        ImageInput {
            source: self.source.clone(),
            mime_type: self.format.mime_type().to_string(),
            role: self.role,
        }
    }
}

/// Ordered collection of uploaded images, capped at [`MAX_IMAGES`].
#[derive(Debug, Default)]
pub struct ImageRegistry {
    entries: Vec<UploadedImage>,
    previews: PreviewTracker,
}

impl ImageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that reports previews to `previews`.
    pub fn with_tracker(previews: PreviewTracker) -> Self {
        Self {
            entries: Vec::new(),
            previews,
        }
    }

    /// Accepts valid candidates up to capacity and returns the full list.
    ///
    /// Candidates of an unsupported type, and any beyond the remaining
    /// capacity, are dropped without error.
    pub fn add(
        &mut self,
        candidates: impl IntoIterator<Item = CandidateFile>,
    ) -> &[UploadedImage] {
        for candidate in candidates {
            if self.entries.len() >= MAX_IMAGES {
                tracing::debug!(name = %candidate.name, "registry full, dropping candidate");
                break;
            }
            let Some(format) = candidate.accepted_format() else {
                tracing::debug!(name = %candidate.name, "unsupported type, dropping candidate");
                continue;
            };
            let id = ImageId::generate();
            let preview = self.previews.acquire(id, &candidate.name);
            self.entries.push(UploadedImage {
                id,
                name: candidate.name,
                format,
                source: candidate.source,
                preview,
                role: ImageRole::default(),
            });
        }
        &self.entries
    }

    /// Removes the entry and releases its preview. Returns false if absent.
    pub fn remove(&mut self, id: &ImageId) -> bool {
        match self.entries.iter().position(|e| e.id == *id) {
            Some(index) => {
                drop(self.entries.remove(index));
                true
            }
            None => false,
        }
    }

    /// Replaces the role of the matching entry. Returns false if absent.
    pub fn set_role(&mut self, id: &ImageId, role: ImageRole) -> bool {
        match self.entries.iter_mut().find(|e| e.id == *id) {
            Some(entry) => {
                entry.role = role;
                true
            }
            None => false,
        }
    }

    /// Looks up an entry.
    pub fn get(&self, id: &ImageId) -> Option<&UploadedImage> {
        self.entries.iter().find(|e| e.id == *id)
    }

    /// Entries in upload order.
    pub fn images(&self) -> &[UploadedImage] {
        &self.entries
    }

    /// Copies what a composition request needs, in order.
    pub fn snapshot(&self) -> Vec<ImageInput> {
        self.entries.iter().map(UploadedImage::to_input).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no images are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots left before the cap.
    pub fn remaining_capacity(&self) -> usize {
        MAX_IMAGES - self.entries.len()
    }

    /// The tracker receiving this registry's preview releases.
    pub fn previews(&self) -> &PreviewTracker {
        &self.previews
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn png(name: &str) -> CandidateFile {
        CandidateFile::from_bytes(name, Some("image/png".into()), PNG_MAGIC.to_vec())
    }

    fn gif(name: &str) -> CandidateFile {
        CandidateFile::from_bytes(name, Some("image/gif".into()), b"GIF89a".to_vec())
    }

    #[test]
    fn test_add_filters_and_defaults_role() {
        let mut registry = ImageRegistry::new();
        let images = registry.add(vec![png("a.png"), gif("b.gif"), png("c.png")]);

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name(), "a.png");
        assert_eq!(images[1].name(), "c.png");
        assert!(images.iter().all(|i| i.role() == ImageRole::Primary));
        assert_ne!(images[0].id(), images[1].id());
    }

    #[test]
    fn test_add_never_exceeds_cap() {
        let mut registry = ImageRegistry::new();
        registry.add((0..3).map(|i| png(&format!("{i}.png"))));
        registry.add(vec![gif("x.gif"), png("3.png"), png("4.png"), png("5.png")]);

        assert_eq!(registry.len(), MAX_IMAGES);
        assert_eq!(registry.images()[4].name(), "4.png");
        assert_eq!(registry.remaining_capacity(), 0);
    }

    #[test]
    fn test_sixth_image_is_ignored() {
        let mut registry = ImageRegistry::new();
        registry.add((0..5).map(|i| png(&format!("{i}.png"))));
        let before: Vec<ImageId> = registry.images().iter().map(|i| i.id()).collect();

        registry.add(vec![png("extra.png")]);

        let after: Vec<ImageId> = registry.images().iter().map(|i| i.id()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_size_is_min_of_cap_and_valid_total() {
        for batches in [vec![1, 1], vec![2, 4], vec![0, 3, 3], vec![7]] {
            let mut registry = ImageRegistry::new();
            let mut valid = 0;
            for (b, count) in batches.iter().enumerate() {
                valid += count;
                registry.add((0..*count).flat_map(|i| {
                    vec![png(&format!("{b}-{i}.png")), gif(&format!("{b}-{i}.gif"))]
                }));
            }
            assert_eq!(registry.len(), valid.min(MAX_IMAGES));
        }
    }

    #[test]
    fn test_remove_is_idempotent_and_releases_once() {
        let mut registry = ImageRegistry::new();
        registry.add(vec![png("a.png"), png("b.png")]);
        let id = registry.images()[0].id();

        assert!(registry.previews().is_live(&id));
        assert!(registry.remove(&id));
        assert!(!registry.previews().is_live(&id));
        assert_eq!(registry.previews().released_count(), 1);

        assert!(!registry.remove(&id));
        assert_eq!(registry.previews().released_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reads_do_not_release_previews() {
        let mut registry = ImageRegistry::new();
        registry.add(vec![png("a.png")]);
        for _ in 0..3 {
            let _ = registry.images();
            let _ = registry.snapshot();
        }
        assert_eq!(registry.previews().live_count(), 1);
        assert_eq!(registry.previews().released_count(), 0);
    }

    #[test]
    fn test_dropping_registry_releases_all() {
        let tracker = PreviewTracker::default();
        {
            let mut registry = ImageRegistry::with_tracker(tracker.clone());
            registry.add(vec![png("a.png"), png("b.png")]);
            assert_eq!(tracker.live_count(), 2);
        }
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(tracker.released_count(), 2);
    }

    #[test]
    fn test_set_role_keeps_order_and_length() {
        let mut registry = ImageRegistry::new();
        registry.add(vec![png("a.png"), png("b.png"), png("c.png")]);
        let ids: Vec<ImageId> = registry.images().iter().map(|i| i.id()).collect();

        assert!(registry.set_role(&ids[1], ImageRole::Background));
        let missing: ImageId = "00000000-0000-0000-0000-000000000000".parse().unwrap();
        assert!(!registry.set_role(&missing, ImageRole::Element));

        let after: Vec<ImageId> = registry.images().iter().map(|i| i.id()).collect();
        assert_eq!(ids, after);
        assert_eq!(registry.images()[0].role(), ImageRole::Primary);
        assert_eq!(registry.images()[1].role(), ImageRole::Background);
        assert_eq!(registry.images()[2].role(), ImageRole::Primary);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = ImageRegistry::new();
        registry.add(vec![png("a.png")]);
        let id = registry.images()[0].id();
        let snapshot = registry.snapshot();

        registry.set_role(&id, ImageRole::Element);
        registry.remove(&id);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, ImageRole::Primary);
        assert_eq!(snapshot[0].mime_type, "image/png");
    }

    #[test]
    fn test_candidate_type_detection() {
        let by_path = CandidateFile::from_path("/tmp/photo.JPG");
        assert_eq!(by_path.accepted_format(), Some(ImageFormat::Jpeg));
        assert_eq!(by_path.name, "photo.JPG");

        let by_magic = CandidateFile::from_bytes("clipboard", None, PNG_MAGIC.to_vec());
        assert_eq!(by_magic.accepted_format(), Some(ImageFormat::Png));

        let declared_wins =
            CandidateFile::from_bytes("a.png", Some("text/plain".into()), PNG_MAGIC.to_vec());
        assert_eq!(declared_wins.accepted_format(), None);

        assert_eq!(CandidateFile::from_path("doc.pdf").accepted_format(), None);
    }

    #[test]
    fn test_preview_uri() {
        let mut registry = ImageRegistry::new();
        registry.add(vec![png("a.png")]);
        let image = &registry.images()[0];
        assert_eq!(
            image.preview().uri(),
            format!("preview://{}/a.png", image.id())
        );
    }
}
