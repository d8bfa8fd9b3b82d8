use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

const PREVIEW_MAX_DIM: u32 = 512;

/// A user-selected file waiting to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("floorplan")
            .to_string();
        Ok(Self::new(file_name, media_type_for_path(path), bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn media_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Percent complete of the current submission, shared between the collector
/// and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU8>);

impl Progress {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, percent: u8) {
        self.0.store(percent.min(100), Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.set(0);
    }
}

#[derive(Debug, Default)]
struct PreviewSlot {
    generation: u64,
    data_url: Option<String>,
}

/// Holds at most one selected file and its preview.
///
/// Selecting replaces the previous file; the preview is rendered on a
/// background thread and a result for a superseded selection is dropped.
#[derive(Debug)]
pub struct UploadCollector {
    file: Option<UploadedFile>,
    generation: Arc<AtomicU64>,
    preview: Arc<Mutex<PreviewSlot>>,
    progress: Progress,
}

impl UploadCollector {
    pub fn new(progress: Progress) -> Self {
        Self {
            file: None,
            generation: Arc::new(AtomicU64::new(0)),
            preview: Arc::new(Mutex::new(PreviewSlot::default())),
            progress,
        }
    }

    /// Accepts the first file of a picker or drop event. Empty events are ignored.
    pub fn accept(&mut self, files: Vec<UploadedFile>) -> bool {
        let Some(file) = files.into_iter().next() else {
            return false;
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_preview().data_url = None;
        spawn_preview(
            file.clone(),
            generation,
            Arc::clone(&self.generation),
            Arc::clone(&self.preview),
        );
        debug!(file = %file.file_name, size = file.size(), "upload selected");
        self.file = Some(file);
        true
    }

    pub fn select_path(&mut self, path: &Path) -> Result<bool> {
        let file = UploadedFile::from_path(path)?;
        Ok(self.accept(vec![file]))
    }

    pub fn file(&self) -> Option<&UploadedFile> {
        self.file.as_ref()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// The preview for the current selection, if it has finished rendering.
    pub fn preview(&self) -> Option<String> {
        let current = self.generation.load(Ordering::SeqCst);
        let slot = self.lock_preview();
        if self.file.is_none() || slot.generation != current {
            return None;
        }
        slot.data_url.clone()
    }

    pub fn wait_for_preview(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(preview) = self.preview() {
                return Some(preview);
            }
            if self.file.is_none() || Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn clear(&mut self) {
        self.discard();
        self.progress.reset();
    }

    /// Drops the file and revokes its preview but leaves progress alone, used
    /// once a submission has gone through.
    pub(crate) fn discard(&mut self) {
        self.file = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.lock_preview().data_url = None;
    }

    fn lock_preview(&self) -> std::sync::MutexGuard<'_, PreviewSlot> {
        self.preview.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_preview(
    file: UploadedFile,
    generation: u64,
    current: Arc<AtomicU64>,
    slot: Arc<Mutex<PreviewSlot>>,
) {
    thread::spawn(move || {
        let data_url = preview_data_url(&file);
        if current.load(Ordering::SeqCst) != generation {
            return;
        }
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if current.load(Ordering::SeqCst) == generation {
            slot.generation = generation;
            slot.data_url = Some(data_url);
        }
    });
}

/// Thumbnail as a `data:` URL; content that does not decode as an image is
/// embedded as-is under its declared media type.
pub fn preview_data_url(file: &UploadedFile) -> String {
    if let Some(bytes) = jpeg_thumbnail(&file.bytes, PREVIEW_MAX_DIM) {
        return format!("data:image/jpeg;base64,{}", BASE64.encode(bytes));
    }
    format!("data:{};base64,{}", file.media_type, BASE64.encode(&file.bytes))
}

/// Decodes, flattens transparency onto white and re-encodes as JPEG no larger
/// than `max_dim` on either side.
pub(crate) fn jpeg_thumbnail(bytes: &[u8], max_dim: u32) -> Option<Vec<u8>> {
    let image = image::load_from_memory(bytes).ok()?;
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let mut image = DynamicImage::ImageRgba8(flattened);
    if image.width() > max_dim || image.height() > max_dim {
        image = image.resize(max_dim, max_dim, FilterType::Triangle);
    }
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&image.to_rgb8())
        .ok()?;
    Some(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;
    use std::path::Path;
    use std::time::Duration;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::{media_type_for_path, preview_data_url, Progress, UploadCollector, UploadedFile};

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([200, 210, 220]);
        }
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn empty_events_are_ignored() {
        let mut collector = UploadCollector::new(Progress::default());
        assert!(!collector.accept(Vec::new()));
        assert!(collector.file().is_none());
    }

    #[test]
    fn first_file_of_a_drop_is_taken_and_previewed() {
        let mut collector = UploadCollector::new(Progress::default());
        let plan = UploadedFile::new("plan.png", "image/png", png_bytes(1200, 800));
        let other = UploadedFile::new("other.png", "image/png", png_bytes(4, 4));
        assert!(collector.accept(vec![plan.clone(), other]));
        assert_eq!(collector.file(), Some(&plan));

        let preview = collector
            .wait_for_preview(Duration::from_secs(10))
            .expect("preview");
        assert!(preview.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn undecodable_content_previews_with_declared_type() {
        let file = UploadedFile::new("plan.pdf", "application/pdf", b"%PDF-1.7".to_vec());
        let preview = preview_data_url(&file);
        assert_eq!(preview, "data:application/pdf;base64,JVBERi0xLjc=");
    }

    #[test]
    fn reselection_replaces_file() {
        let mut collector = UploadCollector::new(Progress::default());
        collector.accept(vec![UploadedFile::new("a.png", "image/png", png_bytes(8, 8))]);
        collector.accept(vec![UploadedFile::new(
            "b.pdf",
            "application/pdf",
            b"%PDF".to_vec(),
        )]);
        assert_eq!(collector.file().map(|f| f.file_name.as_str()), Some("b.pdf"));
        let preview = collector
            .wait_for_preview(Duration::from_secs(10))
            .expect("preview");
        assert!(preview.starts_with("data:application/pdf;base64,"));
    }

    #[test]
    fn clear_drops_file_preview_and_progress() {
        let progress = Progress::default();
        let mut collector = UploadCollector::new(progress.clone());
        collector.accept(vec![UploadedFile::new("a.png", "image/png", png_bytes(8, 8))]);
        collector.wait_for_preview(Duration::from_secs(10));
        progress.set(50);

        collector.clear();
        assert!(collector.file().is_none());
        assert!(collector.preview().is_none());
        assert_eq!(progress.get(), 0);
    }

    #[test]
    fn select_path_reads_file_and_media_type() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("Plan.JPG");
        std::fs::write(&path, b"not really a jpeg")?;
        let mut collector = UploadCollector::new(Progress::default());
        assert!(collector.select_path(&path)?);
        let file = collector.file().expect("file");
        assert_eq!(file.file_name, "Plan.JPG");
        assert_eq!(file.media_type, "image/jpeg");
        assert_eq!(file.size(), 17);
        Ok(())
    }

    #[test]
    fn media_types_from_extension() {
        assert_eq!(media_type_for_path(Path::new("a.png")), "image/png");
        assert_eq!(media_type_for_path(Path::new("a.pdf")), "application/pdf");
        assert_eq!(media_type_for_path(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn progress_is_clamped() {
        let progress = Progress::default();
        progress.set(250);
        assert_eq!(progress.get(), 100);
        progress.reset();
        assert_eq!(progress.get(), 0);
    }
}
