//! Named image slots and their fill state.
//!
//! The registry is the only owner of selected files. It is mutated by UI
//! handlers only; submissions work from [`SlotRegistry::snapshot`].

use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

use crate::{config::SlotCfg, view::UploadSlotView};

/// Errors raised by slot registration and file selection.
#[derive(Debug, Error)]
pub enum SlotError {
    /// Two slots declared with the same name.
    #[error("slot already registered: {0}")]
    Duplicate(String),

    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    /// Declared media type is not `image/*`.
    #[error("invalid file type for {slot}: {media_type}")]
    InvalidFileType { slot: String, media_type: String },

    #[error("file too large for {slot}: {size} bytes (limit {limit})")]
    FileTooLarge { slot: String, size: u64, limit: u64 },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A selected file: name, declared media type and immutable contents.
#[derive(Clone, Debug)]
pub struct SlotFile {
    pub file_name: String,
    pub media_type: String,
    bytes: Arc<[u8]>,
}

impl SlotFile {
    pub fn new(file_name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, declaring its type from the extension.
    pub async fn load(path: &Path) -> Result<Self, SlotError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| SlotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        Ok(Self::new(file_name, media_type_for(path), bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        is_image_type(&self.media_type)
    }
}

/// `image/*` check on a declared media type.
pub fn is_image_type(media_type: &str) -> bool {
    media_type
        .get(..6)
        .is_some_and(|p| p.eq_ignore_ascii_case("image/"))
        && media_type.len() > 6
}

/// Media type a browser would declare for this file name.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg" | "jfif") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("svg") => "image/svg+xml",
        Some("heic") => "image/heic",
        Some("avif") => "image/avif",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Rendered preview of a slot file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub data_uri: String,
}

impl Preview {
    /// `data:<type>;base64,<payload>`
    pub fn from_file(file: &SlotFile) -> Self {
        Self {
            data_uri: format!(
                "data:{};base64,{}",
                file.media_type,
                STANDARD.encode(file.bytes())
            ),
        }
    }
}

/// Preview work handed off after a successful `set_file`.
#[derive(Clone, Debug)]
pub struct PreviewJob {
    pub slot: String,
    pub generation: u64,
    pub file: SlotFile,
}

impl PreviewJob {
    /// CPU-bound; run it off the UI loop.
    pub fn render(self) -> PreviewReady {
        PreviewReady {
            preview: Preview::from_file(&self.file),
            slot: self.slot,
            generation: self.generation,
        }
    }
}

/// Finished preview, tagged with the fill it belongs to.
#[derive(Clone, Debug)]
pub struct PreviewReady {
    pub slot: String,
    pub generation: u64,
    pub preview: Preview,
}

/// Fill state of one slot.
#[derive(Clone, Debug)]
pub enum SlotState {
    Empty,
    Filled {
        file: SlotFile,
        /// `None` until the preview job comes back.
        preview: Option<Preview>,
    },
}

/// One named position in the form.
#[derive(Clone, Debug)]
pub struct UploadSlot {
    pub name: String,
    pub required: bool,
    pub state: SlotState,
    generation: u64,
}

impl UploadSlot {
    pub fn is_filled(&self) -> bool {
        matches!(self.state, SlotState::Filled { .. })
    }

    pub fn file(&self) -> Option<&SlotFile> {
        match &self.state {
            SlotState::Filled { file, .. } => Some(file),
            SlotState::Empty => None,
        }
    }

    pub fn preview(&self) -> Option<&Preview> {
        match &self.state {
            SlotState::Filled { preview, .. } => preview.as_ref(),
            SlotState::Empty => None,
        }
    }
}

/// Ordered set of slots plus the view they report to.
pub struct SlotRegistry<V> {
    slots: Vec<UploadSlot>,
    max_file_bytes: Option<u64>,
    view: V,
}

impl<V: UploadSlotView> SlotRegistry<V> {
    pub fn new(view: V) -> Self {
        Self {
            slots: Vec::new(),
            max_file_bytes: None,
            view,
        }
    }

    /// Reject oversized files at selection time.
    pub fn with_max_file_bytes(mut self, limit: u64) -> Self {
        self.max_file_bytes = Some(limit);
        self
    }

    /// Build from the configured slot list, in declaration order.
    pub fn from_config(slots: &[SlotCfg], max_file_bytes: u64, view: V) -> Result<Self, SlotError> {
        let mut reg = Self::new(view).with_max_file_bytes(max_file_bytes);
        for s in slots {
            reg.register_slot(&s.name, s.required)?;
        }
        Ok(reg)
    }

    pub fn register_slot(&mut self, name: &str, required: bool) -> Result<(), SlotError> {
        if self.get(name).is_some() {
            return Err(SlotError::Duplicate(name.to_string()));
        }
        self.slots.push(UploadSlot {
            name: name.to_string(),
            required,
            state: SlotState::Empty,
            generation: 0,
        });
        Ok(())
    }

    /// Fill `name` with `file`. The slot is `Filled` on return; the preview
    /// is derived later from the returned job.
    pub fn set_file(&mut self, name: &str, file: SlotFile) -> Result<PreviewJob, SlotError> {
        let limit = self.max_file_bytes;
        let slot = self.slot_mut(name)?;
        if !file.is_image() {
            tracing::warn!("rejected {} for {}: {}", file.file_name, name, file.media_type);
            return Err(SlotError::InvalidFileType {
                slot: name.to_string(),
                media_type: file.media_type,
            });
        }
        if let Some(limit) = limit
            && file.size() > limit
        {
            tracing::warn!("rejected {} for {}: {} bytes", file.file_name, name, file.size());
            return Err(SlotError::FileTooLarge {
                slot: name.to_string(),
                size: file.size(),
                limit,
            });
        }

        slot.generation += 1;
        slot.state = SlotState::Filled {
            file: file.clone(),
            preview: None,
        };
        tracing::info!("slot {} filled with {} ({} bytes)", name, file.file_name, file.size());
        Ok(PreviewJob {
            slot: name.to_string(),
            generation: slot.generation,
            file,
        })
    }

    /// Read `path` into `name`. Type and size come from the extension and the
    /// file metadata, so a rejected file is never read into memory.
    pub async fn load_file(&mut self, name: &str, path: &Path) -> Result<PreviewJob, SlotError> {
        self.slot_mut(name)?;

        let media_type = media_type_for(path);
        if !is_image_type(media_type) {
            tracing::warn!("rejected {} for {}: {}", path.display(), name, media_type);
            return Err(SlotError::InvalidFileType {
                slot: name.to_string(),
                media_type: media_type.to_string(),
            });
        }

        if let Some(limit) = self.max_file_bytes {
            let size = tokio::fs::metadata(path)
                .await
                .map_err(|source| SlotError::Read {
                    path: path.to_path_buf(),
                    source,
                })?
                .len();
            if size > limit {
                tracing::warn!("rejected {} for {}: {} bytes", path.display(), name, size);
                return Err(SlotError::FileTooLarge {
                    slot: name.to_string(),
                    size,
                    limit,
                });
            }
        }

        // set_file re-checks the bytes actually read.
        let file = SlotFile::load(path).await?;
        self.set_file(name, file)
    }

    /// Store a finished preview if it still matches the slot's current file.
    pub fn apply_preview(&mut self, ready: PreviewReady) -> bool {
        let Some(slot) = self.slots.iter_mut().find(|s| s.name == ready.slot) else {
            return false;
        };
        if slot.generation != ready.generation {
            tracing::debug!("stale preview for {} discarded", ready.slot);
            return false;
        }
        let SlotState::Filled { file, preview } = &mut slot.state else {
            return false;
        };
        self.view.show_preview(&slot.name, file, &ready.preview);
        *preview = Some(ready.preview);
        true
    }

    /// Empty the slot. Returns `false` when it was already empty.
    pub fn clear_slot(&mut self, name: &str) -> Result<bool, SlotError> {
        let slot = self.slot_mut(name)?;
        if !slot.is_filled() {
            return Ok(false);
        }
        slot.generation += 1;
        slot.state = SlotState::Empty;
        self.view.show_empty(name);
        tracing::info!("slot {} cleared", name);
        Ok(true)
    }

    pub fn set_highlighted(&mut self, name: &str, on: bool) {
        if self.get(name).is_some() {
            self.view.set_highlighted(name, on);
        }
    }

    /// Every required slot is filled.
    pub fn is_ready(&self) -> bool {
        self.first_missing_required().is_none()
    }

    pub fn first_missing_required(&self) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.required && !s.is_filled())
            .map(|s| s.name.as_str())
    }

    /// Filled slots as `(name, file)` in declaration order.
    pub fn snapshot(&self) -> Vec<(String, SlotFile)> {
        self.slots
            .iter()
            .filter_map(|s| s.file().map(|f| (s.name.clone(), f.clone())))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&UploadSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn slots(&self) -> &[UploadSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut UploadSlot, SlotError> {
        self.slots
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| SlotError::UnknownSlot(name.to_string()))
    }
}
