//! Capability interface between the slot registry and whatever draws it.

use std::collections::HashMap;

use crate::slots::{Preview, SlotFile};

/// What the registry may ask of the UI for a single slot.
pub trait UploadSlotView {
    /// A preview finished rendering for the current file of `slot`.
    fn show_preview(&mut self, slot: &str, file: &SlotFile, preview: &Preview);
    /// `slot` went back to empty.
    fn show_empty(&mut self, slot: &str);
    /// Focus / drop-target highlight.
    fn set_highlighted(&mut self, slot: &str, on: bool);
}

/// Per-slot presentation state for the terminal UI.
#[derive(Clone, Debug, Default)]
pub struct PanelState {
    /// One-line preview summary once the preview exists.
    pub preview_line: Option<String>,
    pub highlighted: bool,
}

/// Terminal implementation of [`UploadSlotView`].
#[derive(Clone, Debug, Default)]
pub struct SlotPanels {
    panels: HashMap<String, PanelState>,
}

impl SlotPanels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presentation state for `slot` (default when never touched).
    pub fn panel(&self, slot: &str) -> PanelState {
        self.panels.get(slot).cloned().unwrap_or_default()
    }
}

impl UploadSlotView for SlotPanels {
    fn show_preview(&mut self, slot: &str, file: &SlotFile, preview: &Preview) {
        let panel = self.panels.entry(slot.to_string()).or_default();
        panel.preview_line = Some(preview_summary(file, preview));
    }

    fn show_empty(&mut self, slot: &str) {
        let panel = self.panels.entry(slot.to_string()).or_default();
        panel.preview_line = None;
    }

    fn set_highlighted(&mut self, slot: &str, on: bool) {
        self.panels.entry(slot.to_string()).or_default().highlighted = on;
    }
}

/// `image/png · 12.0 KiB · data:image/png;base64,iVBORw0KGgo…`
pub fn preview_summary(file: &SlotFile, preview: &Preview) -> String {
    const HEAD: usize = 40;
    let head: String = preview.data_uri.chars().take(HEAD).collect();
    let ellipsis = if preview.data_uri.len() > HEAD { "…" } else { "" };
    format!(
        "{} · {} · {}{}",
        file.media_type,
        human_size(file.size()),
        head,
        ellipsis
    )
}

/// Binary-prefixed size for display.
pub fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / (KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panels_track_preview_and_highlight() {
        let file = SlotFile::new("a.png", "image/png", vec![1, 2, 3]);
        let preview = Preview::from_file(&file);
        let mut panels = SlotPanels::new();

        panels.show_preview("front", &file, &preview);
        panels.set_highlighted("front", true);
        let p = panels.panel("front");
        assert!(p.highlighted);
        assert!(p.preview_line.unwrap().starts_with("image/png · 3 B · data:image/png;base64,"));

        panels.show_empty("front");
        assert!(panels.panel("front").preview_line.is_none());
        assert!(!panels.panel("back").highlighted);
    }

    #[test]
    fn test_human_size_picks_unit() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
