//! Interactive editing of one view's detection boxes.
//!
//! An [`AnnotationEditor`] owns an in-memory copy of a
//! [`ViewDetectionResult`]. Nothing reaches the shared result collection
//! until the copy is explicitly saved; closing the editor discards it.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use web_time::Instant;

use crate::color_utils::class_color;
use crate::config::CanvasConfig;
use crate::error::ValidationError;
use crate::geometry::{NormalizedBox, PixelRect, Viewport, ViewportAnimation};
use crate::model::{DetectionBox, ViewDetectionResult};

/// Label shown for boxes without a class name.
pub const UNLABELED: &str = "Unlabeled";

/// What pointer drags do on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    /// Drag moves the viewport; boxes are read-only.
    #[default]
    Pan,
    /// Drag on the image draws a new box.
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Panning {
        last_x: f32,
        last_y: f32,
    },
    /// Corners in image pixels.
    Drawing {
        start_x: f32,
        start_y: f32,
        current_x: f32,
        current_y: f32,
    },
}

/// A box drawn by hand, waiting for a part name.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnBox {
    pub bbox: NormalizedBox,
    pub rect: PixelRect,
    /// JPEG of the covered region; empty when extraction failed.
    pub crop: Vec<u8>,
}

/// Per-class count for the edit surface legend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSummary {
    pub class_name: String,
    pub count: usize,
    pub color: [u8; 3],
}

/// Everything a renderer needs to draw one detection box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxOverlay {
    pub index: usize,
    pub rect: PixelRect,
    pub class_name: String,
    pub color: [u8; 3],
    /// Box belongs to the selected class (thicker stroke).
    pub class_highlighted: bool,
    /// Box is the selected detection.
    pub selected: bool,
}

/// Extract `rect` from `image` and encode it as JPEG.
///
/// The rectangle is clipped to the image; an empty intersection yields an
/// empty buffer.
pub fn extract_crop(image: &DynamicImage, rect: &PixelRect) -> Result<Vec<u8>, image::ImageError> {
    let x0 = rect.x.max(0.0).floor() as u32;
    let y0 = rect.y.max(0.0).floor() as u32;
    let x1 = ((rect.x + rect.width).max(0.0).ceil() as u32).min(image.width());
    let y1 = ((rect.y + rect.height).max(0.0).ceil() as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return Ok(Vec::new());
    }

    let crop = image.crop_imm(x0, y0, x1 - x0, y1 - y0);
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(crop.to_rgb8()).write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

/// Edit session for one view.
#[derive(Debug)]
pub struct AnnotationEditor {
    view: ViewDetectionResult,
    source: Option<DynamicImage>,
    image_size: (u32, u32),
    container: (f32, f32),
    viewport: Viewport,
    animation: Option<ViewportAnimation>,
    mode: EditMode,
    can_edit: bool,
    selected_class: Option<String>,
    selected_index: Option<usize>,
    gesture: Gesture,
    pending: Option<DrawnBox>,
    revision: u64,
    settings: CanvasConfig,
}

impl AnnotationEditor {
    /// Open a session on a copy of `view`.
    ///
    /// Without `source` pixels drawn boxes carry no crop.
    pub fn open(
        view: ViewDetectionResult,
        source: Option<DynamicImage>,
        image_size: (u32, u32),
        can_edit: bool,
        settings: CanvasConfig,
    ) -> Self {
        let image_size = source
            .as_ref()
            .map(|img| (img.width(), img.height()))
            .unwrap_or(image_size);
        log::debug!(
            "Opened annotation editor for view '{}' ({}x{}, {} boxes)",
            view.view,
            image_size.0,
            image_size.1,
            view.detections.len()
        );
        Self {
            view,
            source,
            image_size,
            container: (0.0, 0.0),
            viewport: Viewport::identity(),
            animation: None,
            mode: EditMode::Pan,
            can_edit,
            selected_class: None,
            selected_index: None,
            gesture: Gesture::Idle,
            pending: None,
            revision: 0,
            settings,
        }
    }

    /// The edited copy of the view.
    pub fn view(&self) -> &ViewDetectionResult {
        &self.view
    }

    /// Consume the session, yielding the edited view for saving.
    pub fn into_view(self) -> ViewDetectionResult {
        self.view
    }

    pub fn detections(&self) -> &[DetectionBox] {
        &self.view.detections
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }

    pub fn can_edit(&self) -> bool {
        self.can_edit
    }

    /// Counter bumped on every change to the detection list.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    /// Switch between pan and draw. Any gesture in progress is dropped.
    pub fn set_mode(&mut self, mode: EditMode) {
        self.mode = mode;
        self.gesture = Gesture::Idle;
    }

    pub fn selected_class(&self) -> Option<&str> {
        self.selected_class.as_deref()
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected_index
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    /// Set the container size and fit the image into it.
    pub fn fit_to_container(&mut self, width: f32, height: f32) {
        self.container = (width, height);
        self.viewport = Viewport::fit(width, height, self.image_size.0, self.image_size.1);
        self.animation = None;
    }

    /// Viewport to render at `now`, following any running animation.
    pub fn viewport_at(&self, now: Instant) -> Viewport {
        match &self.animation {
            Some(anim) => anim.sample(now),
            None => self.viewport,
        }
    }

    pub fn is_animating(&self, now: Instant) -> bool {
        self.animation.is_some_and(|a| !a.is_finished(now))
    }

    /// Freeze any running animation at its current position.
    fn settle(&mut self, now: Instant) {
        if let Some(anim) = self.animation.take() {
            self.viewport = anim.sample(now);
        }
    }

    pub fn wheel(&mut self, pointer_x: f32, pointer_y: f32, delta_y: f32, now: Instant) {
        self.settle(now);
        self.viewport = self
            .viewport
            .wheel(pointer_x, pointer_y, delta_y, self.settings.wheel_zoom_factor);
    }

    /// Animate the viewport onto detection `index`.
    fn focus(&mut self, index: usize, now: Instant) {
        let Some(det) = self.view.detections.get(index) else {
            return;
        };
        let rect = det.bbox.to_pixel_rect(self.image_size.0, self.image_size.1);
        let Some(target) = Viewport::focus_on(
            &rect,
            self.container.0,
            self.container.1,
            self.settings.focus_margin,
            self.settings.focus_max_zoom,
        ) else {
            return;
        };
        let from = self.viewport_at(now);
        self.viewport = target;
        self.animation = Some(ViewportAnimation::new(
            from,
            target,
            now,
            self.settings.focus_duration(),
        ));
    }

    // ------------------------------------------------------------------
    // Pointer gestures
    // ------------------------------------------------------------------

    fn inside_image(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.image_size.0 as f32 && y <= self.image_size.1 as f32
    }

    fn clamp_to_image(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x.clamp(0.0, self.image_size.0 as f32),
            y.clamp(0.0, self.image_size.1 as f32),
        )
    }

    /// Press at a screen position.
    pub fn pointer_down(&mut self, x: f32, y: f32, now: Instant) {
        self.settle(now);
        match self.mode {
            EditMode::Pan => {
                self.gesture = Gesture::Panning {
                    last_x: x,
                    last_y: y,
                };
            }
            EditMode::Draw => {
                if !self.can_edit {
                    return;
                }
                let (ix, iy) = self.viewport.screen_to_image(x, y);
                if !self.inside_image(ix, iy) {
                    return;
                }
                self.gesture = Gesture::Drawing {
                    start_x: ix,
                    start_y: iy,
                    current_x: ix,
                    current_y: iy,
                };
            }
        }
    }

    /// Pointer moved to a screen position.
    pub fn pointer_move(&mut self, x: f32, y: f32) {
        match self.gesture {
            Gesture::Idle => {}
            Gesture::Panning { last_x, last_y } => {
                self.viewport = self.viewport.pan_by(x - last_x, y - last_y);
                self.gesture = Gesture::Panning {
                    last_x: x,
                    last_y: y,
                };
            }
            Gesture::Drawing {
                start_x, start_y, ..
            } => {
                let (ix, iy) = self.viewport.screen_to_image(x, y);
                let (current_x, current_y) = self.clamp_to_image(ix, iy);
                self.gesture = Gesture::Drawing {
                    start_x,
                    start_y,
                    current_x,
                    current_y,
                };
            }
        }
    }

    /// Release. Returns the drawn box when it is large enough.
    ///
    /// The box is also kept as the pending box until it is labelled with
    /// [`add_detection`](Self::add_detection) or discarded.
    pub fn pointer_up(&mut self) -> Option<DrawnBox> {
        let gesture = std::mem::replace(&mut self.gesture, Gesture::Idle);
        let Gesture::Drawing {
            start_x,
            start_y,
            current_x,
            current_y,
        } = gesture
        else {
            return None;
        };

        let rect = PixelRect::from_corners(start_x, start_y, current_x, current_y);
        let min = self.settings.min_draw_size_px;
        if rect.width <= min || rect.height <= min {
            log::trace!(
                "Discarded drawn box {:.1}x{:.1} (minimum {})",
                rect.width,
                rect.height,
                min
            );
            return None;
        }
        let bbox = rect.to_normalized(self.image_size.0, self.image_size.1)?;

        let crop = match &self.source {
            Some(img) => extract_crop(img, &rect).unwrap_or_else(|e| {
                log::warn!("Failed to extract crop: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let drawn = DrawnBox { bbox, rect, crop };
        self.pending = Some(drawn.clone());
        Some(drawn)
    }

    /// Rectangle being drawn, in image pixels.
    pub fn draft_rect(&self) -> Option<PixelRect> {
        match self.gesture {
            Gesture::Drawing {
                start_x,
                start_y,
                current_x,
                current_y,
            } => Some(PixelRect::from_corners(start_x, start_y, current_x, current_y)),
            _ => None,
        }
    }

    /// Box drawn last and not yet labelled.
    pub fn pending_box(&self) -> Option<&DrawnBox> {
        self.pending.as_ref()
    }

    pub fn discard_pending_box(&mut self) {
        self.pending = None;
    }

    // ------------------------------------------------------------------
    // Detection list edits
    // ------------------------------------------------------------------

    fn ensure_can_edit(&self) -> Result<(), ValidationError> {
        if self.can_edit {
            Ok(())
        } else {
            Err(ValidationError::EditNotPermitted {
                role: "read-only".to_string(),
            })
        }
    }

    /// Label the pending box and append it as a manual detection.
    ///
    /// The new box becomes the selected detection and its class the
    /// selected class. Returns its index.
    pub fn add_detection(&mut self, class_name: &str, now: Instant) -> Result<usize, ValidationError> {
        self.ensure_can_edit()?;
        let drawn = self.pending.take().ok_or(ValidationError::NoPendingBox)?;
        self.view
            .detections
            .push(DetectionBox::manual(drawn.bbox, class_name));
        self.revision += 1;

        let index = self.view.detections.len() - 1;
        self.selected_class = Some(class_name.to_string());
        self.select_index(Some(index), now);
        log::debug!("Added manual detection #{} '{}'", index, class_name);
        Ok(index)
    }

    /// Remove detection `index`. Later boxes shift down by one.
    pub fn delete_detection(&mut self, index: usize) -> Result<DetectionBox, ValidationError> {
        self.ensure_can_edit()?;
        let len = self.view.detections.len();
        if index >= len {
            return Err(ValidationError::DetectionIndexOutOfRange { index, len });
        }
        let removed = self.view.detections.remove(index);
        self.revision += 1;
        self.selected_index = None;

        let class_remains = self
            .view
            .detections
            .iter()
            .any(|d| d.class_name == removed.class_name);
        if !class_remains {
            self.selected_class = None;
        }
        log::debug!("Deleted detection #{} '{}'", index, removed.class_name);
        Ok(removed)
    }

    /// Highlight a class and focus its first box.
    pub fn select_class(&mut self, class_name: Option<&str>, now: Instant) {
        self.selected_class = class_name.map(str::to_string);
        let first = class_name.and_then(|name| {
            self.view
                .detections
                .iter()
                .position(|d| d.class_name == name)
        });
        self.select_index(first, now);
    }

    /// Select one detection and focus it. The class highlight is untouched.
    ///
    /// Selecting the same index again replays the focus animation.
    pub fn select_index(&mut self, index: Option<usize>, now: Instant) {
        self.selected_index = index.filter(|&i| i < self.view.detections.len());
        if let Some(i) = self.selected_index {
            self.focus(i, now);
        }
    }

    // ------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------

    /// Count per class, sorted by name.
    pub fn class_summary(&self) -> Vec<ClassSummary> {
        let mut summary: Vec<ClassSummary> = Vec::new();
        for det in &self.view.detections {
            let name = if det.class_name.trim().is_empty() {
                UNLABELED
            } else {
                det.class_name.as_str()
            };
            match summary.iter_mut().find(|s| s.class_name == name) {
                Some(entry) => entry.count += 1,
                None => summary.push(ClassSummary {
                    class_name: name.to_string(),
                    count: 1,
                    color: class_color(name),
                }),
            }
        }
        summary.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        summary
    }

    /// Render data for every box, in detection order.
    pub fn overlays(&self) -> Vec<BoxOverlay> {
        let (w, h) = self.image_size;
        self.view
            .detections
            .iter()
            .enumerate()
            .map(|(index, det)| BoxOverlay {
                index,
                rect: det.bbox.to_pixel_rect(w, h),
                class_name: det.class_name.clone(),
                color: class_color(&det.class_name),
                class_highlighted: self.selected_class.as_deref() == Some(det.class_name.as_str()),
                selected: self.selected_index == Some(index),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViewKind;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    fn det(name: &str, x: f32) -> DetectionBox {
        DetectionBox::new(NormalizedBox::new(x, 0.5, 0.1, 0.1), 0.9, 0, name)
    }

    fn editor_with(detections: Vec<DetectionBox>, can_edit: bool) -> AnnotationEditor {
        let mut view = ViewDetectionResult::new(ViewKind::Top, "top.jpg");
        view.detections = detections;
        let mut editor = AnnotationEditor::open(view, None, (200, 100), can_edit, CanvasConfig::default());
        editor.fit_to_container(200.0, 100.0);
        editor
    }

    #[test]
    fn test_small_drag_emits_nothing() {
        let mut editor = editor_with(Vec::new(), true);
        editor.set_mode(EditMode::Draw);
        let now = Instant::now();
        editor.pointer_down(10.0, 10.0, now);
        editor.pointer_move(13.0, 13.0);
        assert!(editor.pointer_up().is_none());
        assert!(editor.pending_box().is_none());
    }

    #[test]
    fn test_thin_drag_emits_nothing() {
        let mut editor = editor_with(Vec::new(), true);
        editor.set_mode(EditMode::Draw);
        editor.pointer_down(10.0, 10.0, Instant::now());
        editor.pointer_move(80.0, 14.0);
        assert!(editor.pointer_up().is_none());
    }

    #[test]
    fn test_draw_emits_normalized_box() {
        let mut editor = editor_with(Vec::new(), true);
        editor.set_mode(EditMode::Draw);
        editor.pointer_down(60.0, 70.0, Instant::now());
        editor.pointer_move(40.0, 30.0);
        assert_eq!(editor.draft_rect(), Some(PixelRect::new(40.0, 30.0, 20.0, 40.0)));

        let drawn = editor.pointer_up().unwrap();
        assert!((drawn.bbox.x_center - 0.25).abs() < 1e-5);
        assert!((drawn.bbox.y_center - 0.5).abs() < 1e-5);
        assert!((drawn.bbox.width - 0.1).abs() < 1e-5);
        assert!((drawn.bbox.height - 0.4).abs() < 1e-5);
        assert!(drawn.crop.is_empty());
        assert!(editor.draft_rect().is_none());
    }

    #[test]
    fn test_draw_uses_viewport_inverse() {
        let mut editor = editor_with(Vec::new(), true);
        // 2x zoom anchored at the origin
        editor.wheel(0.0, 0.0, -1.0, Instant::now());
        let scale = editor.viewport_at(Instant::now()).scale;
        editor.set_mode(EditMode::Draw);
        editor.pointer_down(20.0 * scale, 20.0 * scale, Instant::now());
        editor.pointer_move(60.0 * scale, 50.0 * scale);
        let drawn = editor.pointer_up().unwrap();
        assert!((drawn.rect.x - 20.0).abs() < 1e-3);
        assert!((drawn.rect.width - 40.0).abs() < 1e-3);
        assert!((drawn.rect.height - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_draw_requires_edit_permission() {
        let mut editor = editor_with(Vec::new(), false);
        editor.set_mode(EditMode::Draw);
        editor.pointer_down(10.0, 10.0, Instant::now());
        editor.pointer_move(90.0, 90.0);
        assert!(editor.pointer_up().is_none());
    }

    #[test]
    fn test_pan_mode_moves_viewport_only() {
        let mut editor = editor_with(vec![det("A", 0.5)], true);
        let now = Instant::now();
        let before = editor.viewport_at(now);
        editor.pointer_down(50.0, 50.0, now);
        editor.pointer_move(70.0, 40.0);
        assert!(editor.pointer_up().is_none());
        let after = editor.viewport_at(now);
        assert_eq!(after.offset_x, before.offset_x + 20.0);
        assert_eq!(after.offset_y, before.offset_y - 10.0);
        assert_eq!(editor.detections().len(), 1);
        assert_eq!(editor.revision(), 0);
    }

    #[test]
    fn test_crop_matches_drawn_region() {
        let mut img = RgbImage::from_pixel(200, 100, Rgb([0, 0, 0]));
        for x in 40..60 {
            for y in 30..70 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let view = ViewDetectionResult::new(ViewKind::Front, "front.jpg");
        let mut editor = AnnotationEditor::open(
            view,
            Some(DynamicImage::ImageRgb8(img)),
            (0, 0),
            true,
            CanvasConfig::default(),
        );
        editor.fit_to_container(200.0, 100.0);
        editor.set_mode(EditMode::Draw);
        editor.pointer_down(40.0, 30.0, Instant::now());
        editor.pointer_move(60.0, 70.0);
        let drawn = editor.pointer_up().unwrap();

        let crop = image::load_from_memory(&drawn.crop).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 40));
        let center = crop.to_rgb8().get_pixel(10, 20).0;
        assert!(center.iter().all(|&c| c > 200));
    }

    #[test]
    fn test_delete_reindexes_preserving_order() {
        let mut editor = editor_with(vec![det("A", 0.1), det("B", 0.2), det("C", 0.3)], true);
        editor.delete_detection(1).unwrap();
        let names: Vec<_> = editor.detections().iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        let indices: Vec<_> = editor.overlays().iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(matches!(
            editor.delete_detection(2),
            Err(ValidationError::DetectionIndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_delete_last_of_class_clears_class_selection() {
        let mut editor = editor_with(vec![det("A", 0.1), det("B", 0.2), det("A", 0.3)], true);
        let now = Instant::now();
        editor.select_class(Some("A"), now);
        assert_eq!(editor.selected_index(), Some(0));

        editor.delete_detection(0).unwrap();
        assert_eq!(editor.selected_class(), Some("A"));
        assert_eq!(editor.selected_index(), None);

        editor.delete_detection(1).unwrap();
        assert_eq!(editor.selected_class(), None);
    }

    #[test]
    fn test_select_index_keeps_class_filter() {
        let mut editor = editor_with(vec![det("A", 0.1), det("B", 0.2)], true);
        let now = Instant::now();
        editor.select_class(Some("A"), now);
        editor.select_index(Some(1), now);
        assert_eq!(editor.selected_class(), Some("A"));
        assert_eq!(editor.selected_index(), Some(1));
        let overlays = editor.overlays();
        assert!(overlays[0].class_highlighted && !overlays[0].selected);
        assert!(!overlays[1].class_highlighted && overlays[1].selected);
    }

    #[test]
    fn test_focus_animates_and_retriggers() {
        let mut editor = editor_with(vec![det("A", 0.5)], true);
        let start = Instant::now();
        let fitted = editor.viewport_at(start);
        editor.select_index(Some(0), start);
        assert!(editor.is_animating(start));
        assert_eq!(editor.viewport_at(start), fitted);

        let done = start + Duration::from_millis(300);
        assert!(!editor.is_animating(done));
        let focused = editor.viewport_at(done);
        assert!(focused.scale > fitted.scale);

        editor.select_index(Some(0), done);
        assert!(editor.is_animating(done));
    }

    #[test]
    fn test_add_detection_selects_new_box() {
        let mut editor = editor_with(vec![det("A", 0.1)], true);
        let now = Instant::now();
        assert_eq!(editor.add_detection("B", now), Err(ValidationError::NoPendingBox));

        editor.set_mode(EditMode::Draw);
        editor.pointer_down(100.0, 20.0, now);
        editor.pointer_move(150.0, 80.0);
        editor.pointer_up().unwrap();
        let index = editor.add_detection("Relay", now).unwrap();

        assert_eq!(index, 1);
        let added = &editor.detections()[1];
        assert_eq!(added.class_id, -1);
        assert_eq!(added.confidence, 1.0);
        assert_eq!(editor.selected_class(), Some("Relay"));
        assert_eq!(editor.selected_index(), Some(1));
        assert!(editor.pending_box().is_none());
    }

    #[test]
    fn test_class_summary_sorted_with_unlabeled() {
        let editor = editor_with(vec![det("Relay", 0.1), det("", 0.2), det("Fuse", 0.3), det("Relay", 0.4)], true);
        let summary = editor.class_summary();
        let rows: Vec<_> = summary.iter().map(|s| (s.class_name.as_str(), s.count)).collect();
        assert_eq!(rows, vec![("Fuse", 1), ("Relay", 2), ("Unlabeled", 1)]);
    }

    #[test]
    fn test_read_only_editor_rejects_delete() {
        let mut editor = editor_with(vec![det("A", 0.1)], false);
        assert!(matches!(
            editor.delete_detection(0),
            Err(ValidationError::EditNotPermitted { .. })
        ));
        assert_eq!(editor.detections().len(), 1);
    }
}
