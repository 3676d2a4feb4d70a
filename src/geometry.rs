//! Box and viewport coordinate mathematics.
//!
//! Three coordinate spaces meet on the annotation canvas:
//! - **normalized**: detection boxes as delivered by inference, center-anchored
//!   and relative to the image size (0.0-1.0)
//! - **image**: pixels of the source image, top-left anchored
//! - **screen**: viewport pixels, `screen = image * scale + offset`
//!
//! Everything here is pure so the rendering backend can be swapped freely.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

/// A detection box in normalized, center-anchored coordinates.
///
/// Serialized as `[x_center, y_center, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct NormalizedBox {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    pub fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    /// A box with no area cannot be drawn or focused meaningfully.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Convert to a top-left anchored pixel rectangle.
    pub fn to_pixel_rect(&self, image_width: u32, image_height: u32) -> PixelRect {
        to_pixel_rect(self, image_width, image_height)
    }
}

impl From<[f32; 4]> for NormalizedBox {
    fn from([x_center, y_center, width, height]: [f32; 4]) -> Self {
        Self::new(x_center, y_center, width, height)
    }
}

impl From<NormalizedBox> for [f32; 4] {
    fn from(b: NormalizedBox) -> Self {
        [b.x_center, b.y_center, b.width, b.height]
    }
}

/// An axis-aligned rectangle in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    /// Top-left corner X coordinate
    pub x: f32,
    /// Top-left corner Y coordinate
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from two arbitrary corner points.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    /// Get the center point of the rectangle.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Convert back to normalized coordinates. `None` for an empty image.
    pub fn to_normalized(&self, image_width: u32, image_height: u32) -> Option<NormalizedBox> {
        to_normalized(self, image_width, image_height)
    }
}

/// Map a normalized box onto the pixel grid of an image.
pub fn to_pixel_rect(b: &NormalizedBox, image_width: u32, image_height: u32) -> PixelRect {
    let w = image_width as f32;
    let h = image_height as f32;
    PixelRect {
        x: b.x_center * w - (b.width * w) / 2.0,
        y: b.y_center * h - (b.height * h) / 2.0,
        width: b.width * w,
        height: b.height * h,
    }
}

/// Inverse of [`to_pixel_rect`].
pub fn to_normalized(rect: &PixelRect, image_width: u32, image_height: u32) -> Option<NormalizedBox> {
    if image_width == 0 || image_height == 0 {
        return None;
    }
    let w = image_width as f32;
    let h = image_height as f32;
    let width = rect.width / w;
    let height = rect.height / h;
    Some(NormalizedBox {
        x_center: rect.x / w + width / 2.0,
        y_center: rect.y / h + height / 2.0,
        width,
        height,
    })
}

/// Pan/zoom state of the canvas: `screen = image * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Viewport {
    pub fn new(scale: f32, offset_x: f32, offset_y: f32) -> Self {
        Self {
            scale,
            offset_x,
            offset_y,
        }
    }

    /// Create an identity viewport (scale=1, no offset).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    /// Fit an image into a container on first load.
    ///
    /// Images larger than the container are scaled down until fully visible;
    /// smaller images stay at 1:1. Either way the image is centered.
    pub fn fit(container_width: f32, container_height: f32, image_width: u32, image_height: u32) -> Self {
        if image_width == 0 || image_height == 0 {
            return Self::identity();
        }
        let iw = image_width as f32;
        let ih = image_height as f32;
        let scale = (container_width / iw).min(container_height / ih).min(1.0);
        Self {
            scale,
            offset_x: (container_width - iw * scale) / 2.0,
            offset_y: (container_height - ih * scale) / 2.0,
        }
    }

    /// Convert a screen-space pointer position to image pixels.
    pub fn screen_to_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }

    /// Convert image pixels to a screen-space position.
    pub fn image_to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }

    /// Change the scale while keeping the image point under the pointer fixed.
    pub fn zoom_at(&self, pointer_x: f32, pointer_y: f32, new_scale: f32) -> Viewport {
        let (img_x, img_y) = self.screen_to_image(pointer_x, pointer_y);
        Viewport {
            scale: new_scale,
            offset_x: pointer_x - img_x * new_scale,
            offset_y: pointer_y - img_y * new_scale,
        }
    }

    /// Apply one mouse-wheel tick. Scrolling up (`delta_y < 0`) zooms in.
    pub fn wheel(&self, pointer_x: f32, pointer_y: f32, delta_y: f32, factor: f32) -> Viewport {
        let new_scale = if delta_y < 0.0 {
            self.scale * factor
        } else if delta_y > 0.0 {
            self.scale / factor
        } else {
            return *self;
        };
        self.zoom_at(pointer_x, pointer_y, new_scale)
    }

    /// Apply a pan delta in screen pixels.
    pub fn pan_by(&self, dx: f32, dy: f32) -> Viewport {
        Viewport {
            scale: self.scale,
            offset_x: self.offset_x + dx,
            offset_y: self.offset_y + dy,
        }
    }

    /// Viewport that centers `rect` with a margin around it.
    ///
    /// `margin` is a multiplier on the box size (1.25 leaves 25% slack) and the
    /// resulting scale never exceeds `max_scale`. Returns `None` until the
    /// container has a size.
    pub fn focus_on(
        rect: &PixelRect,
        container_width: f32,
        container_height: f32,
        margin: f32,
        max_scale: f32,
    ) -> Option<Viewport> {
        if container_width <= 0.0 || container_height <= 0.0 {
            return None;
        }
        // A zero-sized side divides to infinity and drops out of the min.
        let scale = (container_width / (rect.width * margin))
            .min(container_height / (rect.height * margin))
            .min(max_scale);
        let (cx, cy) = rect.center();
        Some(Viewport {
            scale,
            offset_x: container_width / 2.0 - cx * scale,
            offset_y: container_height / 2.0 - cy * scale,
        })
    }

    /// Linear interpolation between two viewports.
    pub fn lerp(&self, to: &Viewport, t: f32) -> Viewport {
        Viewport {
            scale: self.scale + (to.scale - self.scale) * t,
            offset_x: self.offset_x + (to.offset_x - self.offset_x) * t,
            offset_y: self.offset_y + (to.offset_y - self.offset_y) * t,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::identity()
    }
}

/// Timed ease-in-out transition between two viewports.
#[derive(Debug, Clone, Copy)]
pub struct ViewportAnimation {
    from: Viewport,
    to: Viewport,
    started: Instant,
    duration: Duration,
}

impl ViewportAnimation {
    pub fn new(from: Viewport, to: Viewport, started: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            started,
            duration,
        }
    }

    /// Target viewport once the animation completes.
    pub fn target(&self) -> Viewport {
        self.to
    }

    /// Progress in 0.0-1.0 at `now`.
    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }

    /// Viewport to render at `now`.
    pub fn sample(&self, now: Instant) -> Viewport {
        let t = ease_in_out(self.progress(now));
        self.from.lerp(&self.to, t)
    }
}

fn ease_in_out(t: f32) -> f32 {
    (1.0 - (std::f32::consts::PI * t).cos()) / 2.0
}
