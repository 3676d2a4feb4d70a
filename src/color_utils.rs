//! Color utility functions shared across the application.
//!
//! Detection boxes are colored per class name. The color is derived from a
//! stable string hash so a part keeps its color across views and sessions.

/// Number of distinct hues in the class palette.
pub const PALETTE_SIZE: u32 = 12;

/// Convert HSV to RGB.
///
/// # Arguments
/// * `h` - Hue in degrees (0-360)
/// * `s` - Saturation (0.0-1.0)
/// * `v` - Value/brightness (0.0-1.0)
///
/// # Returns
/// RGB tuple with values in range 0.0-1.0
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (r + m, g + m, b + m)
}

/// 31-multiplier string hash over UTF-16 code units.
pub fn string_hash(s: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in s.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    hash.unsigned_abs()
}

/// Stable RGB color for a class name.
pub fn class_color(class_name: &str) -> [u8; 3] {
    let slot = string_hash(class_name) % PALETTE_SIZE;
    let hue = slot as f32 * (360.0 / PALETTE_SIZE as f32);
    let (r, g, b) = hsv_to_rgb(hue, 0.75, 0.95);
    [
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ]
}
