//! CPU-side pixel helpers for RGBA8 images.

use glam::Vec4;

/// Multiplies the color channels of RGBA8 pixels by their alpha, in place.
/// Trailing bytes that do not form a full pixel are left alone.
pub fn premultiply_alpha(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        let a = pixel[3] as u16;
        for channel in &mut pixel[..3] {
            *channel = (*channel as u16 * a / 255) as u8;
        }
    }
}

/// Packs a color with components in `[0, 1]` into RGBA8 bytes.
pub fn rgba8(color: Vec4) -> [u8; 4] {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
}

/// One-pixel image of `color`.
pub fn solid(color: Vec4) -> Vec<u8> {
    rgba8(color).to_vec()
}

/// `size × size` checkerboard alternating `a` and `b` per pixel, starting
/// with `a` at the origin.
pub fn checkerboard(size: u32, a: [u8; 4], b: [u8; 4]) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let color = if (x % 2) ^ (y % 2) == 0 { a } else { b };
            pixels.extend_from_slice(&color);
        }
    }
    pixels
}

/// Magenta/black checkerboard shown in place of textures that failed to load.
pub fn error_checkerboard() -> Vec<u8> {
    checkerboard(16, [255, 0, 255, 255], [0, 0, 0, 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premultiply_alpha() {
        let mut pixels = vec![255, 128, 10, 255, 255, 128, 10, 128, 200, 200, 200, 0];
        premultiply_alpha(&mut pixels);
        assert_eq!(&pixels[0..4], &[255, 128, 10, 255]);
        assert_eq!(&pixels[4..8], &[128, 64, 5, 128]);
        assert_eq!(&pixels[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_premultiply_ignores_partial_pixel() {
        let mut pixels = vec![100, 100, 100, 0, 50, 50];
        premultiply_alpha(&mut pixels);
        assert_eq!(pixels, vec![0, 0, 0, 0, 50, 50]);
    }

    #[test]
    fn test_rgba8() {
        assert_eq!(rgba8(Vec4::ONE), [255, 255, 255, 255]);
        assert_eq!(rgba8(Vec4::new(0.66, 0.66, 0.66, 1.0)), [168, 168, 168, 255]);
        assert_eq!(rgba8(Vec4::new(2.0, -1.0, 0.0, 0.0)), [255, 0, 0, 0]);
        assert_eq!(solid(Vec4::ZERO).len(), 4);
    }

    #[test]
    fn test_checkerboard() {
        let pixels = error_checkerboard();
        assert_eq!(pixels.len(), 16 * 16 * 4);
        assert_eq!(&pixels[0..4], &[255, 0, 255, 255]);
        assert_eq!(&pixels[4..8], &[0, 0, 0, 255]);
        // Second row starts with the other color.
        let row = 16 * 4;
        assert_eq!(&pixels[row..row + 4], &[0, 0, 0, 255]);
    }
}
