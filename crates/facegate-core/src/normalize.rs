//! Face patch normalization.
//!
//! Enrollment and identification must produce patches through this one path,
//! otherwise stored and probe histograms are not comparable.

use crate::recognizer::RecognizerError;
use crate::types::{FaceBox, Patch};
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Crop `face` out of `gray` and resize it to a `size × size` patch.
///
/// The box is clipped to the image first. Bilinear (triangle) filtering.
pub fn normalize_face(
    gray: &GrayImage,
    face: &FaceBox,
    size: u32,
) -> Result<Patch, RecognizerError> {
    let (width, height) = gray.dimensions();
    let x = face.x.min(width);
    let y = face.y.min(height);
    let crop_w = face.width.min(width - x);
    let crop_h = face.height.min(height - y);

    if size == 0 {
        return Err(RecognizerError::PatchTooSmall { size });
    }
    if crop_w == 0 || crop_h == 0 {
        return Err(RecognizerError::EmptyRegion {
            x: face.x,
            y: face.y,
            width: face.width,
            height: face.height,
        });
    }

    let crop = imageops::crop_imm(gray, x, y, crop_w, crop_h).to_image();
    let resized = if crop.dimensions() == (size, size) {
        crop
    } else {
        imageops::resize(&crop, size, size, FilterType::Triangle)
    };

    Patch::new(size, resized.into_raw()).ok_or(RecognizerError::EmptyRegion {
        x: face.x,
        y: face.y,
        width: face.width,
        height: face.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 3 + y) % 256) as u8]))
    }

    #[test]
    fn test_output_size() {
        let gray = gradient(320, 240);
        let patch = normalize_face(&gray, &FaceBox::new(40, 30, 150, 120), 100).unwrap();
        assert_eq!(patch.size(), 100);
        assert_eq!(patch.pixels().len(), 100 * 100);
    }

    #[test]
    fn test_exact_size_crop_is_verbatim() {
        let gray = gradient(64, 64);
        let patch = normalize_face(&gray, &FaceBox::new(8, 4, 32, 32), 32).unwrap();
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(patch.get(x, y), gray.get_pixel(x + 8, y + 4).0[0]);
            }
        }
    }

    #[test]
    fn test_uniform_stays_uniform() {
        let gray = GrayImage::from_pixel(200, 200, Luma([77]));
        let patch = normalize_face(&gray, &FaceBox::new(10, 10, 63, 91), 100).unwrap();
        assert!(patch.pixels().iter().all(|&p| p == 77));
    }

    #[test]
    fn test_box_clipped_to_image() {
        let gray = gradient(100, 100);
        let patch = normalize_face(&gray, &FaceBox::new(80, 80, 60, 60), 50).unwrap();
        assert_eq!(patch.size(), 50);
    }

    #[test]
    fn test_box_outside_image() {
        let gray = gradient(100, 100);
        let err = normalize_face(&gray, &FaceBox::new(150, 10, 40, 40), 100).unwrap_err();
        assert!(matches!(err, RecognizerError::EmptyRegion { x: 150, .. }));
    }

    #[test]
    fn test_zero_size_is_too_small() {
        let gray = GrayImage::new(50, 50);
        let err = normalize_face(&gray, &FaceBox::new(0, 0, 20, 20), 0).unwrap_err();
        assert!(matches!(err, RecognizerError::PatchTooSmall { size: 0 }));
    }

    #[test]
    fn test_deterministic() {
        let gray = gradient(300, 200);
        let face = FaceBox::new(33, 17, 120, 140);
        assert_eq!(
            normalize_face(&gray, &face, 100).unwrap(),
            normalize_face(&gray, &face, 100).unwrap()
        );
    }
}
