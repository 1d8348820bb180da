//! Pixel-difference detection between the two images of a level.
//!
//! Compares two same-resolution RGBA buffers, expands each differing pixel
//! by an optional disk radius, then runs connected-component labeling over
//! the resulting mask. The output is the set of difference groups a player
//! can find, a coordinate-to-group index for click validation, a difficulty
//! rating, and a rendered mask artifact.

use crate::error::GameError;
use shared::Coord;
use std::collections::HashMap;

/// Radii the level editor is allowed to request.
pub const ALLOWED_RADII: [u32; 4] = [0, 3, 9, 15];

/// A level is rated hard when it has at least this many groups...
pub const HARD_GROUP_THRESHOLD: usize = 7;
/// ...and its raw differing pixels cover at most this share of the canvas.
pub const HARD_DIFF_RATIO: f64 = 0.1;

pub type Rgba = [u8; 4];

/// Fixed-size RGBA raster. Immutable once a level is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pixels: Vec<Rgba>,
}

impl Image {
    /// Creates an opaque black canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0, 0, 0, 255]; (width * height) as usize],
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Rgba) {
        let idx = (y * self.width + x) as usize;
        self.pixels[idx] = pixel;
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.pixels[(y * self.width + x) as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Difficulty {
    #[serde(rename = "easy")]
    Easy,
    #[serde(rename = "hard")]
    Hard,
}

/// Result of comparing the two images of a level.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Connected components of the (radius-expanded) difference mask.
    pub groups: Vec<Vec<Coord>>,
    /// Coordinate to owning group index.
    pub index: HashMap<Coord, usize>,
    pub difficulty: Difficulty,
    /// Raw differing pixels, before radius expansion.
    pub diff_pixel_count: usize,
    /// W×H bytes, 255 where the expanded mask is set.
    pub mask: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Compares two images and groups their differences.
///
/// Fails before any side effect when the radius is not one of
/// [`ALLOWED_RADII`] or the resolutions do not match.
pub fn detect(original: &Image, modified: &Image, radius: u32) -> Result<Detection, GameError> {
    if !ALLOWED_RADII.contains(&radius) {
        return Err(GameError::InvalidRadius(radius));
    }
    if original.width != modified.width || original.height != modified.height {
        return Err(GameError::DimensionMismatch(
            original.width,
            original.height,
            modified.width,
            modified.height,
        ));
    }

    let (width, height) = (original.width, original.height);
    let mut mask = vec![0u8; (width * height) as usize];
    let mut diff_pixel_count = 0;

    for y in 0..height {
        for x in 0..width {
            if original.pixel(x, y) != modified.pixel(x, y) {
                diff_pixel_count += 1;
                if radius == 0 {
                    mask[(y * width + x) as usize] = 255;
                } else {
                    paint_disk(&mut mask, width, height, x, y, radius);
                }
            }
        }
    }

    let (groups, index) = label_components(&mask, width, height);

    let total_pixels = (width * height) as f64;
    let ratio = diff_pixel_count as f64 / total_pixels;
    let difficulty = if groups.len() >= HARD_GROUP_THRESHOLD && ratio <= HARD_DIFF_RATIO {
        Difficulty::Hard
    } else {
        Difficulty::Easy
    };

    Ok(Detection {
        groups,
        index,
        difficulty,
        diff_pixel_count,
        mask,
        width,
        height,
    })
}

/// Paints a filled disk into the mask, clipped to canvas bounds.
fn paint_disk(mask: &mut [u8], width: u32, height: u32, cx: u32, cy: u32, radius: u32) {
    let r = radius as i64;
    let (cx, cy) = (cx as i64, cy as i64);

    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                continue;
            }
            mask[(y as u32 * width + x as u32) as usize] = 255;
        }
    }
}

/// Flood-fill labeling of 4-connected mask components, in scan order.
fn label_components(
    mask: &[u8],
    width: u32,
    height: u32,
) -> (Vec<Vec<Coord>>, HashMap<Coord, usize>) {
    let mut groups: Vec<Vec<Coord>> = Vec::new();
    let mut index: HashMap<Coord, usize> = HashMap::new();
    let mut visited = vec![false; mask.len()];

    for start_y in 0..height {
        for start_x in 0..width {
            let start_idx = (start_y * width + start_x) as usize;
            if mask[start_idx] == 0 || visited[start_idx] {
                continue;
            }

            let group_id = groups.len();
            let mut group = Vec::new();
            let mut stack = vec![(start_x, start_y)];
            visited[start_idx] = true;

            while let Some((x, y)) = stack.pop() {
                let coord = Coord::new(x, y);
                group.push(coord);
                index.insert(coord, group_id);

                let mut push = |nx: i64, ny: i64| {
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        return;
                    }
                    let (nx, ny) = (nx as u32, ny as u32);
                    let nidx = (ny * width + nx) as usize;
                    if mask[nidx] != 0 && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push((nx, ny));
                    }
                };

                push(x as i64 - 1, y as i64);
                push(x as i64 + 1, y as i64);
                push(x as i64, y as i64 - 1);
                push(x as i64, y as i64 + 1);
            }

            groups.push(group);
        }
    }

    (groups, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(width: u32, height: u32) -> (Image, Image) {
        (Image::new(width, height), Image::new(width, height))
    }

    const RED: Rgba = [255, 0, 0, 255];

    #[test]
    fn test_rejects_disallowed_radius() {
        let (original, modified) = pair(10, 10);

        for radius in [1, 2, 4, 8, 10, 16, 100] {
            match detect(&original, &modified, radius) {
                Err(GameError::InvalidRadius(r)) => assert_eq!(r, radius),
                other => panic!("Expected InvalidRadius, got {:?}", other.map(|d| d.groups)),
            }
        }
    }

    #[test]
    fn test_rejects_mismatched_resolution() {
        let original = Image::new(10, 10);
        let modified = Image::new(10, 12);

        assert!(matches!(
            detect(&original, &modified, 0),
            Err(GameError::DimensionMismatch(10, 10, 10, 12))
        ));
    }

    #[test]
    fn test_identical_images_are_easy_and_empty() {
        let (original, modified) = pair(16, 16);
        let detection = detect(&original, &modified, 3).unwrap();

        assert!(detection.groups.is_empty());
        assert!(detection.index.is_empty());
        assert_eq!(detection.diff_pixel_count, 0);
        assert_eq!(detection.difficulty, Difficulty::Easy);
        assert!(detection.mask.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_isolated_pixels_radius_zero_two_groups() {
        let (original, mut modified) = pair(20, 20);
        modified.set_pixel(2, 2, RED);
        modified.set_pixel(10, 10, RED);

        let detection = detect(&original, &modified, 0).unwrap();

        assert_eq!(detection.groups.len(), 2);
        assert_eq!(detection.diff_pixel_count, 2);
        assert_eq!(detection.index.get(&Coord::new(2, 2)), Some(&0));
        assert_eq!(detection.index.get(&Coord::new(10, 10)), Some(&1));
        assert_eq!(detection.index.get(&Coord::new(5, 5)), None);
    }

    #[test]
    fn test_expansion_radius_merges_groups() {
        // Same two pixels 8 apart on one axis; disks of radius 9 overlap.
        let (original, mut modified) = pair(30, 30);
        modified.set_pixel(5, 5, RED);
        modified.set_pixel(13, 5, RED);

        let separate = detect(&original, &modified, 0).unwrap();
        assert_eq!(separate.groups.len(), 2);

        let merged = detect(&original, &modified, 9).unwrap();
        assert_eq!(merged.groups.len(), 1);
        assert_eq!(merged.diff_pixel_count, 2);
    }

    #[test]
    fn test_disk_clips_at_canvas_border() {
        let (original, mut modified) = pair(8, 8);
        modified.set_pixel(0, 0, RED);

        let detection = detect(&original, &modified, 15).unwrap();
        assert_eq!(detection.groups.len(), 1);
        // Radius covers the whole 8x8 canvas from the corner.
        assert_eq!(detection.groups[0].len(), 64);
    }

    #[test]
    fn test_difficulty_hard_needs_many_small_groups() {
        // 8 isolated pixels on a 100x100 canvas: many groups, tiny ratio.
        let (original, mut modified) = pair(100, 100);
        for i in 0..8 {
            modified.set_pixel(i * 10, i * 10, RED);
        }

        let detection = detect(&original, &modified, 0).unwrap();
        assert_eq!(detection.groups.len(), 8);
        assert_eq!(detection.difficulty, Difficulty::Hard);
    }

    #[test]
    fn test_difficulty_easy_when_few_groups() {
        let (original, mut modified) = pair(100, 100);
        modified.set_pixel(10, 10, RED);
        modified.set_pixel(50, 50, RED);

        let detection = detect(&original, &modified, 0).unwrap();
        assert_eq!(detection.difficulty, Difficulty::Easy);
    }

    #[test]
    fn test_difficulty_easy_when_ratio_too_high() {
        // 8 separated 20x20 blobs on a 200x20 canvas: 3200 of 4000 pixels
        // differ, far above the hard ratio.
        let (original, mut modified) = pair(200, 20);
        for blob in 0..8u32 {
            let x0 = blob * 25;
            for dx in 0..20 {
                for dy in 0..20 {
                    modified.set_pixel(x0 + dx, dy, RED);
                }
            }
        }

        let detection = detect(&original, &modified, 0).unwrap();
        assert_eq!(detection.groups.len(), 8);
        assert!(detection.diff_pixel_count as f64 / (200.0 * 20.0) > HARD_DIFF_RATIO);
        assert_eq!(detection.difficulty, Difficulty::Easy);
    }

    #[test]
    fn test_mask_artifact_marks_expanded_pixels() {
        let (original, mut modified) = pair(10, 10);
        modified.set_pixel(5, 5, RED);

        let detection = detect(&original, &modified, 3).unwrap();
        // Center and a pixel inside the disk are set; a far corner is not.
        assert_eq!(detection.mask[(5 * 10 + 5) as usize], 255);
        assert_eq!(detection.mask[(5 * 10 + 7) as usize], 255);
        assert_eq!(detection.mask[0], 0);
        assert_eq!(detection.groups[0].len(), detection.index.len());
    }
}
