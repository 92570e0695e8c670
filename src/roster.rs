use image::imageops;
use image::{Rgb, RgbImage};

use crate::detector::Region;
use crate::templates::Templates;

/// Background colour of the invitation list.
pub const ROSTER_BACKGROUND: Rgb<u8> = Rgb([243, 247, 248]);
pub const BACKGROUND_TOLERANCE: u8 = 10;
pub const MATCH_THRESHOLD: f64 = 0.90;

/// Colour of the vertical bar drawn next to every list row.
pub const MARKER_COLOR: Rgb<u8> = Rgb([119, 222, 255]);
pub const MARKER_LENGTH: u32 = 68;
pub const MARKER_X: u32 = 1100;

pub const AVATAR_X: u32 = 732;
pub const AVATAR_OFFSET_Y: u32 = 7;
pub const AVATAR_WIDTH: u32 = 168;
pub const AVATAR_HEIGHT: u32 = 36;

const SCAN_START_Y: u32 = 280;
const SCAN_END_Y: u32 = 830;
const ROW_PITCH: u32 = 110;

/// Foreground mask of a roster avatar strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterTemplate {
    pub bitmap: Vec<bool>,
    pub width: u32,
    pub height: u32,
}

impl RosterTemplate {
    pub fn from_image(image: &RgbImage) -> Self {
        Self {
            bitmap: binarize(image, ROSTER_BACKGROUND, BACKGROUND_TOLERANCE),
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Row-major foreground mask: a pixel is foreground when any channel
/// differs from `background` by more than `tolerance`.
pub fn binarize(image: &RgbImage, background: Rgb<u8>, tolerance: u8) -> Vec<bool> {
    image
        .pixels()
        .map(|px| {
            px.0.iter()
                .zip(background.0)
                .any(|(&c, b)| c.abs_diff(b) > tolerance)
        })
        .collect()
}

/// Count of differing positions, or `None` when the lengths differ.
pub fn hamming_distance(a: &[bool], b: &[bool]) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).filter(|(x, y)| x != y).count())
}

/// True when the binarized `image` agrees with `bitmap` on at least
/// `threshold` of its pixels. Mismatched dimensions never match.
pub fn similarity(
    image: &RgbImage,
    bitmap: &[bool],
    width: u32,
    height: u32,
    background: Rgb<u8>,
    threshold: f64,
) -> bool {
    if image.dimensions() != (width, height) {
        tracing::debug!(
            "size mismatch: image {}x{}, template {width}x{height}",
            image.width(),
            image.height()
        );
        return false;
    }

    let total = width as usize * height as usize;
    if total == 0 {
        return false;
    }

    let mask = binarize(image, background, BACKGROUND_TOLERANCE);
    let Some(distance) = hamming_distance(&mask, bitmap) else {
        return false;
    };

    let score = 1.0 - distance as f64 / total as f64;
    tracing::debug!("hamming distance {distance}, similarity {score:.3}");
    score >= threshold
}

fn marker_at(frame: &RgbImage, y: u32) -> bool {
    (0..MARKER_LENGTH).all(|dy| {
        y.checked_add(dy)
            .filter(|&row| row < frame.height())
            .is_some_and(|row| *frame.get_pixel(MARKER_X, row) == MARKER_COLOR)
    })
}

/// Y coordinate of the list row showing `name`, or 0 when it is not listed.
///
/// Walks down the marker column; each marker run is checked against the
/// student's avatar template and the scan jumps a row pitch past it.
pub fn find_entry(frame: &RgbImage, name: &str, templates: &Templates) -> u32 {
    let Some(template) = templates.roster_entry(name) else {
        tracing::error!("no roster template for {name}");
        return 0;
    };
    if MARKER_X >= frame.width() {
        return 0;
    }

    let mut y = SCAN_START_Y;
    while y <= SCAN_END_Y && y < frame.height() {
        if !marker_at(frame, y) {
            y += 1;
            continue;
        }

        let avatar = y
            .checked_sub(AVATAR_OFFSET_Y)
            .map(|top| Region::new(AVATAR_X, top, AVATAR_WIDTH, AVATAR_HEIGHT))
            .filter(|r| r.fits(frame.width(), frame.height()));
        if let Some(r) = avatar {
            let crop = imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image();
            if similarity(
                &crop,
                &template.bitmap,
                template.width,
                template.height,
                ROSTER_BACKGROUND,
                MATCH_THRESHOLD,
            ) {
                tracing::info!("found {name} at y={y}");
                return y;
            }
        }

        y += ROW_PITCH;
    }

    tracing::debug!("{name} not in the visible list");
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{avatar, paint_roster_row, roster_frame};

    fn templates_with(names: &[(&str, usize)]) -> Templates {
        let mut templates = Templates::default();
        for &(name, kind) in names {
            templates.insert_roster(name, RosterTemplate::from_image(&avatar(kind)));
        }
        templates
    }

    #[test]
    fn test_binarize_tolerance_is_exclusive() {
        let image = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([243, 247, 248]),
            1 => Rgb([233, 247, 248]),
            _ => Rgb([243, 247, 237]),
        });
        assert_eq!(binarize(&image, ROSTER_BACKGROUND, 10), vec![false, false, true]);
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(&[true, false, true], &[true, true, false]), Some(2));
        assert_eq!(hamming_distance(&[true], &[true, false]), None);
        assert_eq!(hamming_distance(&[], &[]), Some(0));
    }

    #[test]
    fn test_similarity_against_own_template() {
        let image = avatar(0);
        let template = RosterTemplate::from_image(&image);
        assert!(similarity(&image, &template.bitmap, 168, 36, ROSTER_BACKGROUND, 1.0));

        let other = avatar(1);
        assert!(!similarity(&other, &template.bitmap, 168, 36, ROSTER_BACKGROUND, MATCH_THRESHOLD));
    }

    #[test]
    fn test_similarity_fails_when_every_pixel_differs() {
        let empty = RosterTemplate::from_image(&RgbImage::from_pixel(168, 36, ROSTER_BACKGROUND));
        let dark = RgbImage::from_pixel(168, 36, Rgb([0, 0, 0]));
        assert!(!similarity(&dark, &empty.bitmap, 168, 36, ROSTER_BACKGROUND, 0.5));
    }

    #[test]
    fn test_similarity_rejects_dimension_mismatch() {
        let image = avatar(0);
        let template = RosterTemplate::from_image(&image);
        let wider = RgbImage::from_pixel(169, 36, ROSTER_BACKGROUND);
        assert!(!similarity(&wider, &template.bitmap, 168, 36, ROSTER_BACKGROUND, 0.0));
    }

    #[test]
    fn test_find_entry_unknown_name() {
        let frame = paint_roster_row(roster_frame(), 300, &avatar(0));
        assert_eq!(find_entry(&frame, "Nobody", &templates_with(&[("Aru", 0)])), 0);
    }

    #[test]
    fn test_find_entry_skips_other_rows() {
        let frame = paint_roster_row(roster_frame(), 300, &avatar(1));
        let frame = paint_roster_row(frame, 410, &avatar(0));
        let templates = templates_with(&[("Aru", 0), ("Mutsuki", 1)]);

        assert_eq!(find_entry(&frame, "Aru", &templates), 410);
        assert_eq!(find_entry(&frame, "Mutsuki", &templates), 300);
    }

    #[test]
    fn test_find_entry_absent_student() {
        let frame = paint_roster_row(roster_frame(), 300, &avatar(1));
        assert_eq!(find_entry(&frame, "Aru", &templates_with(&[("Aru", 0)])), 0);
    }

    #[test]
    fn test_short_marker_is_not_a_row() {
        let mut frame = paint_roster_row(roster_frame(), 300, &avatar(0));
        frame.put_pixel(MARKER_X, 300 + MARKER_LENGTH - 1, ROSTER_BACKGROUND);
        assert_eq!(find_entry(&frame, "Aru", &templates_with(&[("Aru", 0)])), 0);
    }
}
