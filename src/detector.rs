use std::fmt;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::templates::Templates;

/// Side length of the square cropped at a position template's anchor.
pub const POSITION_PATCH: u32 = 36;

/// Regional builds of the game ship their own artwork for some screens.
/// A template stored as `Hall_JP` stands in for `Hall`.
pub const REGION_SUFFIXES: &[&str] = &["_JP", "_KR", "_TW", "_CN", "_AC"];

const HASH_SIDE: u32 = 8;

/// A rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The fixed-size patch used for position and ready-notice templates.
    pub const fn patch(x: u32, y: u32) -> Self {
        Self::new(x, y, POSITION_PATCH, POSITION_PATCH)
    }

    /// True when the region is non-empty and lies entirely inside a `width`×`height` image.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|right| right <= width)
            && self.y.checked_add(self.height).is_some_and(|bottom| bottom <= height)
    }
}

/// 64-bit average hash of an image region.
///
/// Bit order is row-major over the 8×8 downsample, top-left sample in the
/// most significant bit. A bit is set when the sample is at or above the
/// truncated mean of all 64 samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of differing bits. Only used for diagnostics; matching is exact.
    pub fn distance(self, other: Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064b}", self.0)
    }
}

/// Fingerprint `image`, or only `region` of it when given.
///
/// Returns `None` for an empty image or a region that does not fit.
pub fn fingerprint(image: &RgbImage, region: Option<Region>) -> Option<Fingerprint> {
    let gray = match region {
        Some(r) => {
            if !r.fits(image.width(), image.height()) {
                return None;
            }
            let cropped = imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image();
            imageops::grayscale(&cropped)
        }
        None => {
            if image.width() == 0 || image.height() == 0 {
                return None;
            }
            imageops::grayscale(image)
        }
    };
    Some(fingerprint_gray(&gray))
}

fn fingerprint_gray(gray: &GrayImage) -> Fingerprint {
    // Already at hash resolution: resampling would only blur the samples.
    let small = if gray.dimensions() == (HASH_SIDE, HASH_SIDE) {
        gray.clone()
    } else {
        imageops::resize(gray, HASH_SIDE, HASH_SIDE, FilterType::Triangle)
    };

    let samples: Vec<u32> = small.pixels().map(|p| u32::from(p.0[0])).collect();
    let mean = samples.iter().sum::<u32>() / (HASH_SIDE * HASH_SIDE);
    let bits = samples
        .iter()
        .fold(0u64, |acc, &sample| (acc << 1) | u64::from(sample >= mean));
    Fingerprint(bits)
}

/// True when `description` is `canonical` itself or `canonical` plus one regional suffix.
pub fn is_variant_of(description: &str, canonical: &str) -> bool {
    match description.strip_prefix(canonical) {
        Some("") => true,
        Some(rest) => REGION_SUFFIXES.contains(&rest),
        None => false,
    }
}

/// Strip a trailing regional suffix, if any.
pub fn canonical_label(description: &str) -> &str {
    REGION_SUFFIXES
        .iter()
        .find_map(|suffix| description.strip_suffix(suffix))
        .unwrap_or(description)
}

/// Check whether `frame` currently shows the screen `target`.
///
/// Every position template whose label is `target` or one of its regional
/// variants is tried at its own anchor. The first exact fingerprint match
/// returns `target`, so callers never see which variant matched.
pub fn identify_position<'t>(
    frame: &RgbImage,
    target: &'t str,
    templates: &Templates,
) -> Option<&'t str> {
    for template in templates.positions() {
        if !is_variant_of(&template.label, target) {
            continue;
        }

        let region = template.region();
        let Some(current) = fingerprint(frame, Some(region)) else {
            tracing::debug!("region {region:?} of {} is outside the frame, skipping", template.key);
            continue;
        };

        if current == template.fingerprint {
            tracing::debug!("matched position template {} for {target}", template.key);
            return Some(target);
        }
    }

    tracing::debug!("no position template matched {target}");
    None
}

/// True when the region `roi` matches any ready-notice template.
pub fn is_ready(frame: &RgbImage, roi: Region, templates: &Templates) -> bool {
    let Some(current) = fingerprint(frame, Some(roi)) else {
        return false;
    };

    match templates.notices().find(|t| t.fingerprint == current) {
        Some(hit) => {
            tracing::debug!("region {roi:?} ready, key: {}", hit.key);
            true
        }
        None => false,
    }
}

/// Canonical label of the ready-notice template matching `roi`.
///
/// Unrecognized regions are saved under `diagnostics` (when set) so a new
/// template can be cut from them later.
pub fn identify_notice(
    frame: &RgbImage,
    roi: Region,
    templates: &Templates,
    diagnostics: Option<&Path>,
) -> Option<String> {
    let current = fingerprint(frame, Some(roi))?;

    if let Some(hit) = templates.notices().find(|t| t.fingerprint == current) {
        tracing::debug!("recognized notice, key: {}", hit.key);
        return Some(canonical_label(&hit.label).to_string());
    }

    if let Some(dir) = diagnostics {
        save_region(dir, "notice", frame, roi);
    }
    None
}

/// Write `roi` of `frame` to `dir/<prefix>_<timestamp>.png`. Failures are logged only.
pub fn save_region(dir: &Path, prefix: &str, frame: &RgbImage, roi: Region) {
    if !roi.fits(frame.width(), frame.height()) {
        return;
    }

    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("failed to create {}: {e}", dir.display());
        return;
    }

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{prefix}_{stamp}.png"));
    let region = imageops::crop_imm(frame, roi.x, roi.y, roi.width, roi.height).to_image();
    match region.save(&path) {
        Ok(()) => tracing::info!("saved unrecognized {prefix} region: {}", path.display()),
        Err(e) => tracing::warn!("failed to save {}: {e}", path.display()),
    }
}
