//! Perceptual difference between a reference render and a candidate render.
//!
//! The diff image is white where nothing changed (optionally with a faint
//! gray ghost of the reference for context), tinted toward `added_color` where the
//! candidate gained ink and toward `removed_color` where it lost ink. Each band
//! is auto-levelled so its strongest change reaches the full band color, and
//! the two fractions are counted on the rendered image.

use image::{Rgb, RgbImage, RgbaImage};
use serde::Deserialize;

use super::color::{Color, Fuzz};

/// Blend factor for unchanged reference ink (as gray) when `ghost` is on.
pub const GHOST_STRENGTH: f64 = 0.25;

/// Tolerances and band colors for [`diff`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiffSettings {
    /// Two input pixels closer than this are "unchanged" (absorbs anti-aliasing).
    pub compare_fuzz: Fuzz,
    /// How close a diff pixel must be to a band color to be counted.
    pub band_fuzz: Fuzz,
    pub added_color: Color,
    pub removed_color: Color,
    /// Draw unchanged reference ink faintly instead of pure white.
    pub ghost: bool,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            compare_fuzz: Fuzz::constant(5.0),
            band_fuzz: Fuzz::constant(10.0),
            added_color: Color::rgb(0, 176, 0),
            removed_color: Color::rgb(224, 0, 0),
            ghost: true,
        }
    }
}

impl DiffSettings {
    /// Check that the two bands can never be confused with each other or
    /// with the neutral background, otherwise the counts are meaningless.
    pub fn validate(&self) -> Result<(), String> {
        let fuzz = self.band_fuzz.percent();

        if self.added_color.distance(self.removed_color) <= 2.0 * fuzz {
            return Err(format!(
                "Band colors {} and {} are within twice the band fuzz ({}%)",
                self.added_color, self.removed_color, fuzz
            ));
        }

        // Everything rendered neutral lies within this distance of white.
        let neutral_reach = if self.ghost { GHOST_STRENGTH * 100.0 } else { 0.0 };
        for band in [self.added_color, self.removed_color] {
            if band.ink() - neutral_reach <= fuzz {
                return Err(format!(
                    "Band color {} is too close to the neutral background for a {}% band fuzz",
                    band, fuzz
                ));
            }
        }

        // A partial tint of one band must never be counted as the other.
        for (from, other) in [
            (self.added_color, self.removed_color),
            (self.removed_color, self.added_color),
        ] {
            let crosses = (0..=100)
                .map(|step| Color::WHITE.lerp(from, step as f64 / 100.0))
                .any(|tint| tint.distance(other) <= fuzz);
            if crosses {
                return Err(format!(
                    "Tints of {} pass within {}% of {}",
                    from, fuzz, other
                ));
            }
        }

        Ok(())
    }
}

/// The rendered diff plus the two change metrics.
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub image: RgbImage,
    pub added_pixels: u64,
    pub removed_pixels: u64,
    /// Share of the diff canvas tinted as newly present.
    pub added_fraction: f64,
    /// Share of the diff canvas tinted as newly absent.
    pub removed_fraction: f64,
}

impl DiffResult {
    pub fn is_clean(&self) -> bool {
        self.added_pixels == 0 && self.removed_pixels == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Unchanged(Color),
    Added(f64),
    Removed(f64),
}

fn sample(image: &RgbaImage, x: u32, y: u32) -> Option<Color> {
    if x < image.width() && y < image.height() {
        Some(Color::from_rgba(*image.get_pixel(x, y)))
    } else {
        None
    }
}

/// Compare two already-normalized images.
///
/// The canvas covers both images. Where only the candidate has pixels the
/// change counts as fully added, where only the reference has pixels it counts
/// as fully removed; the corner neither covers is neutral.
pub fn diff(reference: &RgbaImage, candidate: &RgbaImage, settings: &DiffSettings) -> DiffResult {
    let width = reference.width().max(candidate.width());
    let height = reference.height().max(candidate.height());

    let mut changes = Vec::with_capacity(width as usize * height as usize);
    let mut max_added = 0.0_f64;
    let mut max_removed = 0.0_f64;

    for y in 0..height {
        for x in 0..width {
            let change = match (sample(reference, x, y), sample(candidate, x, y)) {
                (Some(r), Some(c)) => {
                    let distance = r.distance(c);
                    if distance <= settings.compare_fuzz.percent() {
                        Change::Unchanged(r)
                    } else if c.ink() >= r.ink() {
                        Change::Added(distance)
                    } else {
                        Change::Removed(distance)
                    }
                }
                (None, Some(_)) => Change::Added(100.0),
                (Some(_), None) => Change::Removed(100.0),
                (None, None) => Change::Unchanged(Color::WHITE),
            };
            match change {
                Change::Added(d) => max_added = max_added.max(d),
                Change::Removed(d) => max_removed = max_removed.max(d),
                Change::Unchanged(_) => {}
            }
            changes.push(change);
        }
    }

    let mut image = RgbImage::new(width, height);
    let mut added_pixels = 0u64;
    let mut removed_pixels = 0u64;

    for (px, change) in image.pixels_mut().zip(&changes) {
        let color = match *change {
            Change::Unchanged(r) if settings.ghost => Color::WHITE.lerp(r.gray(), GHOST_STRENGTH),
            Change::Unchanged(_) => Color::WHITE,
            Change::Added(d) => Color::WHITE.lerp(settings.added_color, d / max_added),
            Change::Removed(d) => Color::WHITE.lerp(settings.removed_color, d / max_removed),
        };

        if settings.band_fuzz.matches(color, settings.added_color) {
            added_pixels += 1;
        } else if settings.band_fuzz.matches(color, settings.removed_color) {
            removed_pixels += 1;
        }

        *px = Rgb([color.r, color.g, color.b]);
    }

    let area = width as f64 * height as f64;
    let fraction = |count: u64| if area > 0.0 { count as f64 / area } else { 0.0 };

    DiffResult {
        image,
        added_pixels,
        removed_pixels,
        added_fraction: fraction(added_pixels),
        removed_fraction: fraction(removed_pixels),
    }
}
