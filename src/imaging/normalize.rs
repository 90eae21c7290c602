//! Masking of ignorable colors (rapid-travel strokes) ahead of comparison.
//!
//! Both sides of a comparison must go through [`normalize`] with the same
//! [`MaskingRules`]; masking only one side makes every masked stroke look
//! like a removal.

use image::{imageops, RgbaImage};
use serde::Deserialize;
use thiserror::Error;

use super::color::{Color, Fuzz};

fn white() -> Color {
    Color::WHITE
}

/// Replace every pixel within `fuzz` of `target` with `replacement`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MaskingRule {
    pub target: Color,
    pub fuzz: Fuzz,
    #[serde(default = "white")]
    pub replacement: Color,
}

impl MaskingRule {
    pub fn new(target: Color, fuzz: Fuzz) -> Self {
        Self {
            target,
            fuzz,
            replacement: Color::WHITE,
        }
    }

    fn matches(&self, color: Color) -> bool {
        self.fuzz.matches(self.target, color)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MaskingError {
    #[error(
        "Masking rule {later} paints {replacement}, which rule {earlier} would mask again on the next pass"
    )]
    Reentrant {
        earlier: usize,
        later: usize,
        replacement: Color,
    },
}

/// An ordered, validated set of masking rules plus the optional border trim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaskingRules {
    rules: Vec<MaskingRule>,
    trim: Option<Fuzz>,
}

impl MaskingRules {
    /// Rejects sets where a later rule's replacement falls inside an earlier
    /// rule's target, since normalizing twice would then repaint those pixels.
    pub fn new(rules: Vec<MaskingRule>) -> Result<Self, MaskingError> {
        for (later, rule) in rules.iter().enumerate() {
            for (earlier, prior) in rules[..later].iter().enumerate() {
                if prior.replacement != rule.replacement && prior.matches(rule.replacement) {
                    return Err(MaskingError::Reentrant {
                        earlier,
                        later,
                        replacement: rule.replacement,
                    });
                }
            }
        }
        Ok(Self { rules, trim: None })
    }

    /// Also crop away border rows/columns within `fuzz` of white.
    pub fn with_trim(mut self, fuzz: Fuzz) -> Self {
        self.trim = Some(fuzz);
        self
    }

    pub fn rules(&self) -> &[MaskingRule] {
        &self.rules
    }

    pub fn trim(&self) -> Option<Fuzz> {
        self.trim
    }
}

/// Apply `rules` to `image` in declared order and return the masked copy.
///
/// Transparency is flattened onto white for the distance test only; pixels
/// that are not replaced keep their original bytes, replaced pixels become
/// the opaque replacement color. The result is idempotent under the same rules.
pub fn normalize(image: &RgbaImage, rules: &MaskingRules) -> RgbaImage {
    let mut out = image.clone();

    if !rules.rules.is_empty() {
        for px in out.pixels_mut() {
            let mut replaced = None;
            let mut color = Color::from_rgba(*px);
            for rule in &rules.rules {
                if rule.matches(color) {
                    color = rule.replacement;
                    replaced = Some(color);
                }
            }
            if let Some(color) = replaced {
                *px = color.to_rgba();
            }
        }
    }

    match rules.trim {
        Some(fuzz) => trim_background(out, fuzz),
        None => out,
    }
}

/// Crop to the bounding box of pixels that are not background white.
/// An all-background image is returned unchanged.
fn trim_background(image: RgbaImage, fuzz: Fuzz) -> RgbaImage {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, px) in image.enumerate_pixels() {
        if fuzz.matches(Color::from_rgba(*px), Color::WHITE) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    match bounds {
        Some((x0, y0, x1, y1)) if (x0, y0, x1, y1) != (0, 0, image.width() - 1, image.height() - 1) => {
            imageops::crop_imm(&image, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
        }
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const RAPID: Color = Color::rgb(255, 0, 0);

    fn rapid_rules() -> MaskingRules {
        MaskingRules::new(vec![MaskingRule::new(RAPID, Fuzz::new(20.0).unwrap())]).unwrap()
    }

    /// White canvas with a black cut line on row 2 and a red rapid move on row 5.
    fn toolpath_render() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        for x in 1..9 {
            img.put_pixel(x, 2, Rgba([0, 0, 0, 255]));
            img.put_pixel(x, 5, Rgba([250, 10, 5, 255]));
        }
        img
    }

    #[test]
    fn test_masks_rapid_moves() {
        let out = normalize(&toolpath_render(), &rapid_rules());
        for x in 1..9 {
            assert_eq!(*out.get_pixel(x, 5), Rgba([255, 255, 255, 255]));
            assert_eq!(*out.get_pixel(x, 2), Rgba([0, 0, 0, 255]));
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let rules = rapid_rules().with_trim(Fuzz::new(1.0).unwrap());
        let once = normalize(&toolpath_render(), &rules);
        let twice = normalize(&once, &rules);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let rules = rapid_rules();
        let img = toolpath_render();
        assert_eq!(normalize(&img, &rules).into_raw(), normalize(&img, &rules).into_raw());
    }

    #[test]
    fn test_empty_rules_leave_image_untouched() {
        let img = toolpath_render();
        assert_eq!(normalize(&img, &MaskingRules::default()), img);
    }

    #[test]
    fn test_custom_replacement() {
        let rule = MaskingRule {
            target: RAPID,
            fuzz: Fuzz::new(5.0).unwrap(),
            replacement: Color::rgb(200, 200, 200),
        };
        let rules = MaskingRules::new(vec![rule]).unwrap();
        let out = normalize(&toolpath_render(), &rules);
        assert_eq!(*out.get_pixel(3, 5), Rgba([200, 200, 200, 255]));
    }

    #[test]
    fn test_rejects_reentrant_rules() {
        let first = MaskingRule::new(Color::rgb(200, 200, 200), Fuzz::new(5.0).unwrap());
        let second = MaskingRule {
            target: RAPID,
            fuzz: Fuzz::new(5.0).unwrap(),
            replacement: Color::rgb(201, 201, 201),
        };
        let err = MaskingRules::new(vec![first, second]).unwrap_err();
        assert!(matches!(err, MaskingError::Reentrant { earlier: 0, later: 1, .. }));
    }

    #[test]
    fn test_same_replacement_is_allowed() {
        let rules = MaskingRules::new(vec![
            MaskingRule::new(Color::rgb(250, 250, 250), Fuzz::new(5.0).unwrap()),
            MaskingRule::new(RAPID, Fuzz::new(20.0).unwrap()),
        ]);
        assert!(rules.is_ok());
    }

    #[test]
    fn test_trim_crops_to_ink() {
        let rules = MaskingRules::default().with_trim(Fuzz::new(1.0).unwrap());
        let out = normalize(&toolpath_render(), &rules);
        // rows 2..=5, columns 1..=8
        assert_eq!(out.dimensions(), (8, 4));
    }

    #[test]
    fn test_trim_after_masking() {
        let rules = rapid_rules().with_trim(Fuzz::new(1.0).unwrap());
        let out = normalize(&toolpath_render(), &rules);
        // the rapid row is gone, leaving only the cut line
        assert_eq!(out.dimensions(), (8, 1));
    }

    #[test]
    fn test_trim_keeps_blank_image() {
        let blank = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let rules = MaskingRules::default().with_trim(Fuzz::new(1.0).unwrap());
        assert_eq!(normalize(&blank, &rules).dimensions(), (4, 4));
    }
}
