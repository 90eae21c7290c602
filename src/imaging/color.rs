//! RGB colors and the percentage fuzz metric shared by masking and diffing.

use std::fmt;
use std::str::FromStr;

use image::Rgba;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColorError {
    #[error("Invalid color '{0}': expected #rrggbb")]
    Format(String),

    #[error("Fuzz {0} is outside 0-100%")]
    FuzzRange(f64),
}

/// An opaque RGB color. Deserializes from `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Flatten a pixel onto a white background.
    pub fn from_rgba(px: Rgba<u8>) -> Self {
        let [r, g, b, a] = px.0;
        if a == 255 {
            return Self::rgb(r, g, b);
        }
        let alpha = a as f64 / 255.0;
        let over_white = |c: u8| (c as f64 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        Self::rgb(over_white(r), over_white(g), over_white(b))
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, 255])
    }

    /// Distance in percent of the channel range (0 = identical, 100 = black vs white).
    /// Root-mean-square of the three channel differences.
    pub fn distance(self, other: Color) -> f64 {
        let dr = self.r as f64 - other.r as f64;
        let dg = self.g as f64 - other.g as f64;
        let db = self.b as f64 - other.b as f64;
        ((dr * dr + dg * dg + db * db) / 3.0).sqrt() / 255.0 * 100.0
    }

    /// How far this color is from paper white.
    pub fn ink(self) -> f64 {
        self.distance(Color::WHITE)
    }

    /// Gray of the same luma (Rec. 601 weights).
    pub fn gray(self) -> Color {
        let luma = 0.299 * self.r as f64 + 0.587 * self.g as f64 + 0.114 * self.b as f64;
        let v = luma.round().clamp(0.0, 255.0) as u8;
        Color::rgb(v, v, v)
    }

    /// Linear blend, `t = 0` gives `self`, `t = 1` gives `other`.
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color::rgb(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ColorError::Format(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorError::Format(s.to_string()))
        };
        Ok(Color::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

/// Tolerance for treating two colors as the same, in percent (0-100).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Fuzz(f64);

impl Fuzz {
    pub const ZERO: Fuzz = Fuzz(0.0);

    /// For compile-time defaults; `percent` must already be within 0-100.
    pub(crate) const fn constant(percent: f64) -> Self {
        Self(percent)
    }

    pub fn new(percent: f64) -> Result<Self, ColorError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(ColorError::FuzzRange(percent));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> f64 {
        self.0
    }

    pub fn matches(self, a: Color, b: Color) -> bool {
        a.distance(b) <= self.0
    }
}

impl TryFrom<f64> for Fuzz {
    type Error = ColorError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Fuzz::new(value)
    }
}

impl From<Fuzz> for f64 {
    fn from(fuzz: Fuzz) -> Self {
        fuzz.0
    }
}
