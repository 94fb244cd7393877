use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{CurrentsError, Result};

// D65 reference white used by the Lab conversions.
const WHITE_REF: [f64; 3] = [0.950_47, 1.0, 1.088_83];

/// RGB colour with channels in `[0, 1]`, passed around by value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// 8-bit channel triple as written to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0);

    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Builds a colour from hue in degrees, saturation and value in `[0, 1]`.
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let hp = hue.rem_euclid(360.0) / 60.0;
        let c = value * saturation;
        let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
        let m = value - c;

        let (r, g, b) = if hp < 1.0 {
            (c, x, 0.0)
        } else if hp < 2.0 {
            (x, c, 0.0)
        } else if hp < 3.0 {
            (0.0, c, x)
        } else if hp < 4.0 {
            (0.0, x, c)
        } else if hp < 5.0 {
            (x, 0.0, c)
        } else {
            (c, 0.0, x)
        };

        Self::new(r + m, g + m, b + m)
    }

    /// Parses `#rrggbb` (leading `#` optional, case-insensitive).
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(CurrentsError::msg(format!("invalid hex colour {hex:?}")));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| CurrentsError::msg(format!("invalid hex colour {hex:?}")))
        };
        Ok(Self::from(Rgb8::new(
            channel(0..2)?,
            channel(2..4)?,
            channel(4..6)?,
        )))
    }

    pub fn to_hex(&self) -> String {
        let rgb = self.to_rgb8();
        format!("#{:02x}{:02x}{:02x}", rgb.r, rgb.g, rgb.b)
    }

    /// Rounds each clamped channel to the nearest 8-bit value.
    pub fn to_rgb8(&self) -> Rgb8 {
        let quantise = |v: f64| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        Rgb8::new(quantise(self.r), quantise(self.g), quantise(self.b))
    }

    pub fn is_valid(&self) -> bool {
        [self.r, self.g, self.b]
            .iter()
            .all(|c| (0.0..=1.0).contains(c))
    }

    pub fn clamped(&self) -> Self {
        let clamp = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self::new(clamp(self.r), clamp(self.g), clamp(self.b))
    }

    /// Blends towards `other` in HCL (polar CIE-Lab) space, taking the short
    /// way round the hue circle. The result may fall outside the RGB gamut;
    /// callers clamp.
    pub fn blend_hcl(&self, other: &Color, t: f64) -> Color {
        let (h1, c1, l1) = self.to_hcl();
        let (h2, c2, l2) = other.to_hcl();

        // Achromatic endpoints have no meaningful hue; borrow the other one.
        let (h1, h2) = match (c1 <= 1e-4, c2 <= 1e-4) {
            (true, false) => (h2, h2),
            (false, true) => (h1, h1),
            _ => (h1, h2),
        };

        Color::from_hcl(
            interpolate_angle(h1, h2, t),
            c1 + t * (c2 - c1),
            l1 + t * (l2 - l1),
        )
    }

    /// Hue in degrees, chroma and lightness (lightness in `[0, 1]`).
    pub fn to_hcl(&self) -> (f64, f64, f64) {
        let (l, a, b) = self.to_lab();
        let h = if (b - a).abs() > 1e-4 && a.abs() > 1e-4 {
            b.atan2(a).to_degrees().rem_euclid(360.0)
        } else {
            0.0
        };
        (h, (a * a + b * b).sqrt(), l)
    }

    pub fn from_hcl(h: f64, c: f64, l: f64) -> Color {
        let h = h.to_radians();
        Color::from_lab(l, c * h.cos(), c * h.sin())
    }

    fn to_lab(self) -> (f64, f64, f64) {
        let (r, g, b) = (
            srgb_to_linear(self.r),
            srgb_to_linear(self.g),
            srgb_to_linear(self.b),
        );
        let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
        let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
        let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;

        let fx = lab_f(x / WHITE_REF[0]);
        let fy = lab_f(y / WHITE_REF[1]);
        let fz = lab_f(z / WHITE_REF[2]);
        (1.16 * fy - 0.16, 5.0 * (fx - fy), 2.0 * (fy - fz))
    }

    fn from_lab(l: f64, a: f64, b: f64) -> Color {
        let fy = (l + 0.16) / 1.16;
        let x = WHITE_REF[0] * lab_finv(fy + a / 5.0);
        let y = WHITE_REF[1] * lab_finv(fy);
        let z = WHITE_REF[2] * lab_finv(fy - b / 2.0);

        let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
        let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
        let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;
        Color::new(linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b))
    }
}

impl From<Rgb8> for Color {
    fn from(value: Rgb8) -> Self {
        Color::new(
            value.r as f64 / 255.0,
            value.g as f64 / 255.0,
            value.b as f64 / 255.0,
        )
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Color::from_hex(&hex).map_err(de::Error::custom)
    }
}

fn srgb_to_linear(v: f64) -> f64 {
    if v <= 0.040_45 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f64) -> f64 {
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f64) -> f64 {
    const DELTA: f64 = 6.0 / 29.0;
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

fn lab_finv(t: f64) -> f64 {
    const DELTA: f64 = 6.0 / 29.0;
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

fn interpolate_angle(a0: f64, a1: f64, t: f64) -> f64 {
    let delta = ((a1 - a0).rem_euclid(360.0) + 540.0).rem_euclid(360.0) - 180.0;
    (a0 + t * delta + 360.0).rem_euclid(360.0)
}
