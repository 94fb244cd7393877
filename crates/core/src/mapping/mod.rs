//! Gradient engine: resolves a scalar position against an ordered set of
//! colour keypoints.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{CurrentsError, Result};

mod color;

pub use color::{Color, Rgb8};

/// A colour anchored at a position in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    #[serde(rename = "colour")]
    pub color: Color,
    pub position: f64,
}

impl Keypoint {
    pub fn new(color: Color, position: f64) -> Self {
        Self { color, position }
    }
}

/// Keypoints kept sorted ascending by position.
///
/// Every constructor and mutator re-sorts, so interpolation can assume
/// monotonic positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Keypoint>", into = "Vec<Keypoint>")]
pub struct Gradient {
    keypoints: Vec<Keypoint>,
}

impl Gradient {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        let mut gradient = Self { keypoints };
        gradient.sort();
        gradient
    }

    /// Builds a gradient from `(hex, position)` pairs.
    pub fn from_hex_stops(stops: &[(&str, f64)]) -> Result<Self> {
        let keypoints = stops
            .iter()
            .map(|(hex, position)| Ok(Keypoint::new(Color::from_hex(hex)?, *position)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(keypoints))
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn push(&mut self, keypoint: Keypoint) {
        self.keypoints.push(keypoint);
        self.sort();
    }

    pub fn remove(&mut self, index: usize) -> Option<Keypoint> {
        (index < self.keypoints.len()).then(|| self.keypoints.remove(index))
    }

    /// Moves a keypoint and returns its index after re-sorting.
    pub fn reposition(&mut self, index: usize, position: f64) -> Option<usize> {
        let keypoint = self.keypoints.get_mut(index)?;
        keypoint.position = position;
        let moved = *keypoint;
        self.sort();
        self.keypoints.iter().position(|k| *k == moved)
    }

    fn sort(&mut self) {
        // Stable, so keypoints sharing a position keep their insertion order.
        self.keypoints
            .sort_by(|a, b| a.position.total_cmp(&b.position));
    }
}

impl From<Vec<Keypoint>> for Gradient {
    fn from(value: Vec<Keypoint>) -> Self {
        Self::new(value)
    }
}

impl From<Gradient> for Vec<Keypoint> {
    fn from(value: Gradient) -> Self {
        value.keypoints
    }
}

/// Policy used to turn a gradient position into a colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolateMode {
    /// HCL blend between the two keypoints bracketing `t`.
    #[default]
    Blended,
    /// Colour of the keypoint nearest to `t`.
    Blocky,
}

impl InterpolateMode {
    /// Resolves `t` against `gradient`. An empty gradient yields black.
    pub fn interpolate(self, t: f64, gradient: &Gradient) -> Color {
        let keypoints = gradient.keypoints();
        let Some(last) = keypoints.last() else {
            return Color::default();
        };

        match self {
            Self::Blended => {
                for pair in keypoints.windows(2) {
                    let (start, end) = (&pair[0], &pair[1]);
                    if start.position <= t && t <= end.position {
                        let span = end.position - start.position;
                        if span <= f64::EPSILON {
                            return start.color;
                        }
                        let local = (t - start.position) / span;
                        if local <= 0.0 {
                            return start.color;
                        }
                        if local >= 1.0 {
                            return end.color;
                        }
                        return start.color.blend_hcl(&end.color, local).clamped();
                    }
                }
                // At or past the last keypoint, or before the first of a
                // gradient that does not start at zero.
                if t < keypoints[0].position {
                    keypoints[0].color
                } else {
                    last.color
                }
            }
            Self::Blocky => {
                let mut nearest = &keypoints[0];
                let mut min = f64::INFINITY;
                for keypoint in keypoints {
                    let distance = (keypoint.position - t).abs();
                    if distance < min {
                        min = distance;
                        nearest = keypoint;
                    }
                }
                nearest.color
            }
        }
    }
}

impl fmt::Display for InterpolateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blended => f.write_str("Blended"),
            Self::Blocky => f.write_str("Blocky"),
        }
    }
}

impl FromStr for InterpolateMode {
    type Err = CurrentsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blended" => Ok(Self::Blended),
            "blocky" => Ok(Self::Blocky),
            other => Err(CurrentsError::InvalidConfig(format!(
                "unknown interpolation mode {other:?}"
            ))),
        }
    }
}

/// Named gradients. Names are listed in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradientSet {
    gradients: BTreeMap<String, Gradient>,
}

impl GradientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The presets that ship with the application.
    pub fn builtin() -> Self {
        let presets: [(&str, &[(&str, f64)]); 3] = [
            (
                "Starboy",
                &[
                    ("#1152cb", 0.0),
                    ("#1152cb", 0.05),
                    ("#e4032f", 0.1),
                    ("#f6c507", 0.55),
                    ("#faf6cb", 1.0),
                ],
            ),
            (
                "Smiths",
                &[
                    ("#ff0202", 0.0),
                    ("#ff0202", 0.1),
                    ("#ff8d00", 0.3),
                    ("#fff400", 0.5),
                    ("#f1ff00", 0.8),
                    ("#a4ff00", 1.0),
                ],
            ),
            (
                "Weird",
                &[
                    ("#ff7303", 0.0),
                    ("#ff7303", 0.1),
                    ("#ffa7e1", 0.5),
                    ("#faf4e6", 1.0),
                ],
            ),
        ];

        let mut set = Self::new();
        for (name, stops) in presets {
            // The literals above are well-formed.
            if let Ok(gradient) = Gradient::from_hex_stops(stops) {
                set.insert(name, gradient);
            }
        }
        set
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Inserts or replaces a gradient, returning the previous one.
    pub fn insert<N: Into<String>>(&mut self, name: N, gradient: Gradient) -> Option<Gradient> {
        self.gradients.insert(name.into(), gradient)
    }

    pub fn get(&self, name: &str) -> Option<&Gradient> {
        self.gradients.get(name)
    }

    /// True when `name` exists and holds at least one keypoint.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some_and(|g| !g.is_empty())
    }

    pub fn remove(&mut self, name: &str) -> Option<Gradient> {
        self.gradients.remove(name)
    }

    /// Renames a gradient. Fails if `from` is missing or `to` is taken.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return if self.gradients.contains_key(from) {
                Ok(())
            } else {
                Err(CurrentsError::msg(format!("no gradient named {from:?}")))
            };
        }
        if self.gradients.contains_key(to) {
            return Err(CurrentsError::msg(format!("gradient {to:?} already exists")));
        }
        let gradient = self
            .gradients
            .remove(from)
            .ok_or_else(|| CurrentsError::msg(format!("no gradient named {from:?}")))?;
        self.gradients.insert(to.to_string(), gradient);
        Ok(())
    }

    /// Copies every gradient of `other` in, overwriting same-named entries.
    pub fn merge(&mut self, other: GradientSet) {
        self.gradients.extend(other.gradients);
    }

    pub fn clear(&mut self) {
        self.gradients.clear();
    }

    pub fn len(&self) -> usize {
        self.gradients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gradients.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.gradients.keys().map(String::as_str).collect()
    }
}
