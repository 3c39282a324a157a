//! Visualization parameter blocks.

use bytemuck::{Pod, Zeroable};

/// Color ramp applied to the visualized quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMap {
    SimpleRamp,
    Jet,
    Turbo,
    Viridis,
    Plasma,
    Magma,
    Inferno,
    Grayscale,
    /// Out-of-range selector; the shader falls back to its own default.
    Unknown(i32),
}

impl ColorMap {
    #[must_use]
    pub fn from_index(index: i32) -> Self {
        match index {
            0 => Self::SimpleRamp,
            1 => Self::Jet,
            2 => Self::Turbo,
            3 => Self::Viridis,
            4 => Self::Plasma,
            5 => Self::Magma,
            6 => Self::Inferno,
            7 => Self::Grayscale,
            other => Self::Unknown(other),
        }
    }

    /// Raw selector passed to the shader.
    #[must_use]
    pub fn index(self) -> i32 {
        match self {
            Self::SimpleRamp => 0,
            Self::Jet => 1,
            Self::Turbo => 2,
            Self::Viridis => 3,
            Self::Plasma => 4,
            Self::Magma => 5,
            Self::Inferno => 6,
            Self::Grayscale => 7,
            Self::Unknown(other) => other,
        }
    }
}

/// What the BVH visualization counts per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhMode {
    Overlap = 0,
    Complexity = 1,
}

/// Highest encoding selector either visualization understands.
pub const MAX_ENCODING: u32 = 2;

/// Parameters shared by both visualizations, read once per view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualizationParams {
    pub mode: u32,
    pub color_map: ColorMap,
    /// Clamped to `0..=MAX_ENCODING`.
    pub encoding: u32,
    /// Always finite and positive.
    pub range: f32,
    pub range_min: f32,
}

impl VisualizationParams {
    /// Builds a parameter block from raw tunable values.
    ///
    /// A non-positive or non-finite `range` is replaced by `default_range`.
    #[must_use]
    pub fn new(
        mode: u32,
        color_map: i32,
        encoding: i32,
        range: f32,
        range_min: f32,
        default_range: f32,
    ) -> Self {
        let range = if range.is_finite() && range > 0.0 {
            range
        } else {
            log::warn!("Visualization range {range} is invalid, using {default_range}");
            default_range
        };
        Self {
            mode,
            color_map: ColorMap::from_index(color_map),
            encoding: encoding.clamp(0, MAX_ENCODING as i32) as u32,
            range,
            range_min: if range_min.is_finite() { range_min } else { 0.0 },
        }
    }

    #[must_use]
    pub fn uniforms(&self) -> VisualizeUniforms {
        VisualizeUniforms {
            mode: self.mode,
            color_map: self.color_map.index(),
            encoding: self.encoding,
            range: self.range,
            range_min: self.range_min,
            _pad: [0; 3],
        }
    }
}

/// Uniform block layout shared with the visualization shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VisualizeUniforms {
    pub mode: u32,
    pub color_map: i32,
    pub encoding: u32,
    pub range: f32,
    pub range_min: f32,
    pub _pad: [u32; 3],
}
