//! The seam between frame sources and whatever draws their pixels.

use crate::{error::Error, labelmap::LabelFrame, store::UserPositions};
use image::RgbImage;
use parking_lot::FairMutex;
use std::{collections::BTreeSet, sync::Arc};

/// The output image shared between the renderer and its readers.
pub type SharedImage = Arc<FairMutex<RgbImage>>;

pub fn shared_image(width: u32, height: u32) -> SharedImage {
    Arc::new(FairMutex::new(RgbImage::new(width, height)))
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sensor {
    Image,
    Depth,
}

/// What to draw for each frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub sensor: Sensor,
    pub draw_sensor_data: bool,
    pub background: bool,
    pub skeleton: bool,
    pub highlight: bool,
    pub labels: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sensor: Sensor::Image,
            draw_sensor_data: true,
            background: true,
            skeleton: true,
            highlight: false,
            labels: true,
        }
    }
}

impl RenderOptions {
    /// The file name suffix with one letter per option that differs from a
    /// plain image, in the order `s` (skeleton), `a` (no sensor data), `d`
    /// (depth), `b` (no background), `h` (highlight), `l` (labels). Empty if
    /// none applies, otherwise prefixed with `-`.
    pub fn suffix(&self) -> String {
        let letters = [
            (self.skeleton, 's'),
            (!self.draw_sensor_data, 'a'),
            (self.sensor == Sensor::Depth, 'd'),
            (!self.background, 'b'),
            (self.highlight, 'h'),
            (self.labels, 'l'),
        ]
        .iter()
        .filter(|(active, _)| *active)
        .map(|&(_, letter)| letter)
        .collect::<String>();

        if letters.is_empty() {
            letters
        } else {
            format!("-{}", letters)
        }
    }

    /// Whether drawing needs the per-pixel user labels.
    pub fn needs_labels(&self) -> bool {
        !self.background || self.highlight
    }
}

/// Everything a renderer needs besides the sensor data it owns.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub frame: u32,
    pub options: &'a RenderOptions,
    pub labels: Option<&'a LabelFrame>,
    /// Users drawn as background.
    pub ignored: &'a BTreeSet<u32>,
    /// Annotated skeletons of the frame in image coordinates.
    pub skeletons: &'a UserPositions,
    /// Skeletons drawn on top, e.g. results under evaluation.
    pub overlay: &'a UserPositions,
    /// Joints below this confidence are not drawn.
    pub threshold: f32,
}

pub trait Render {
    fn render(&mut self, scene: &Scene<'_>, canvas: &mut RgbImage) -> Result<(), Error>;
}
