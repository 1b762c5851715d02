//! Playback of annotations without sensor data.

use super::Player;
use crate::{
    error::Error,
    joint::Joint,
    projection::PinholeProjection,
    render::{Render, Scene},
    skeleton::SkeletonFrame,
    store::AnnotationStore,
};
use image::{Rgb, RgbImage};

const BONES: [(Joint, Joint); 15] = [
    (Joint::Head, Joint::Neck),
    (Joint::Neck, Joint::LeftShoulder),
    (Joint::Neck, Joint::RightShoulder),
    (Joint::LeftShoulder, Joint::LeftElbow),
    (Joint::LeftElbow, Joint::LeftHand),
    (Joint::RightShoulder, Joint::RightElbow),
    (Joint::RightElbow, Joint::RightHand),
    (Joint::Neck, Joint::Torso),
    (Joint::Torso, Joint::Waist),
    (Joint::Waist, Joint::LeftHip),
    (Joint::Waist, Joint::RightHip),
    (Joint::LeftHip, Joint::LeftKnee),
    (Joint::LeftKnee, Joint::LeftFoot),
    (Joint::RightHip, Joint::RightKnee),
    (Joint::RightKnee, Joint::RightFoot),
];

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const USER: Rgb<u8> = Rgb([64, 64, 160]);
const SKELETON: Rgb<u8> = Rgb([255, 255, 255]);
const OVERLAY: Rgb<u8> = Rgb([255, 0, 0]);
const JOINT_RADIUS: i64 = 3;

/// Steps through the annotated frame range of a store and draws the
/// skeletons onto a blank canvas. Frames without annotations are empty.
#[derive(Debug, Clone)]
pub struct AnnotationPlayback {
    first: u32,
    last: u32,
    position: Option<u32>,
    resolution: (u32, u32),
    projection: PinholeProjection,
}

impl AnnotationPlayback {
    pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

    pub fn new(annotations: &AnnotationStore) -> Self {
        Self {
            first: annotations.first_frame().unwrap_or_default(),
            last: annotations.last_frame().unwrap_or_default(),
            position: None,
            resolution: Self::DEFAULT_RESOLUTION,
            projection: PinholeProjection::default(),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = (width, height);
        self
    }
}

impl Player for AnnotationPlayback {
    fn wait_and_update(&mut self) -> Result<bool, Error> {
        let next = self.position.map_or(self.first, |frame| frame.saturating_add(1));
        if next > self.last || self.position == Some(u32::MAX) {
            return Ok(false);
        }
        self.position = Some(next);
        Ok(true)
    }

    fn seek(&mut self, frame: u32) -> Result<(), Error> {
        self.position = Some(frame);
        Ok(())
    }

    fn tell_frame(&self) -> u32 {
        self.position.unwrap_or(self.first)
    }

    fn frame_count(&self) -> u32 {
        self.last - self.first + 1
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn projection(&self) -> PinholeProjection {
        self.projection
    }
}

impl Render for AnnotationPlayback {
    fn render(&mut self, scene: &Scene<'_>, canvas: &mut RgbImage) -> Result<(), Error> {
        for pixel in canvas.pixels_mut() {
            *pixel = BACKGROUND;
        }

        if let Some(labels) = scene.labels {
            for ((row, column), &label) in labels.indexed_iter() {
                let user = u32::from(label);
                let visible = label != 0
                    && (scene.options.highlight || !scene.options.background)
                    && !scene.ignored.contains(&user);
                if visible {
                    put(canvas, column as i64, row as i64, USER);
                }
            }
        }

        if scene.options.skeleton {
            for (user, skeleton) in scene.skeletons {
                if !scene.ignored.contains(user) {
                    draw_skeleton(canvas, skeleton, scene.threshold, SKELETON);
                }
            }
        }
        for skeleton in scene.overlay.values() {
            draw_skeleton(canvas, skeleton, scene.threshold, OVERLAY);
        }
        Ok(())
    }
}

fn draw_skeleton(canvas: &mut RgbImage, skeleton: &SkeletonFrame, threshold: f32, color: Rgb<u8>) {
    let point = |joint| {
        skeleton
            .get(joint)
            .filter(|position| position.confidence >= threshold)
            .map(|position| {
                (
                    position.position.x().round() as i64,
                    position.position.y().round() as i64,
                )
            })
    };

    for &(a, b) in BONES.iter() {
        if let (Some(from), Some(to)) = (point(a), point(b)) {
            draw_line(canvas, from, to, color);
        }
    }
    for &joint in Joint::ALL.iter() {
        if let Some((x, y)) = point(joint) {
            draw_dot(canvas, x, y, color);
        }
    }
}

/// Bresenham.
fn draw_line(canvas: &mut RgbImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);

    loop {
        put(canvas, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_dot(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    for dy in -JOINT_RADIUS..=JOINT_RADIUS {
        for dx in -JOINT_RADIUS..=JOINT_RADIUS {
            if dx * dx + dy * dy <= JOINT_RADIUS * JOINT_RADIUS {
                put(canvas, x + dx, y + dy, color);
            }
        }
    }
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < i64::from(canvas.width()) && y < i64::from(canvas.height()) {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}
