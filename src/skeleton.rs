use crate::{error::Error, joint::Joint, projection::Projection};
use std::collections::{btree_map, BTreeMap};

/// A joint location, either in image coordinates or in sensor space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Position {
    Planar { x: f32, y: f32 },
    Spatial { x: f32, y: f32, z: f32 },
}

impl Position {
    pub fn is_3d(&self) -> bool {
        matches!(self, Position::Spatial { .. })
    }

    pub fn x(&self) -> f32 {
        match *self {
            Position::Planar { x, .. } | Position::Spatial { x, .. } => x,
        }
    }

    pub fn y(&self) -> f32 {
        match *self {
            Position::Planar { y, .. } | Position::Spatial { y, .. } => y,
        }
    }

    pub fn z(&self) -> Option<f32> {
        match *self {
            Position::Planar { .. } => None,
            Position::Spatial { z, .. } => Some(z),
        }
    }

    /// Euclidean distance, `None` if the two positions differ in
    /// dimensionality.
    pub fn distance(&self, other: &Position) -> Option<f64> {
        match (*self, *other) {
            (Position::Planar { x: x1, y: y1 }, Position::Planar { x: x2, y: y2 }) => {
                let (dx, dy) = (f64::from(x1 - x2), f64::from(y1 - y2));
                Some((dx.powi(2) + dy.powi(2)).sqrt())
            }
            (
                Position::Spatial {
                    x: x1,
                    y: y1,
                    z: z1,
                },
                Position::Spatial {
                    x: x2,
                    y: y2,
                    z: z2,
                },
            ) => {
                let (dx, dy, dz) = (
                    f64::from(x1 - x2),
                    f64::from(y1 - y2),
                    f64::from(z1 - z2),
                );
                Some((dx.powi(2) + dy.powi(2) + dz.powi(2)).sqrt())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct JointPosition {
    pub position: Position,
    pub confidence: f32,
}

impl JointPosition {
    pub fn planar(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            position: Position::Planar { x, y },
            confidence,
        }
    }

    pub fn spatial(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self {
            position: Position::Spatial { x, y, z },
            confidence,
        }
    }
}

/// The joints of one user in one frame.
///
/// Every position held by a frame has the dimensionality fixed at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonFrame {
    is_3d: bool,
    joints: BTreeMap<Joint, JointPosition>,
}

impl SkeletonFrame {
    pub fn new(is_3d: bool) -> Self {
        Self {
            is_3d,
            joints: BTreeMap::new(),
        }
    }

    pub fn is_3d(&self) -> bool {
        self.is_3d
    }

    /// Insert or replace the position of `joint`.
    pub fn insert(&mut self, joint: Joint, position: JointPosition) -> Result<(), Error> {
        if position.position.is_3d() != self.is_3d {
            return Err(Error::InsertJointDimensions {
                joint,
                expected_3d: self.is_3d,
            });
        }
        self.joints.insert(joint, position);
        Ok(())
    }

    pub fn get(&self, joint: Joint) -> Option<&JointPosition> {
        self.joints.get(&joint)
    }

    pub fn contains(&self, joint: Joint) -> bool {
        self.joints.contains_key(&joint)
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Joint, JointPosition> {
        self.joints.iter()
    }

    /// Convert to image coordinates. Planar frames are returned unchanged.
    pub fn to_planar(&self, projection: &dyn Projection) -> SkeletonFrame {
        if !self.is_3d {
            return self.clone();
        }

        let joints = self
            .joints
            .iter()
            .map(|(&joint, pos)| {
                let (x, y) = projection.to_projective(
                    pos.position.x(),
                    pos.position.y(),
                    pos.position.z().unwrap_or_default(),
                );
                (joint, JointPosition::planar(x, y, pos.confidence))
            })
            .collect();

        SkeletonFrame {
            is_3d: false,
            joints,
        }
    }

    /// Build a 3D frame from raw sensor readings.
    ///
    /// The waist is never read from `read`; it is derived from both hips.
    /// Readings with zero depth are kept with a confidence of zero.
    pub fn from_sensor<F>(mut read: F) -> SkeletonFrame
    where
        F: FnMut(Joint) -> Option<JointPosition>,
    {
        let mut frame = SkeletonFrame::new(true);
        for joint in Joint::ALL.iter().copied() {
            if joint == Joint::Waist {
                continue;
            }
            if let Some(pos) = read(joint).and_then(zero_depth_unconfident) {
                frame.joints.insert(joint, pos);
            }
        }

        let waist = match (
            frame.joints.get(&Joint::LeftHip),
            frame.joints.get(&Joint::RightHip),
        ) {
            (Some(left), Some(right)) => derive_waist(left, right),
            _ => None,
        };
        if let Some(waist) = waist {
            frame.joints.insert(Joint::Waist, waist);
        }
        frame
    }
}

fn zero_depth_unconfident(pos: JointPosition) -> Option<JointPosition> {
    match pos.position {
        Position::Spatial { z, .. } if z == 0.0 => Some(JointPosition {
            confidence: 0.0,
            ..pos
        }),
        Position::Spatial { .. } => Some(pos),
        Position::Planar { .. } => None,
    }
}

/// The waist as the arithmetic mean of both hips.
///
/// If either hip has zero depth the waist carries a confidence of zero and a
/// zero depth. Returns `None` for planar input.
pub fn derive_waist(left: &JointPosition, right: &JointPosition) -> Option<JointPosition> {
    let (lz, rz) = (left.position.z()?, right.position.z()?);
    let x = (left.position.x() + right.position.x()) / 2.0;
    let y = (left.position.y() + right.position.y()) / 2.0;

    if lz == 0.0 || rz == 0.0 {
        Some(JointPosition::spatial(x, y, 0.0, 0.0))
    } else {
        Some(JointPosition::spatial(
            x,
            y,
            (lz + rz) / 2.0,
            left.confidence.min(right.confidence),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_waist, JointPosition, Position, SkeletonFrame};
    use crate::{joint::Joint, projection::PinholeProjection};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn insert_rejects_mismatched_dimensions() {
        let mut frame = SkeletonFrame::new(false);
        assert!(frame
            .insert(Joint::Head, JointPosition::spatial(1.0, 2.0, 3.0, 1.0))
            .is_err());
        assert!(frame.is_empty());

        frame
            .insert(Joint::Head, JointPosition::planar(1.0, 2.0, 1.0))
            .unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn distances() {
        let a = Position::Planar { x: 0.0, y: 0.0 };
        let b = Position::Planar { x: 3.0, y: 4.0 };
        assert_approx_eq!(a.distance(&b).unwrap(), 5.0);

        let c = Position::Spatial {
            x: 1.0,
            y: 2.0,
            z: 2.0,
        };
        let origin = Position::Spatial {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        };
        assert_approx_eq!(c.distance(&origin).unwrap(), 3.0);
        assert!(a.distance(&c).is_none());
    }

    #[test]
    fn waist_is_mean_of_hips() {
        let left = JointPosition::spatial(0.0, 10.0, 1000.0, 1.0);
        let right = JointPosition::spatial(100.0, 20.0, 2000.0, 0.5);
        let waist = derive_waist(&left, &right).unwrap();
        assert_eq!(waist, JointPosition::spatial(50.0, 15.0, 1500.0, 0.5));
    }

    #[test]
    fn waist_without_depth_is_unconfident() {
        let left = JointPosition::spatial(0.0, 10.0, 0.0, 1.0);
        let right = JointPosition::spatial(100.0, 20.0, 2000.0, 1.0);
        let waist = derive_waist(&left, &right).unwrap();
        assert_eq!(waist.confidence, 0.0);
        assert_eq!(waist.position.z(), Some(0.0));
    }

    #[test]
    fn sensor_frame_derives_waist() {
        let frame = SkeletonFrame::from_sensor(|joint| match joint {
            Joint::LeftHip => Some(JointPosition::spatial(-100.0, 0.0, 2000.0, 1.0)),
            Joint::RightHip => Some(JointPosition::spatial(100.0, 0.0, 2000.0, 1.0)),
            Joint::Head => Some(JointPosition::spatial(0.0, 500.0, 0.0, 1.0)),
            Joint::Waist => panic!("waist must not be read from the sensor"),
            _ => None,
        });

        assert!(frame.is_3d());
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.get(Joint::Head).unwrap().confidence, 0.0);
        assert_eq!(
            frame.get(Joint::Waist).unwrap().position,
            Position::Spatial {
                x: 0.0,
                y: 0.0,
                z: 2000.0
            }
        );
    }

    #[test]
    fn planar_conversion_keeps_confidence() {
        let mut frame = SkeletonFrame::new(true);
        frame
            .insert(Joint::Torso, JointPosition::spatial(0.0, 0.0, 2000.0, 0.7))
            .unwrap();
        let projection = PinholeProjection::default();
        let planar = frame.to_planar(&projection);

        assert!(!planar.is_3d());
        let torso = planar.get(Joint::Torso).unwrap();
        assert_eq!(torso.confidence, 0.7);
        assert_approx_eq!(torso.position.x(), projection.cx);
        assert_approx_eq!(torso.position.y(), projection.cy);
    }
}
