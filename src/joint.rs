use crate::error::Error;
use num_traits::FromPrimitive;
use std::{fmt, str::FromStr};

/// The skeletal landmarks tracked per user and frame.
///
/// The discriminant of every variant is its stable export id, which is what
/// annotation files store. Left and right follow the sensor's point of view,
/// the display names are mirrored to the viewer's point of view.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    num_derive::FromPrimitive,
)]
pub enum Joint {
    LeftFoot = 0,
    LeftKnee = 1,
    LeftHip = 2,
    RightHip = 3,
    RightKnee = 4,
    RightFoot = 5,
    LeftHand = 6,
    LeftElbow = 7,
    LeftShoulder = 8,
    RightShoulder = 9,
    RightElbow = 10,
    RightHand = 11,
    Neck = 12,
    Head = 13,
    Waist = 14,
    Torso = 15,
}

pub const NUM_JOINTS: usize = 16;

impl Joint {
    pub const ALL: [Joint; NUM_JOINTS] = [
        Joint::LeftFoot,
        Joint::LeftKnee,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::RightKnee,
        Joint::RightFoot,
        Joint::LeftHand,
        Joint::LeftElbow,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::RightElbow,
        Joint::RightHand,
        Joint::Neck,
        Joint::Head,
        Joint::Waist,
        Joint::Torso,
    ];

    /// The id written to annotation files.
    pub fn export_id(self) -> u8 {
        self as u8
    }

    /// Look up a joint by its export id. Unknown ids yield `None`.
    pub fn from_export_id(id: u8) -> Option<Self> {
        Self::from_u8(id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::LeftFoot => "Right Foot",
            Joint::LeftKnee => "Right Knee",
            Joint::LeftHip => "Right Hip",
            Joint::RightHip => "Left Hip",
            Joint::RightKnee => "Left Knee",
            Joint::RightFoot => "Left Foot",
            Joint::LeftHand => "Right Hand",
            Joint::LeftElbow => "Right Elbow",
            Joint::LeftShoulder => "Right Shoulder",
            Joint::RightShoulder => "Left Shoulder",
            Joint::RightElbow => "Left Elbow",
            Joint::RightHand => "Left Hand",
            Joint::Neck => "Neck",
            Joint::Head => "Head",
            Joint::Waist => "Waist",
            Joint::Torso => "Torso",
        }
    }

    /// Look up a joint by its display name.
    ///
    /// Matching ignores case and treats `-` and `_` like spaces, so
    /// `left-hand` resolves to "Left Hand".
    pub fn from_name(name: &str) -> Result<Self, Error> {
        let wanted = normalize(name);
        Self::ALL
            .iter()
            .copied()
            .find(|joint| normalize(joint.name()) == wanted)
            .ok_or_else(|| Error::UnknownJointName(name.to_owned()))
    }
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | '_' => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Joint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
