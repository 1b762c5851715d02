use crate::joint::Joint;
use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown joint name: {0:?}")]
    UnknownJointName(String),

    #[error("failed to insert {joint}: frame expects {} positions", dimensions(.expected_3d))]
    InsertJointDimensions { joint: Joint, expected_3d: bool },

    #[error("failed to add frame {frame}: user {user} does not hold {} positions", dimensions(.expected_3d))]
    AddFrameDimensions {
        frame: u32,
        user: u32,
        expected_3d: bool,
    },

    #[error("frame {0} is already present")]
    DuplicateFrame(u32),

    #[error("failed to parse xml")]
    ParseXml(#[source] quick_xml::Error),

    #[error("failed to read xml attribute")]
    ReadAttribute(#[source] quick_xml::events::attributes::AttrError),

    #[error("failed to write xml")]
    WriteXml(#[source] quick_xml::Error),

    #[error("document is not well formed")]
    MalformedDocument,

    #[error("expected element <{expected}>, found <{found}>")]
    UnexpectedElement {
        expected: &'static str,
        found: String,
    },

    #[error("missing element <{0}>")]
    MissingElement(&'static str),

    #[error("missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("failed to parse boolean from {0:?}")]
    ParseBool(String),

    #[error("failed to parse integer {field} from {value:?}")]
    ParseInt {
        field: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("failed to parse number {field} from {value:?}")]
    ParseFloat {
        field: &'static str,
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    #[error("failed to get frame number from file name {0:?}")]
    FrameFromFileName(String),

    #[error("joint positions mix 2D and 3D data")]
    InconsistentDimensions,

    #[error("no file name for frame {0}")]
    MissingFileName(u32),

    #[error("cannot compare 3D results against 2D truth data")]
    InsufficientComparisonData,

    #[error("comparing 2D results against 3D truth data requires a projection")]
    MissingConverter,

    #[error("result data holds no frames")]
    EmptyResults,

    #[error("frames {first}..={last} are not contiguous: got {count} records for joint {joint}")]
    NonContiguousFrames {
        joint: Joint,
        first: u32,
        last: u32,
        count: usize,
    },

    #[error("failed to read file: {1:?}")]
    ReadFile(#[source] io::Error, PathBuf),

    #[error("failed to write file: {1:?}")]
    WriteFile(#[source] io::Error, PathBuf),

    #[error("failed to create file: {1:?}")]
    CreateFile(#[source] io::Error, PathBuf),

    #[error("failed to create directory: {1:?}")]
    CreateDirectory(#[source] io::Error, PathBuf),

    #[error("failed to read directory: {1:?}")]
    ReadDirectory(#[source] io::Error, PathBuf),

    #[error("directory already exists: {0:?}")]
    DirectoryExists(PathBuf),

    #[error("failed to save image: {1:?}")]
    SaveImage(#[source] image::ImageError, PathBuf),

    #[error("failed to read label map frame {1}")]
    ReadLabelMap(#[source] io::Error, u32),

    #[error("failed to write label map")]
    WriteLabelMap(#[source] io::Error),

    #[error("label map of {0} values does not fit a {1}x{2} frame")]
    LabelMapShape(usize, usize, usize),

    #[error("device error: {0}")]
    Device(String),

    #[error("failed to spawn thread {1:?}")]
    SpawnThread(#[source] io::Error, &'static str),

    #[error("failed to read settings: {1:?}")]
    ReadSettings(#[source] serde_json::Error, PathBuf),

    #[error("failed to serialize settings")]
    SerializeSettings(#[source] serde_json::Error),
}

fn dimensions(is_3d: &bool) -> &'static str {
    if *is_3d {
        "3D"
    } else {
        "2D"
    }
}
