//! Capture, playback, export and evaluation of skeleton annotations.
//!
//! Annotation stores hold the joints of every tracked user per frame and are
//! read from and written to the annotation XML format by [`codec`]. A
//! [`source::RecordingController`] plays a recording back and exports frame
//! ranges as images plus index files, a [`source::LiveController`] captures
//! new recordings from a sensor, and [`statistics::Statistics`] compares
//! result skeletons against ground truth.

pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod folders;
pub mod joint;
pub mod labelmap;
pub mod projection;
pub mod render;
pub mod skeleton;
pub mod source;
pub mod statistics;
pub mod store;
pub mod task;

pub use error::Error;
pub use joint::Joint;
pub use skeleton::{JointPosition, Position, SkeletonFrame};
pub use store::{AnnotationStore, UserPositions};
