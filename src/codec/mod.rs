//! XML codec for annotation stores.
//!
//! The store itself knows nothing about files, these functions convert it to
//! and from the annotation document format.

mod decode;
mod encode;
mod tree;

pub use decode::{decode, frame_from_file_name};
pub use encode::{encode, EncodeOptions, FrameKey};

use crate::{error::Error, store::AnnotationStore};
use std::{fs, path::Path};
use tracing::{debug, instrument};

const ROOT: &str = "annotationlist";
const IS_3D_ATTRIBUTE: &str = "Is3DData";
const ANNOTATION: &str = "annotation";
const FRAME_NUMBER: &str = "frame-number";
const IMAGE: &str = "image";
const NAME: &str = "name";
const ANNORECT: &str = "annorect";
const USER_ID_ATTRIBUTE: &str = "UserID";
const ANNOPOINTS: &str = "annopoints";
const POINT: &str = "point";
const ID: &str = "id";
const CONFIDENCE: &str = "confidence";
const X: &str = "x";
const Y: &str = "y";
const Z: &str = "z";

/// Read and decode an annotation file.
#[instrument(level = "debug")]
pub fn read_file(path: &Path) -> Result<AnnotationStore, Error> {
    let bytes = fs::read(path).map_err(|e| Error::ReadFile(e, path.to_path_buf()))?;
    let store = decode(&bytes)?;
    debug!(
        message = "read annotations",
        frames = store.len(),
        is_3d = store.is_3d()
    );
    Ok(store)
}

/// Encode `store` and write it to `path`, replacing any existing file.
#[instrument(level = "debug", skip(store, options))]
pub fn write_file(
    path: &Path,
    store: &AnnotationStore,
    options: &EncodeOptions<'_>,
) -> Result<(), Error> {
    let bytes = encode(store, options)?;
    fs::write(path, bytes).map_err(|e| Error::WriteFile(e, path.to_path_buf()))?;
    debug!(message = "wrote annotations", frames = store.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{read_file, write_file, EncodeOptions};
    use crate::{
        joint::Joint,
        skeleton::{JointPosition, SkeletonFrame},
        store::{AnnotationStore, UserPositions},
    };

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("KinectUserPosition.xml");

        let mut skeleton = SkeletonFrame::new(true);
        skeleton
            .insert(Joint::Torso, JointPosition::spatial(1.5, -2.0, 1800.0, 0.5))
            .unwrap();
        let mut users = UserPositions::new();
        users.insert(1, skeleton);
        let mut store = AnnotationStore::new(true);
        store.add(0, users).unwrap();

        write_file(&path, &store, &EncodeOptions::default()).unwrap();
        assert_eq!(read_file(&path).unwrap(), store);
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file(&dir.path().join("absent.xml")).is_err());
    }
}
