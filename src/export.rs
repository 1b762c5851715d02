//! Export requests, their results and the files written next to the images.

use crate::{
    codec::{self, EncodeOptions, FrameKey},
    error::Error,
    render::{RenderOptions, Sensor},
    store::{AnnotationStore, UserPositions},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tracing::info;

pub const IMAGE_EXTENSION: &str = "png";

/// Number of digits of the widest frame number, at least one.
pub fn frame_number_width(max_frame: u32) -> usize {
    if max_frame == 0 {
        1
    } else {
        max_frame.ilog10() as usize + 1
    }
}

/// `<frame zero padded to width><suffix>.png`
pub fn image_file_name(frame: u32, width: usize, suffix: &str) -> String {
    format!(
        "{:0width$}{}.{}",
        frame,
        suffix,
        IMAGE_EXTENSION,
        width = width
    )
}

/// Name of the index file of one dimensionality, e.g. `Export3D-s.xml`.
pub fn index_file_name(is_3d: bool, suffix: &str) -> String {
    format!("Export{}{}.xml", if is_3d { "3D" } else { "2D" }, suffix)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    /// Frames to export, in any order.
    pub frames: Vec<u32>,
    /// Users drawn in the foreground and listed in the indexes.
    pub users: BTreeSet<u32>,
    pub annotations_2d: bool,
    pub annotations_3d: bool,
    /// Index files name images relative to the export directory.
    pub relative_paths: bool,
    pub options: RenderOptions,
    pub directory: PathBuf,
}

/// The skeletons of the exported users plus the image written per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportIndex {
    pub store: AnnotationStore,
    pub files: BTreeMap<u32, String>,
    /// Set when no users were selected. The index then only maps frames to
    /// files.
    pub omit_points: bool,
}

impl ExportIndex {
    pub fn new(is_3d: bool, omit_points: bool) -> Self {
        Self {
            store: AnnotationStore::new(is_3d),
            files: BTreeMap::new(),
            omit_points,
        }
    }

    pub fn push(&mut self, frame: u32, positions: UserPositions, file: String) -> Result<(), Error> {
        self.store.add(frame, positions)?;
        self.files.insert(frame, file);
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        codec::write_file(
            path,
            &self.store,
            &EncodeOptions {
                key: FrameKey::Files(&self.files),
                frames: None,
                omit_points: self.omit_points,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub directory: PathBuf,
    /// The exported frames in ascending order.
    pub frames: Vec<u32>,
    pub users: BTreeSet<u32>,
    pub index_2d: Option<ExportIndex>,
    pub index_3d: Option<ExportIndex>,
    pub relative_paths: bool,
    pub suffix: String,
}

impl ExportReport {
    /// Write the requested indexes next to the images and return their paths.
    pub fn write_indexes(&self) -> Result<Vec<PathBuf>, Error> {
        let mut written = Vec::new();
        for index in self.index_2d.iter().chain(&self.index_3d) {
            let path = self
                .directory
                .join(index_file_name(index.store.is_3d(), &self.suffix));
            index.write(&path)?;
            info!(message = "wrote export index", path = %path.display());
            written.push(path);
        }
        Ok(written)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Progress {
        percent: f32,
        done: usize,
        total: usize,
    },
    Failed(String),
    /// The export stopped between frames, without indexes.
    Cancelled,
    Completed(ExportReport),
}

/// The three passes of a batch export over the same frames and users: the
/// plain image, then with the skeleton drawn, then with the background
/// removed.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    template: ExportRequest,
    next: usize,
}

impl BatchPlan {
    pub const PHASES: usize = 3;

    pub fn new(template: ExportRequest) -> Self {
        Self { template, next: 0 }
    }

    pub fn phase_options(phase: usize) -> Option<RenderOptions> {
        let plain = RenderOptions {
            sensor: Sensor::Image,
            draw_sensor_data: true,
            background: true,
            skeleton: false,
            highlight: false,
            labels: false,
        };
        match phase {
            0 => Some(plain),
            1 => Some(RenderOptions {
                skeleton: true,
                ..plain
            }),
            2 => Some(RenderOptions {
                background: false,
                ..plain
            }),
            _ => None,
        }
    }

    /// Number of phases handed out so far.
    pub fn phase(&self) -> usize {
        self.next
    }
}

impl Iterator for BatchPlan {
    type Item = ExportRequest;

    fn next(&mut self) -> Option<Self::Item> {
        let options = Self::phase_options(self.next)?;
        self.next += 1;
        Some(ExportRequest {
            options,
            ..self.template.clone()
        })
    }
}
