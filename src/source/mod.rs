//! Frame sources: live capture from a tracking sensor and playback of a
//! recording.
//!
//! Device access is behind [`Player`] and [`Tracker`]. The controllers own
//! the worker threads, locks and events around them.

mod blank;
mod live;
mod recorded;

pub use blank::AnnotationPlayback;
pub use live::LiveController;
pub use recorded::RecordingController;

use crate::{
    error::Error,
    joint::Joint,
    labelmap::LabelFrame,
    projection::PinholeProjection,
    render::{Render, SharedImage},
    skeleton::JointPosition,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

/// Raw sensor recording, owned by the device SDK.
pub const RECORDING_FILE_NAME: &str = "KinectRawData.oni";
/// Skeletons captured alongside the raw recording.
pub const USER_POSITIONS_FILE_NAME: &str = "KinectUserPosition.xml";
/// Per-pixel user labels captured alongside the raw recording.
pub const LABEL_MAP_FILE_NAME: &str = "KinectUserData.raw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    StartedGenerating,
    StoppedGenerating,
    /// The shared image holds a new frame. `handled` is passed through from
    /// the caller that asked for the update.
    NewImageDataAvailable { handled: bool },
    ErrorOccurred(String),
    StartedRecording,
    StoppedRecording,
    StartedTracking(u32),
    LostTracking(u32),
}

/// A recorded sensor stream.
pub trait Player: Render + Send {
    /// Advance to the next frame. Returns `false` at the end of the stream.
    fn wait_and_update(&mut self) -> Result<bool, Error>;

    fn seek(&mut self, frame: u32) -> Result<(), Error>;

    fn tell_frame(&self) -> u32;

    fn frame_count(&self) -> u32;

    /// `(width, height)` of the sensor images.
    fn resolution(&self) -> (u32, u32);

    fn projection(&self) -> PinholeProjection {
        PinholeProjection::default()
    }
}

/// A live sensor with user tracking.
pub trait Tracker: Render + Send {
    /// Block until the sensor delivers the next frame.
    fn wait_and_update(&mut self) -> Result<(), Error>;

    fn resolution(&self) -> (u32, u32);

    /// Every user currently seen by the sensor.
    fn users(&self) -> Vec<u32>;

    fn is_tracking(&self, user: u32) -> bool;

    /// The sensor space position of a joint of a tracked user.
    fn joint(&self, user: u32, joint: Joint) -> Option<JointPosition>;

    fn label_map(&self) -> Option<LabelFrame>;

    fn start_raw_recording(&mut self, path: &Path) -> Result<(), Error>;

    fn stop_raw_recording(&mut self) -> Result<(), Error>;

    fn projection(&self) -> PinholeProjection {
        PinholeProjection::default()
    }
}

/// What callers may do with any source.
pub trait FrameSource {
    /// Start the generating thread. Returns `false` if it already runs.
    fn start_generating(&self) -> Result<bool, Error>;

    /// Stop the generating thread and wait for it.
    fn stop_generating(&self);

    fn is_generating(&self) -> bool;

    fn current_frame(&self) -> u32;

    fn frame_count(&self) -> u32;

    /// The rendered output. Lock it before reading.
    fn image(&self) -> SharedImage;

    /// In how many of `frames` (or all frames) each user appears.
    fn user_statistics(&self, frames: Option<&BTreeSet<u32>>) -> BTreeMap<u32, usize>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted devices for controller tests.

    use super::{Player, Tracker};
    use crate::{
        error::Error,
        joint::Joint,
        labelmap::LabelFrame,
        render::{Render, Scene},
        skeleton::JointPosition,
    };
    use image::{Rgb, RgbImage};
    use std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    };

    /// What a mock renderer saw, shared with the test.
    #[derive(Debug, Default, Clone)]
    pub struct Rendered {
        pub frames: Vec<u32>,
        pub ignored: Vec<Vec<u32>>,
        pub skeleton_users: Vec<Vec<u32>>,
        pub overlay_users: Vec<Vec<u32>>,
        pub had_labels: Vec<bool>,
    }

    fn record(log: &Arc<Mutex<Rendered>>, scene: &Scene<'_>, canvas: &mut RgbImage) {
        let mut log = log.lock().unwrap();
        log.frames.push(scene.frame);
        log.ignored.push(scene.ignored.iter().copied().collect());
        log.skeleton_users
            .push(scene.skeletons.keys().copied().collect());
        log.overlay_users.push(scene.overlay.keys().copied().collect());
        log.had_labels.push(scene.labels.is_some());
        let shade = (scene.frame % 256) as u8;
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([shade, shade, shade]);
        }
    }

    pub struct MockPlayer {
        pub frame: u32,
        pub count: u32,
        pub fail_at: Option<u32>,
        pub log: Arc<Mutex<Rendered>>,
    }

    impl MockPlayer {
        pub fn new(count: u32) -> Self {
            Self {
                frame: 0,
                count,
                fail_at: None,
                log: Arc::default(),
            }
        }
    }

    impl Render for MockPlayer {
        fn render(&mut self, scene: &Scene<'_>, canvas: &mut RgbImage) -> Result<(), Error> {
            if self.fail_at == Some(scene.frame) {
                return Err(Error::Device(format!("cannot render frame {}", scene.frame)));
            }
            record(&self.log, scene, canvas);
            Ok(())
        }
    }

    impl Player for MockPlayer {
        fn wait_and_update(&mut self) -> Result<bool, Error> {
            if self.frame >= self.count {
                return Ok(false);
            }
            self.frame += 1;
            Ok(true)
        }

        fn seek(&mut self, frame: u32) -> Result<(), Error> {
            self.frame = frame;
            Ok(())
        }

        fn tell_frame(&self) -> u32 {
            self.frame
        }

        fn frame_count(&self) -> u32 {
            self.count
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 3)
        }
    }

    /// Plays back a scripted list of frames, each mapping tracked users to
    /// their joints. Fails once the script runs out.
    pub struct MockTracker {
        pub script: Vec<BTreeMap<u32, Vec<(Joint, JointPosition)>>>,
        pub position: usize,
        pub raw_recording: Arc<Mutex<Option<PathBuf>>>,
        pub log: Arc<Mutex<Rendered>>,
    }

    impl MockTracker {
        pub fn new(script: Vec<BTreeMap<u32, Vec<(Joint, JointPosition)>>>) -> Self {
            Self {
                script,
                position: 0,
                raw_recording: Arc::default(),
                log: Arc::default(),
            }
        }

        fn current(&self) -> Option<&BTreeMap<u32, Vec<(Joint, JointPosition)>>> {
            self.position
                .checked_sub(1)
                .and_then(|index| self.script.get(index))
        }
    }

    impl Render for MockTracker {
        fn render(&mut self, scene: &Scene<'_>, canvas: &mut RgbImage) -> Result<(), Error> {
            record(&self.log, scene, canvas);
            Ok(())
        }
    }

    impl Tracker for MockTracker {
        fn wait_and_update(&mut self) -> Result<(), Error> {
            if self.position >= self.script.len() {
                return Err(Error::Device("sensor disconnected".to_owned()));
            }
            self.position += 1;
            std::thread::sleep(std::time::Duration::from_millis(2));
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }

        fn users(&self) -> Vec<u32> {
            self.current()
                .map(|users| users.keys().copied().collect())
                .unwrap_or_default()
        }

        fn is_tracking(&self, user: u32) -> bool {
            self.current()
                .map_or(false, |users| users.contains_key(&user))
        }

        fn joint(&self, user: u32, joint: Joint) -> Option<JointPosition> {
            self.current()?
                .get(&user)?
                .iter()
                .find(|(candidate, _)| *candidate == joint)
                .map(|&(_, position)| position)
        }

        fn label_map(&self) -> Option<LabelFrame> {
            let users = self.current()?;
            let label = users.keys().next().copied().unwrap_or_default() as u16;
            Some(LabelFrame::from_elem((2, 2), label))
        }

        fn start_raw_recording(&mut self, path: &Path) -> Result<(), Error> {
            *self.raw_recording.lock().unwrap() = Some(path.to_path_buf());
            Ok(())
        }

        fn stop_raw_recording(&mut self) -> Result<(), Error> {
            *self.raw_recording.lock().unwrap() = None;
            Ok(())
        }
    }
}
