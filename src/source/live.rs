use super::{
    FrameSource, SourceEvent, Tracker, LABEL_MAP_FILE_NAME, RECORDING_FILE_NAME,
    USER_POSITIONS_FILE_NAME,
};
use crate::{
    codec::{self, EncodeOptions},
    error::Error,
    folders,
    labelmap::{LabelFrame, LabelMapWriter},
    render::{shared_image, RenderOptions, Scene, SharedImage},
    skeleton::SkeletonFrame,
    store::{AnnotationStore, UserPositions},
    task::{StopToken, TaskSlot},
};
use chrono::Local;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, instrument, warn};

/// A capture in progress.
struct Recording {
    directory: PathBuf,
    store: AnnotationStore,
    labels: Option<LabelMapWriter>,
}

impl Recording {
    fn push(
        &mut self,
        positions: UserPositions,
        labels: Option<LabelFrame>,
        resolution: (u32, u32),
    ) -> Result<(), Error> {
        let key = self.store.len() as u32;
        self.store.add(key, positions)?;
        if let Some(writer) = self.labels.as_mut() {
            // keep the stride intact for frames without labels
            let (width, height) = resolution;
            let labels =
                labels.unwrap_or_else(|| LabelFrame::zeros((height as usize, width as usize)));
            writer.write_frame(&labels)?;
        }
        Ok(())
    }
}

struct Shared<T> {
    /// Always locked before `recording`.
    tracker: Mutex<T>,
    run_control: Mutex<TaskSlot>,
    /// Set while the capture loop runs.
    generating: AtomicBool,
    recording: Mutex<Option<Recording>>,
    options: Mutex<RenderOptions>,
    image: SharedImage,
    ignored: Mutex<BTreeSet<u32>>,
    threshold: Mutex<f32>,
    frame: AtomicU32,
    events: Sender<SourceEvent>,
}

/// Drives a live sensor, draws every frame and captures recordings of it.
pub struct LiveController<T: Tracker> {
    shared: Arc<Shared<T>>,
}

impl<T> LiveController<T>
where
    T: Tracker + 'static,
{
    pub fn new(tracker: T) -> (Self, Receiver<SourceEvent>) {
        let (width, height) = tracker.resolution();
        let (events, receiver) = unbounded();
        let shared = Shared {
            tracker: Mutex::new(tracker),
            run_control: Mutex::new(TaskSlot::new("capture")),
            generating: AtomicBool::new(false),
            recording: Mutex::new(None),
            options: Mutex::new(RenderOptions::default()),
            image: shared_image(width, height),
            ignored: Mutex::default(),
            threshold: Mutex::new(0.0),
            frame: AtomicU32::new(0),
            events,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            receiver,
        )
    }

    pub fn options(&self) -> RenderOptions {
        *self.shared.options.lock()
    }

    pub fn set_options(&self, options: RenderOptions) {
        *self.shared.options.lock() = options;
    }

    pub fn set_ignored_users(&self, users: BTreeSet<u32>) {
        *self.shared.ignored.lock() = users;
    }

    pub fn set_threshold(&self, threshold: f32) {
        *self.shared.threshold.lock() = threshold;
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.lock().is_some()
    }

    /// Start capturing into `directory`, which must exist. Returns `false`
    /// if the sensor is not generating or a capture is already running.
    ///
    /// The raw sensor stream, the skeletons of every tracked user and, if
    /// `save_user_data` is set, the per-pixel user labels are captured.
    #[instrument(skip(self))]
    pub fn start_recording(&self, directory: &Path, save_user_data: bool) -> Result<bool, Error> {
        if !self.is_generating() {
            warn!("cannot record while the sensor is not generating");
            return Ok(false);
        }

        let mut tracker = self.shared.tracker.lock();
        let mut recording = self.shared.recording.lock();
        if recording.is_some() {
            return Ok(false);
        }

        {
            let mut options = self.shared.options.lock();
            *options = RenderOptions {
                background: true,
                highlight: false,
                draw_sensor_data: false,
                skeleton: true,
                ..*options
            };
        }

        let labels = if save_user_data {
            Some(LabelMapWriter::create(
                &directory.join(LABEL_MAP_FILE_NAME),
            )?)
        } else {
            None
        };
        tracker.start_raw_recording(&directory.join(RECORDING_FILE_NAME))?;

        *recording = Some(Recording {
            directory: directory.to_path_buf(),
            store: AnnotationStore::new(true),
            labels,
        });
        info!("started recording");
        self.shared.send(SourceEvent::StartedRecording);
        Ok(true)
    }

    /// Start capturing into the next capture directory of the day inside
    /// `project`. Returns the new directory, or `None` without creating one
    /// if the sensor is not generating or a capture is already running.
    pub fn record_new_take(
        &self,
        project: &Path,
        save_user_data: bool,
    ) -> Result<Option<PathBuf>, Error> {
        if !self.is_generating() || self.is_recording() {
            return Ok(None);
        }
        let directory = folders::new_capture_dir(project, &Local::now())?;
        if self.start_recording(&directory, save_user_data)? {
            Ok(Some(directory))
        } else {
            Ok(None)
        }
    }

    /// Finish the running capture. Returns `false` if there was none.
    pub fn stop_recording(&self) -> Result<bool, Error> {
        self.shared.stop_recording()
    }
}

/// Finishes a running capture and joins the capture thread, which holds the
/// shared state.
impl<T: Tracker> Drop for LiveController<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shared.stop_recording() {
            error!(message = "failed to finish recording", error = %e);
        }
        self.shared.run_control.lock().stop();
        self.shared.generating.store(false, Ordering::SeqCst);
    }
}

impl<T> FrameSource for LiveController<T>
where
    T: Tracker + 'static,
{
    fn start_generating(&self) -> Result<bool, Error> {
        let mut run_control = self.shared.run_control.lock();
        if run_control.is_running() {
            return Ok(false);
        }
        self.shared.frame.store(0, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.shared.generating.store(true, Ordering::SeqCst);
        self.shared.send(SourceEvent::StartedGenerating);
        let spawned = run_control.spawn(move |token| shared.capture(&token));
        if !matches!(spawned, Ok(true)) {
            self.shared.generating.store(false, Ordering::SeqCst);
        }
        spawned
    }

    /// Finishes a running capture first.
    fn stop_generating(&self) {
        if let Err(e) = self.shared.stop_recording() {
            error!(message = "failed to finish recording", error = %e);
        }
        self.shared.run_control.lock().stop();
        self.shared.generating.store(false, Ordering::SeqCst);
    }

    fn is_generating(&self) -> bool {
        self.shared.generating.load(Ordering::SeqCst)
    }

    fn current_frame(&self) -> u32 {
        self.shared.frame.load(Ordering::SeqCst)
    }

    fn frame_count(&self) -> u32 {
        self.current_frame()
    }

    fn image(&self) -> SharedImage {
        Arc::clone(&self.shared.image)
    }

    /// Statistics of the running capture, empty when not recording.
    fn user_statistics(&self, frames: Option<&BTreeSet<u32>>) -> BTreeMap<u32, usize> {
        self.shared
            .recording
            .lock()
            .as_ref()
            .map(|recording| recording.store.user_statistics(frames))
            .unwrap_or_default()
    }
}

impl<T> Shared<T>
where
    T: Tracker,
{
    fn send(&self, event: SourceEvent) {
        if self.events.send(event).is_err() {
            debug!("nobody listens for source events");
        }
    }

    fn capture(&self, token: &StopToken) {
        let mut tracked = BTreeSet::new();
        while !token.is_stopped() {
            if let Err(e) = self.update(&mut tracked) {
                error!(message = "sensor failed", error = %e);
                self.send(SourceEvent::ErrorOccurred(e.to_string()));
                if let Err(e) = self.stop_recording() {
                    error!(message = "failed to finish recording", error = %e);
                }
                break;
            }
            self.send(SourceEvent::NewImageDataAvailable { handled: false });
        }
        self.generating.store(false, Ordering::SeqCst);
        self.send(SourceEvent::StoppedGenerating);
    }

    fn update(&self, tracked: &mut BTreeSet<u32>) -> Result<(), Error> {
        let mut tracker = self.tracker.lock();
        tracker.wait_and_update()?;
        let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;

        let users = tracker
            .users()
            .into_iter()
            .filter(|&user| tracker.is_tracking(user))
            .collect::<BTreeSet<_>>();
        for &user in users.difference(tracked) {
            info!(message = "started tracking", user);
            self.send(SourceEvent::StartedTracking(user));
        }
        for &user in tracked.difference(&users) {
            info!(message = "lost tracking", user);
            self.send(SourceEvent::LostTracking(user));
        }

        let positions = users
            .iter()
            .map(|&user| {
                let skeleton = SkeletonFrame::from_sensor(|joint| tracker.joint(user, joint));
                (user, skeleton)
            })
            .collect::<UserPositions>();
        *tracked = users;

        let resolution = tracker.resolution();
        let labels = tracker.label_map();
        if let Some(recording) = self.recording.lock().as_mut() {
            recording.push(positions.clone(), labels.clone(), resolution)?;
        }

        let options = *self.options.lock();
        let projection = tracker.projection();
        let skeletons = positions
            .iter()
            .map(|(&user, skeleton)| (user, skeleton.to_planar(&projection)))
            .collect::<UserPositions>();
        let overlay = UserPositions::new();
        let ignored = self.ignored.lock().clone();
        let threshold = *self.threshold.lock();
        let scene = Scene {
            frame,
            options: &options,
            labels: labels.as_ref().filter(|_| options.needs_labels()),
            ignored: &ignored,
            skeletons: &skeletons,
            overlay: &overlay,
            threshold,
        };

        let (width, height) = resolution;
        let mut image = self.image.lock();
        if image.dimensions() != (width, height) {
            *image = image::RgbImage::new(width, height);
        }
        tracker.render(&scene, &mut image)
    }

    fn stop_recording(&self) -> Result<bool, Error> {
        let mut tracker = self.tracker.lock();
        let recording = match self.recording.lock().take() {
            Some(recording) => recording,
            None => return Ok(false),
        };

        tracker.stop_raw_recording()?;
        if let Some(labels) = recording.labels {
            debug!(message = "finishing label map", frames = labels.frames());
            labels.finish()?;
        }
        let path = recording.directory.join(USER_POSITIONS_FILE_NAME);
        codec::write_file(&path, &recording.store, &EncodeOptions::default())?;

        info!(
            message = "stopped recording",
            frames = recording.store.len(),
            directory = %recording.directory.display()
        );
        self.send(SourceEvent::StoppedRecording);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::LiveController;
    use crate::{
        codec,
        joint::Joint,
        skeleton::JointPosition,
        source::{mock::MockTracker, FrameSource, SourceEvent},
    };
    use crossbeam::channel::{Receiver, RecvTimeoutError};
    use std::{collections::BTreeMap, time::Duration};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn frame(users: &[u32]) -> BTreeMap<u32, Vec<(Joint, JointPosition)>> {
        users
            .iter()
            .map(|&user| {
                let joints = vec![
                    (Joint::Head, JointPosition::spatial(0.0, 500.0, 2000.0, 1.0)),
                    (Joint::LeftHip, JointPosition::spatial(-100.0, 0.0, 2000.0, 0.5)),
                    (Joint::RightHip, JointPosition::spatial(100.0, 0.0, 2000.0, 1.0)),
                ];
                (user, joints)
            })
            .collect()
    }

    fn wait_for(events: &Receiver<SourceEvent>, expected: &SourceEvent) -> Vec<SourceEvent> {
        let mut received = Vec::new();
        loop {
            let event = events.recv_timeout(TIMEOUT).unwrap();
            let done = event == *expected;
            received.push(event);
            if done {
                return received;
            }
        }
    }

    #[test]
    fn tracking_changes_are_reported() {
        let tracker = MockTracker::new(vec![frame(&[1]), frame(&[1, 2]), frame(&[2])]);
        let (controller, events) = LiveController::new(tracker);

        assert!(controller.start_generating().unwrap());
        let received = wait_for(&events, &SourceEvent::StoppedGenerating);
        controller.stop_generating();

        let tracking = received
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    SourceEvent::StartedTracking(_) | SourceEvent::LostTracking(_)
                )
            })
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(
            tracking,
            vec![
                SourceEvent::StartedTracking(1),
                SourceEvent::StartedTracking(2),
                SourceEvent::LostTracking(1)
            ]
        );
        assert_eq!(received.first(), Some(&SourceEvent::StartedGenerating));
        assert_eq!(controller.current_frame(), 3);
    }

    #[test]
    fn device_error_stops_generating() {
        let tracker = MockTracker::new(vec![frame(&[1])]);
        let log = tracker.log.clone();
        let (controller, events) = LiveController::new(tracker);

        controller.start_generating().unwrap();
        let received = wait_for(&events, &SourceEvent::StoppedGenerating);
        assert!(received.contains(&SourceEvent::ErrorOccurred(
            "device error: sensor disconnected".to_owned()
        )));
        controller.stop_generating();
        assert!(!controller.is_generating());

        // the single frame was drawn with the waist derived from the hips
        let log = log.lock().unwrap();
        assert_eq!(log.frames, vec![1]);
        assert_eq!(log.skeleton_users, vec![vec![1]]);
        assert_eq!(log.had_labels, vec![false]);
    }

    #[test]
    fn recording_requires_a_running_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _events) = LiveController::new(MockTracker::new(vec![frame(&[1])]));
        assert!(!controller.start_recording(dir.path(), true).unwrap());
        assert!(!controller.stop_recording().unwrap());
        assert!(!controller.is_recording());
    }

    #[test]
    fn recording_writes_positions_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let script = (0..2000).map(|_| frame(&[3])).collect::<Vec<_>>();
        let tracker = MockTracker::new(script);
        let raw_recording = tracker.raw_recording.clone();
        let (controller, events) = LiveController::new(tracker);

        controller.start_generating().unwrap();
        wait_for(&events, &SourceEvent::NewImageDataAvailable { handled: false });
        assert!(controller.start_recording(dir.path(), true).unwrap());
        assert!(!controller.start_recording(dir.path(), true).unwrap());
        wait_for(&events, &SourceEvent::StartedRecording);
        assert_eq!(
            raw_recording.lock().unwrap().as_deref(),
            Some(dir.path().join("KinectRawData.oni").as_path())
        );
        let options = controller.options();
        assert!(options.skeleton && options.background);
        assert!(!options.draw_sensor_data && !options.highlight);

        wait_for(&events, &SourceEvent::NewImageDataAvailable { handled: false });
        wait_for(&events, &SourceEvent::NewImageDataAvailable { handled: false });
        assert!(controller.stop_recording().unwrap());
        assert!(raw_recording.lock().unwrap().is_none());
        wait_for(&events, &SourceEvent::StoppedRecording);
        controller.stop_generating();

        let store = codec::read_file(&dir.path().join("KinectUserPosition.xml")).unwrap();
        assert!(store.is_3d());
        let frames = store.frame_numbers().collect::<Vec<_>>();
        assert!(frames.len() >= 2);
        assert_eq!(frames, (0..frames.len() as u32).collect::<Vec<_>>());
        let skeleton = store.user(0, 3).unwrap();
        assert!(skeleton.contains(Joint::Waist));

        let labels = std::fs::metadata(dir.path().join("KinectUserData.raw")).unwrap();
        assert_eq!(labels.len(), frames.len() as u64 * 2 * 2 * 2);
    }

    #[test]
    fn sensor_failure_finishes_the_recording() {
        let dir = tempfile::tempdir().unwrap();
        let script = (0..50).map(|_| frame(&[1])).collect::<Vec<_>>();
        let (controller, events) = LiveController::new(MockTracker::new(script));

        controller.start_generating().unwrap();
        wait_for(&events, &SourceEvent::NewImageDataAvailable { handled: false });
        assert!(controller.start_recording(dir.path(), false).unwrap());

        let received = wait_for(&events, &SourceEvent::StoppedGenerating);
        assert!(received.contains(&SourceEvent::StoppedRecording));
        controller.stop_generating();

        assert!(!controller.is_recording());
        assert!(dir.path().join("KinectUserPosition.xml").is_file());
        assert!(!dir.path().join("KinectUserData.raw").exists());
    }

    #[test]
    fn new_takes_are_numbered_inside_the_project() {
        let project = tempfile::tempdir().unwrap();
        let script = (0..2000).map(|_| frame(&[1])).collect::<Vec<_>>();
        let (controller, events) = LiveController::new(MockTracker::new(script));
        assert_eq!(controller.record_new_take(project.path(), false).unwrap(), None);
        assert_eq!(std::fs::read_dir(project.path()).unwrap().count(), 0);

        controller.start_generating().unwrap();
        wait_for(&events, &SourceEvent::NewImageDataAvailable { handled: false });
        let take = controller
            .record_new_take(project.path(), false)
            .unwrap()
            .unwrap();
        assert_eq!(take.parent(), Some(project.path()));
        let name = take.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-Take-1"), "{}", name);
        assert_eq!(controller.record_new_take(project.path(), false).unwrap(), None);

        wait_for(&events, &SourceEvent::StartedRecording);
        assert!(controller.stop_recording().unwrap());
        controller.stop_generating();
        assert!(take.join("KinectUserPosition.xml").is_file());
    }

    #[test]
    fn dropping_a_recording_controller_finishes_the_capture() {
        let dir = tempfile::tempdir().unwrap();
        let script = (0..2000).map(|_| frame(&[1])).collect::<Vec<_>>();
        let (controller, events) = LiveController::new(MockTracker::new(script));

        controller.start_generating().unwrap();
        wait_for(&events, &SourceEvent::NewImageDataAvailable { handled: false });
        assert!(controller.is_generating());
        assert!(controller.start_recording(dir.path(), true).unwrap());
        wait_for(&events, &SourceEvent::StartedRecording);
        drop(controller);

        let received = events.try_iter().collect::<Vec<_>>();
        assert!(received.contains(&SourceEvent::StoppedRecording));
        assert_eq!(received.last(), Some(&SourceEvent::StoppedGenerating));
        assert_eq!(
            events.recv_timeout(TIMEOUT),
            Err(RecvTimeoutError::Disconnected)
        );
        assert!(dir.path().join("KinectUserPosition.xml").is_file());
    }
}
