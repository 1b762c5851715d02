use super::{FrameSource, Player, SourceEvent, LABEL_MAP_FILE_NAME, USER_POSITIONS_FILE_NAME};
use crate::{
    codec,
    error::Error,
    export::{frame_number_width, image_file_name, ExportEvent, ExportIndex, ExportReport, ExportRequest},
    labelmap::LabelMapReader,
    projection::Projection,
    render::{shared_image, RenderOptions, Scene, SharedImage},
    store::{AnnotationStore, UserPositions},
    task::{StopToken, TaskSlot},
};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, instrument, warn};

/// Skeletons drawn on top of the recording's own annotations.
#[derive(Debug, Default)]
struct Overlay {
    store: Option<AnnotationStore>,
    users: BTreeSet<u32>,
}

struct Shared<P> {
    player: Mutex<P>,
    /// Guards starting and stopping playback. Held by an export for its
    /// whole duration.
    run_control: Mutex<TaskSlot>,
    /// Set while the playback loop runs.
    generating: AtomicBool,
    /// Guards the render options. Held by an export for its whole duration.
    options: Mutex<RenderOptions>,
    image: SharedImage,
    annotations: AnnotationStore,
    labels: Mutex<Option<LabelMapReader>>,
    ignored: Mutex<BTreeSet<u32>>,
    overlay: Mutex<Overlay>,
    threshold: Mutex<f32>,
    current: AtomicU32,
    frame_count: u32,
    events: Sender<SourceEvent>,
}

/// Plays back a recording together with its annotations and exports frame
/// ranges of it.
pub struct RecordingController<P> {
    shared: Arc<Shared<P>>,
    export: Mutex<TaskSlot>,
    export_events: (Sender<ExportEvent>, Receiver<ExportEvent>),
}

impl<P> RecordingController<P>
where
    P: Player + 'static,
{
    pub fn new(
        player: P,
        annotations: AnnotationStore,
        labels: Option<LabelMapReader>,
    ) -> (Self, Receiver<SourceEvent>) {
        let (width, height) = player.resolution();
        let (events, receiver) = unbounded();
        let shared = Shared {
            current: AtomicU32::new(player.tell_frame()),
            frame_count: player.frame_count(),
            player: Mutex::new(player),
            run_control: Mutex::new(TaskSlot::new("playback")),
            generating: AtomicBool::new(false),
            options: Mutex::new(RenderOptions::default()),
            image: shared_image(width, height),
            annotations,
            labels: Mutex::new(labels),
            ignored: Mutex::default(),
            overlay: Mutex::default(),
            threshold: Mutex::new(0.0),
            events,
        };
        let controller = Self {
            shared: Arc::new(shared),
            export: Mutex::new(TaskSlot::new("export")),
            export_events: unbounded(),
        };
        (controller, receiver)
    }

    /// Open the annotations and label map stored in a capture directory.
    /// Either file may be missing. `player` is built from the annotations.
    #[instrument(skip(player))]
    pub fn open<F>(directory: &Path, player: F) -> Result<(Self, Receiver<SourceEvent>), Error>
    where
        F: FnOnce(&AnnotationStore) -> P,
    {
        let positions = directory.join(USER_POSITIONS_FILE_NAME);
        let annotations = if positions.exists() {
            codec::read_file(&positions)?
        } else {
            warn!(message = "recording has no annotations", path = %positions.display());
            AnnotationStore::new(true)
        };

        let label_path = directory.join(LABEL_MAP_FILE_NAME);
        let labels = if label_path.exists() {
            Some(LabelMapReader::open(&label_path)?)
        } else {
            debug!(message = "recording has no label map", path = %label_path.display());
            None
        };

        let player = player(&annotations);
        Ok(Self::new(player, annotations, labels))
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.shared.annotations
    }

    /// Move to `frame` without drawing it.
    pub fn seek_frame(&self, frame: u32) -> Result<(), Error> {
        let mut player = self.shared.player.lock();
        player.seek(frame)?;
        self.shared.current.store(frame, Ordering::SeqCst);
        Ok(())
    }

    /// Draw the current frame unless playback is running, which draws on its
    /// own.
    pub fn request_update(&self, handled: bool) -> Result<(), Error> {
        if self.is_generating() {
            return Ok(());
        }
        let options = *self.shared.options.lock();
        let mut player = self.shared.player.lock();
        self.shared.render_current(&mut *player, &options)?;
        self.shared.send(SourceEvent::NewImageDataAvailable { handled });
        Ok(())
    }

    pub fn options(&self) -> RenderOptions {
        *self.shared.options.lock()
    }

    pub fn set_options(&self, options: RenderOptions) {
        *self.shared.options.lock() = options;
    }

    pub fn ignored_users(&self) -> BTreeSet<u32> {
        self.shared.ignored.lock().clone()
    }

    pub fn set_ignored_users(&self, users: BTreeSet<u32>) {
        *self.shared.ignored.lock() = users;
    }

    pub fn set_threshold(&self, threshold: f32) {
        *self.shared.threshold.lock() = threshold;
    }

    /// Draw the skeletons of `users` from `store` on top of every frame, or
    /// nothing if `store` is `None`.
    pub fn set_overlay(&self, store: Option<AnnotationStore>, users: BTreeSet<u32>) {
        *self.shared.overlay.lock() = Overlay { store, users };
    }

    /// Receives progress and the outcome of every export.
    pub fn export_events(&self) -> Receiver<ExportEvent> {
        self.export_events.1.clone()
    }

    /// Export on a dedicated thread. Returns `false` if an export is already
    /// running.
    pub fn export(&self, request: ExportRequest) -> Result<bool, Error> {
        let shared = Arc::clone(&self.shared);
        let events = self.export_events.0.clone();
        self.export.lock().spawn(move |token| {
            let event = match shared.export(request, &token, &events) {
                Ok(Some(report)) => ExportEvent::Completed(report),
                Ok(None) => {
                    info!("export cancelled");
                    ExportEvent::Cancelled
                }
                Err(e) => {
                    error!(message = "export failed", error = %e);
                    ExportEvent::Failed(e.to_string())
                }
            };
            token.finish();
            if events.send(event).is_err() {
                debug!("nobody listens for export events");
            }
        })
    }

    /// Stop a running export after its current frame and wait for it.
    pub fn cancel_export(&self) -> bool {
        self.export.lock().stop()
    }

    pub fn is_exporting(&self) -> bool {
        self.export.lock().is_running()
    }
}

/// The workers hold the shared state and are joined here.
impl<P> Drop for RecordingController<P> {
    fn drop(&mut self) {
        self.export.get_mut().stop();
        self.shared.run_control.lock().stop();
        self.shared.generating.store(false, Ordering::SeqCst);
    }
}

impl<P> FrameSource for RecordingController<P>
where
    P: Player + 'static,
{
    fn start_generating(&self) -> Result<bool, Error> {
        let mut run_control = self.shared.run_control.lock();
        if run_control.is_running() {
            return Ok(false);
        }
        let shared = Arc::clone(&self.shared);
        self.shared.generating.store(true, Ordering::SeqCst);
        self.shared.send(SourceEvent::StartedGenerating);
        let spawned = run_control.spawn(move |token| shared.play(&token));
        if !matches!(spawned, Ok(true)) {
            self.shared.generating.store(false, Ordering::SeqCst);
        }
        spawned
    }

    fn stop_generating(&self) {
        self.shared.run_control.lock().stop();
        self.shared.generating.store(false, Ordering::SeqCst);
    }

    /// An export stops playback before it starts, so this is `false` during
    /// an export.
    fn is_generating(&self) -> bool {
        self.shared.generating.load(Ordering::SeqCst)
    }

    fn current_frame(&self) -> u32 {
        self.shared.current.load(Ordering::SeqCst)
    }

    fn frame_count(&self) -> u32 {
        self.shared.frame_count
    }

    fn image(&self) -> SharedImage {
        Arc::clone(&self.shared.image)
    }

    fn user_statistics(&self, frames: Option<&BTreeSet<u32>>) -> BTreeMap<u32, usize> {
        self.shared.annotations.user_statistics(frames)
    }
}

impl<P> Shared<P>
where
    P: Player,
{
    fn send(&self, event: SourceEvent) {
        if self.events.send(event).is_err() {
            debug!("nobody listens for source events");
        }
    }

    fn play(&self, token: &StopToken) {
        while !token.is_stopped() {
            match self.play_one() {
                Ok(true) => self.send(SourceEvent::NewImageDataAvailable { handled: false }),
                Ok(false) => {
                    debug!("end of recording");
                    break;
                }
                Err(e) => {
                    error!(message = "playback failed", error = %e);
                    self.send(SourceEvent::ErrorOccurred(e.to_string()));
                    break;
                }
            }
        }
        self.generating.store(false, Ordering::SeqCst);
        self.send(SourceEvent::StoppedGenerating);
    }

    fn play_one(&self) -> Result<bool, Error> {
        let options = *self.options.lock();
        let mut player = self.player.lock();
        if !player.wait_and_update()? {
            return Ok(false);
        }
        self.current.store(player.tell_frame(), Ordering::SeqCst);
        self.render_current(&mut *player, &options)?;
        Ok(true)
    }

    fn render_current(&self, player: &mut P, options: &RenderOptions) -> Result<(), Error> {
        let frame = player.tell_frame();
        let (width, height) = player.resolution();
        let projection = player.projection();

        let labels = if options.needs_labels() {
            match self.labels.lock().as_mut() {
                Some(reader) => reader.read_frame(frame, width as usize, height as usize)?,
                None => None,
            }
        } else {
            None
        };

        let skeletons = self
            .annotations
            .get(frame)
            .map(|users| to_planar(users.iter(), &projection))
            .unwrap_or_default();
        let overlay = {
            let overlay = self.overlay.lock();
            match overlay.store.as_ref().and_then(|store| store.get(frame)) {
                Some(users) => to_planar(
                    users
                        .iter()
                        .filter(|(user, _)| overlay.users.contains(*user)),
                    &projection,
                ),
                None => UserPositions::new(),
            }
        };
        let ignored = self.ignored.lock().clone();
        let threshold = *self.threshold.lock();

        let scene = Scene {
            frame,
            options,
            labels: labels.as_ref(),
            ignored: &ignored,
            skeletons: &skeletons,
            overlay: &overlay,
            threshold,
        };

        let mut image = self.image.lock();
        if image.dimensions() != (width, height) {
            *image = image::RgbImage::new(width, height);
        }
        player.render(&scene, &mut image)
    }

    /// Returns `None` if the export was cancelled.
    #[instrument(skip_all, fields(directory = %request.directory.display(), frames = request.frames.len()))]
    fn export(
        &self,
        request: ExportRequest,
        token: &StopToken,
        events: &Sender<ExportEvent>,
    ) -> Result<Option<ExportReport>, Error> {
        let mut frames = request.frames.clone();
        frames.sort_unstable();
        frames.dedup();

        let mut run_control = self.run_control.lock();
        run_control.stop();

        let mut options = self.options.lock();
        let previous_options = std::mem::replace(&mut *options, request.options);

        let present = frames.iter().copied().collect::<BTreeSet<_>>();
        let background = self
            .annotations
            .user_statistics(Some(&present))
            .into_keys()
            .filter(|user| !request.users.contains(user))
            .collect();
        let previous_ignored = std::mem::replace(&mut *self.ignored.lock(), background);

        let result = self.export_frames(&request, &frames, &options, token, events);

        *self.ignored.lock() = previous_ignored;
        *options = previous_options;
        drop(options);
        drop(run_control);
        result
    }

    fn export_frames(
        &self,
        request: &ExportRequest,
        frames: &[u32],
        options: &RenderOptions,
        token: &StopToken,
        events: &Sender<ExportEvent>,
    ) -> Result<Option<ExportReport>, Error> {
        let width = frame_number_width(frames.last().copied().unwrap_or_default());
        let suffix = options.suffix();
        let omit_points = request.users.is_empty();
        let is_3d = self.annotations.is_3d();

        let mut index_2d = ExportIndex::new(false, omit_points);
        let mut index_3d = ExportIndex::new(true, omit_points);
        if request.annotations_3d && !is_3d {
            warn!("annotations are 2D, no 3D index can be exported");
        }

        let mut player = self.player.lock();
        let projection = player.projection();
        let total = frames.len();

        for (i, &frame) in frames.iter().enumerate() {
            player.seek(frame)?;
            self.current.store(frame, Ordering::SeqCst);
            self.render_current(&mut *player, options)?;

            let file_name = image_file_name(frame, width, &suffix);
            let path = request.directory.join(&file_name);
            self.image
                .lock()
                .save(&path)
                .map_err(|e| Error::SaveImage(e, path.clone()))?;

            let positions = self
                .annotations
                .get(frame)
                .map(|users| {
                    users
                        .iter()
                        .filter(|(user, _)| request.users.contains(*user))
                        .map(|(&user, skeleton)| (user, skeleton.clone()))
                        .collect::<UserPositions>()
                })
                .unwrap_or_default();
            let planar = to_planar(positions.iter(), &projection);

            let file = if request.relative_paths {
                file_name
            } else {
                path.to_string_lossy().into_owned()
            };
            index_2d.push(frame, planar, file.clone())?;
            if is_3d {
                index_3d.push(frame, positions, file)?;
            }

            let done = i + 1;
            let progress = ExportEvent::Progress {
                percent: done as f32 / total as f32 * 100.0,
                done,
                total,
            };
            if events.send(progress).is_err() {
                debug!("nobody listens for export progress");
            }
            if token.is_stopped() {
                return Ok(None);
            }
        }

        info!(message = "exported frames", total, suffix = %suffix);
        Ok(Some(ExportReport {
            directory: request.directory.clone(),
            frames: frames.to_vec(),
            users: request.users.clone(),
            index_2d: Some(index_2d).filter(|_| request.annotations_2d),
            index_3d: Some(index_3d).filter(|_| request.annotations_3d && is_3d),
            relative_paths: request.relative_paths,
            suffix,
        }))
    }
}

fn to_planar<'a, I>(users: I, projection: &dyn Projection) -> UserPositions
where
    I: Iterator<Item = (&'a u32, &'a crate::skeleton::SkeletonFrame)>,
{
    users
        .map(|(&user, skeleton)| (user, skeleton.to_planar(projection)))
        .collect()
}
