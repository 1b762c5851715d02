//! Per-joint comparison of a result skeleton against ground truth.

use crate::{
    error::Error,
    joint::Joint,
    projection::Projection,
    skeleton::SkeletonFrame,
    store::AnnotationStore,
};
use ordered_float::OrderedFloat;
use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
};
use tracing::{debug, instrument, warn};

/// Number of points in the cumulative confidence series.
pub const CONFIDENCE_BUCKETS: usize = 21;
const BUCKET_WIDTH: f64 = 0.05;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Marker {
    FalsePositive,
    FalseNegative,
    NotAvailable,
    Normal,
}

/// One plotted point of a joint's error series.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ErrorPoint {
    pub joint: Joint,
    pub frame: u32,
    pub value: f64,
    pub marker: Marker,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Summary {
    /// Mean of every normal difference over the enabled joints.
    pub global_mean: f64,
    pub number_of_points: usize,
    /// Mean of the normal differences of the current frame.
    pub frame_mean: f64,
    /// Sum of the normal differences of the current frame.
    pub frame_value: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct FrameSummary {
    /// The frame the values belong to, zero if it was out of range.
    pub frame: u32,
    pub mean: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    pub points: Vec<ErrorPoint>,
    pub summary: Summary,
    /// `(lower bucket bound, samples with at least that confidence)`.
    pub cumulative_confidence: Vec<(f64, usize)>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct DifferenceRecord {
    frame: u32,
    difference: f64,
    confidence: f64,
    in_truth: bool,
    in_result: bool,
}

impl DifferenceRecord {
    fn marker(&self, threshold: f64) -> Marker {
        match (
            self.confidence < threshold || !self.in_truth,
            self.in_result,
        ) {
            (true, true) => Marker::FalsePositive,
            (true, false) => Marker::NotAvailable,
            (false, true) => Marker::Normal,
            (false, false) => Marker::FalseNegative,
        }
    }

    fn bucket(&self) -> usize {
        ((self.confidence * 100.0 / 5.0).floor().max(0.0) as usize).min(CONFIDENCE_BUCKETS - 1)
    }
}

#[derive(Debug)]
struct Differences {
    first: u32,
    last: u32,
    joints: BTreeMap<Joint, Vec<DifferenceRecord>>,
}

/// Compares one user of a result store against one user of a truth store.
///
/// Not meant to be shared between threads: feed it from a single owner and
/// hand the returned values to whoever draws them.
#[derive(Debug, Default)]
pub struct Statistics {
    differences: Option<Differences>,
    batch: bool,
    summary: Summary,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn has_data(&self) -> bool {
        self.differences.is_some()
    }

    /// First and last compared frame.
    pub fn frame_range(&self) -> Option<(u32, u32)> {
        self.differences
            .as_ref()
            .map(|differences| (differences.first, differences.last))
    }

    /// Compute the difference records of every joint for every result frame.
    ///
    /// 3D results need 3D truth. 2D results against 3D truth convert the
    /// truth with `projection`. Fails if the result frames do not form a
    /// contiguous range, leaving the engine without data.
    #[instrument(skip(self, truth, results, projection))]
    pub fn set_data(
        &mut self,
        truth: &AnnotationStore,
        results: &AnnotationStore,
        truth_user: u32,
        result_user: u32,
        projection: Option<&dyn Projection>,
    ) -> Result<(), Error> {
        self.differences = None;
        self.batch = false;
        self.summary = Summary::default();

        let work_in_3d = results.is_3d();
        if work_in_3d && !truth.is_3d() {
            return Err(Error::InsufficientComparisonData);
        }
        let convert = truth.is_3d() && !work_in_3d;
        if convert && projection.is_none() {
            return Err(Error::MissingConverter);
        }

        let (first, last) = match (results.first_frame(), results.last_frame()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::EmptyResults),
        };

        let mut joints = Joint::ALL
            .iter()
            .map(|&joint| (joint, Vec::with_capacity(results.len())))
            .collect::<BTreeMap<_, _>>();

        for (&frame, users) in results.iter() {
            let result = users.get(&result_user);
            let expected = match (truth.user(frame, truth_user), projection) {
                (Some(skeleton), Some(projection)) if convert => {
                    Some(Cow::Owned(skeleton.to_planar(projection)))
                }
                (Some(skeleton), _) => Some(Cow::Borrowed(skeleton)),
                (None, _) => None,
            };

            for (&joint, records) in joints.iter_mut() {
                records.push(difference(
                    frame,
                    joint,
                    expected.as_deref(),
                    result,
                ));
            }
        }

        let expected = (last - first) as usize + 1;
        if let Some((&joint, records)) = joints
            .iter()
            .find(|(_, records)| records.len() != expected)
        {
            warn!(message = "result frames are not contiguous", first, last);
            return Err(Error::NonContiguousFrames {
                joint,
                first,
                last,
                count: records.len(),
            });
        }

        debug!(message = "computed differences", first, last, work_in_3d);
        self.differences = Some(Differences {
            first,
            last,
            joints,
        });
        Ok(())
    }

    /// Classify every record and recompute the summary values.
    ///
    /// Joints outside `enabled` only contribute plotted points, and only when
    /// `update_points` is set. Returns `None` without data or inside a batch
    /// phase.
    pub fn calculate(
        &mut self,
        enabled: &BTreeSet<Joint>,
        threshold: f64,
        update_points: bool,
        frame: u32,
    ) -> Option<Calculation> {
        if self.batch {
            return None;
        }
        let differences = self.differences.as_ref()?;

        let mut values = Vec::new();
        let mut frame_values = Vec::new();
        let mut histogram = [0usize; CONFIDENCE_BUCKETS];
        let mut points = Vec::new();

        for (&joint, records) in &differences.joints {
            let is_enabled = enabled.contains(&joint);
            if !is_enabled && !update_points {
                continue;
            }

            let mut joint_values = Vec::new();
            let mut fill = Vec::new();

            for record in records {
                if is_enabled {
                    histogram[record.bucket()] += 1;
                }

                match record.marker(threshold) {
                    Marker::Normal => {
                        if update_points {
                            points.push(ErrorPoint {
                                joint,
                                frame: record.frame,
                                value: record.difference,
                                marker: Marker::Normal,
                            });
                            joint_values.push(record.difference);
                        }
                        if is_enabled {
                            values.push(record.difference);
                            if record.frame == frame {
                                frame_values.push(record.difference);
                            }
                        }
                    }
                    marker if update_points => fill.push((record.frame, marker)),
                    _ => {}
                }
            }

            let fill_value = median(&joint_values).unwrap_or_default();
            points.extend(fill.into_iter().map(|(frame, marker)| ErrorPoint {
                joint,
                frame,
                value: fill_value,
                marker,
            }));
        }

        self.summary = Summary {
            global_mean: mean(&values),
            number_of_points: values.len(),
            frame_mean: mean(&frame_values),
            frame_value: frame_values.iter().sum(),
        };

        for i in (1..CONFIDENCE_BUCKETS).rev() {
            histogram[i - 1] += histogram[i];
        }
        let cumulative_confidence = histogram
            .iter()
            .enumerate()
            .map(|(i, &count)| (i as f64 * BUCKET_WIDTH, count))
            .collect();

        debug!(
            message = "calculated statistics",
            points = points.len(),
            global_mean = self.summary.global_mean,
            number_of_points = self.summary.number_of_points
        );
        Some(Calculation {
            points,
            summary: self.summary,
            cumulative_confidence,
        })
    }

    /// Suppress calculation until [`Statistics::end_batch_phase`].
    pub fn start_batch_phase(&mut self) {
        self.batch = true;
    }

    pub fn end_batch_phase(
        &mut self,
        enabled: &BTreeSet<Joint>,
        threshold: f64,
        update_points: bool,
        frame: u32,
    ) -> Option<Calculation> {
        self.batch = false;
        self.calculate(enabled, threshold, update_points, frame)
    }

    /// Recompute the values of a single frame over the `active` joints.
    pub fn update_frame(&mut self, frame: u32, active: &BTreeSet<Joint>) -> Option<FrameSummary> {
        let differences = self.differences.as_ref()?;

        let update = if frame < differences.first || frame > differences.last {
            FrameSummary::default()
        } else {
            let index = (frame - differences.first) as usize;
            let values = active
                .iter()
                .filter_map(|joint| differences.joints.get(joint)?.get(index))
                .map(|record| record.difference)
                .filter(|difference| !difference.is_nan())
                .collect::<Vec<_>>();
            FrameSummary {
                frame,
                mean: mean(&values),
                value: values.iter().sum(),
            }
        };

        self.summary.frame_mean = update.mean;
        self.summary.frame_value = update.value;
        Some(update)
    }
}

fn difference(
    frame: u32,
    joint: Joint,
    truth: Option<&SkeletonFrame>,
    result: Option<&SkeletonFrame>,
) -> DifferenceRecord {
    let truth = truth.and_then(|skeleton| skeleton.get(joint));
    let result = result.and_then(|skeleton| skeleton.get(joint));

    let difference = match (truth, result) {
        (Some(truth), Some(result)) => truth.position.distance(&result.position),
        _ => None,
    };

    DifferenceRecord {
        frame,
        difference: difference.unwrap_or(f64::NAN),
        confidence: truth.map_or(0.0, |truth| f64::from(truth.confidence)),
        in_truth: truth.is_some(),
        in_result: result.is_some(),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.iter().copied().map(OrderedFloat).collect::<Vec<_>>();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[mid].0),
        _ => Some((sorted[mid - 1].0 + sorted[mid].0) / 2.0),
    }
}
