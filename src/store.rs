use crate::{error::Error, skeleton::SkeletonFrame};
use std::collections::{btree_map, BTreeMap, BTreeSet};

/// The skeletons of every user seen in one frame, keyed by user id.
pub type UserPositions = BTreeMap<u32, SkeletonFrame>;

/// Frame number → user id → skeleton, all of one dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationStore {
    is_3d: bool,
    frames: BTreeMap<u32, UserPositions>,
}

impl AnnotationStore {
    pub fn new(is_3d: bool) -> Self {
        Self {
            is_3d,
            frames: BTreeMap::new(),
        }
    }

    pub fn is_3d(&self) -> bool {
        self.is_3d
    }

    /// Add the skeletons of `frame`.
    ///
    /// Fails without touching the store if the frame is already present or
    /// any skeleton's dimensionality differs from the store's.
    pub fn add(&mut self, frame: u32, positions: UserPositions) -> Result<(), Error> {
        if let Some((&user, _)) = positions
            .iter()
            .find(|(_, skeleton)| skeleton.is_3d() != self.is_3d)
        {
            return Err(Error::AddFrameDimensions {
                frame,
                user,
                expected_3d: self.is_3d,
            });
        }

        match self.frames.entry(frame) {
            btree_map::Entry::Occupied(_) => Err(Error::DuplicateFrame(frame)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(positions);
                Ok(())
            }
        }
    }

    pub fn get(&self, frame: u32) -> Option<&UserPositions> {
        self.frames.get(&frame)
    }

    pub fn user(&self, frame: u32, user: u32) -> Option<&SkeletonFrame> {
        self.frames.get(&frame)?.get(&user)
    }

    pub fn contains(&self, frame: u32) -> bool {
        self.frames.contains_key(&frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, u32, UserPositions> {
        self.frames.iter()
    }

    pub fn frame_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.frames.keys().copied()
    }

    pub fn first_frame(&self) -> Option<u32> {
        self.frames.keys().next().copied()
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.frames.keys().next_back().copied()
    }

    /// Count in how many frames each user appears.
    ///
    /// `None` counts over the whole store, otherwise only frames in the given
    /// set are considered.
    pub fn user_statistics(&self, frames: Option<&BTreeSet<u32>>) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        self.frames
            .iter()
            .filter(|(frame, _)| frames.map_or(true, |wanted| wanted.contains(frame)))
            .flat_map(|(_, users)| users.keys())
            .for_each(|&user| *counts.entry(user).or_insert(0) += 1);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::{AnnotationStore, UserPositions};
    use crate::{
        joint::Joint,
        skeleton::{JointPosition, SkeletonFrame},
    };
    use std::collections::{BTreeMap, BTreeSet};

    fn planar_user() -> SkeletonFrame {
        let mut frame = SkeletonFrame::new(false);
        frame
            .insert(Joint::Head, JointPosition::planar(1.0, 1.0, 1.0))
            .unwrap();
        frame
    }

    #[test]
    fn user_statistics() {
        const USER_A: u32 = 1;
        const USER_B: u32 = 2;

        let mut store = AnnotationStore::new(false);
        store
            .add(
                1,
                vec![(USER_A, planar_user()), (USER_B, planar_user())]
                    .into_iter()
                    .collect(),
            )
            .unwrap();
        store
            .add(2, vec![(USER_A, planar_user())].into_iter().collect())
            .unwrap();

        let all = store.user_statistics(None);
        assert_eq!(all, vec![(USER_A, 2), (USER_B, 1)].into_iter().collect());

        let first = store.user_statistics(Some(&vec![1].into_iter().collect::<BTreeSet<_>>()));
        assert_eq!(first, vec![(USER_A, 1), (USER_B, 1)].into_iter().collect());
    }

    #[test]
    fn add_rejects_mismatched_dimensions_without_mutating() {
        let mut store = AnnotationStore::new(true);
        let mut positions = UserPositions::new();
        positions.insert(3, SkeletonFrame::new(true));
        positions.insert(4, planar_user());

        assert!(store.add(7, positions).is_err());
        assert!(store.is_empty());
        assert!(!store.contains(7));
    }

    #[test]
    fn add_rejects_duplicate_frames() {
        let mut store = AnnotationStore::new(false);
        store.add(5, BTreeMap::new()).unwrap();
        assert!(store.add(5, BTreeMap::new()).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn frames_are_ordered() {
        let mut store = AnnotationStore::new(false);
        for frame in [9, 3, 6].iter().copied() {
            store.add(frame, BTreeMap::new()).unwrap();
        }
        assert_eq!(store.frame_numbers().collect::<Vec<_>>(), vec![3, 6, 9]);
        assert_eq!(store.first_frame(), Some(3));
        assert_eq!(store.last_frame(), Some(9));
    }
}
