//! Position translation over a sorted set of source positions
//!
//! A [`PositionSet`] stores a sorted, duplicate-free list of positions in a
//! *source* space and derives a dense *view* space from it:
//!
//! - [`SetMode::Included`]: the view is exactly the stored positions.
//!   `view = rank of src in the set`.
//! - [`SetMode::Excluded`]: the view is every source position *except* the
//!   stored ones. `view = src - (number of stored positions below src)`.
//!
//! The slotted layout uses the excluded form (stored = deleted frames, view =
//! dense record positions). The filter adapter uses either form depending on
//! its aggregation mode.

/// Whether stored positions are the view (`Included`) or holes in it (`Excluded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Stored positions are the members of the view.
    Included,
    /// Stored positions are removed from the view.
    Excluded,
}

/// Sorted position set with rank translation between source and view spaces.
#[derive(Debug, Clone)]
pub struct PositionSet {
    mode: SetMode,
    positions: Vec<usize>,
}

impl PositionSet {
    /// Creates an empty set.
    pub fn new(mode: SetMode) -> Self {
        Self {
            mode,
            positions: Vec::new(),
        }
    }

    /// Builds a set from unsorted positions.
    ///
    /// # Panics
    ///
    /// Panics on duplicates.
    pub fn from_unsorted(mode: SetMode, mut positions: Vec<usize>) -> Self {
        positions.sort_unstable();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "duplicate position in set"
        );
        Self { mode, positions }
    }

    pub fn mode(&self) -> SetMode {
        self.mode
    }

    /// Number of stored positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// The stored positions, ascending.
    pub fn as_slice(&self) -> &[usize] {
        &self.positions
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    /// Whether `src` is stored.
    pub fn contains(&self, src: usize) -> bool {
        self.positions.binary_search(&src).is_ok()
    }

    /// Whether `src` is part of the view.
    pub fn is_selected(&self, src: usize) -> bool {
        match self.mode {
            SetMode::Included => self.contains(src),
            SetMode::Excluded => !self.contains(src),
        }
    }

    /// Size of the view for a source space of `source_len` positions.
    pub fn view_len(&self, source_len: usize) -> usize {
        match self.mode {
            SetMode::Included => self.positions.len(),
            SetMode::Excluded => source_len - self.positions.len(),
        }
    }

    /// Stores `src`. Returns `false` if it was already present.
    pub fn insert(&mut self, src: usize) -> bool {
        match self.positions.binary_search(&src) {
            Ok(_) => false,
            Err(at) => {
                self.positions.insert(at, src);
                true
            }
        }
    }

    /// Removes `src`. Returns `false` if it was absent.
    pub fn remove(&mut self, src: usize) -> bool {
        match self.positions.binary_search(&src) {
            Ok(at) => {
                self.positions.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    /// Adds one to every stored position `>= src`.
    ///
    /// Call before recording a source insertion at `src`.
    pub fn shift_up_from(&mut self, src: usize) {
        let start = self.positions.partition_point(|p| *p < src);
        for p in &mut self.positions[start..] {
            *p += 1;
        }
    }

    /// Removes `src` if stored, then subtracts one from every stored position `> src`.
    ///
    /// Mirrors a source deletion at `src`. Returns whether `src` was stored.
    pub fn remove_and_shift_down(&mut self, src: usize) -> bool {
        let start = self.positions.partition_point(|p| *p < src);
        let was_stored = self.positions.get(start) == Some(&src);
        if was_stored {
            self.positions.remove(start);
        }
        for p in &mut self.positions[start..] {
            *p -= 1;
        }
        was_stored
    }

    /// Translates a selected source position to its view position.
    ///
    /// # Panics
    ///
    /// Panics if `src` is not selected.
    pub fn to_view(&self, src: usize) -> usize {
        match self.mode {
            SetMode::Included => match self.positions.binary_search(&src) {
                Ok(rank) => rank,
                Err(_) => panic!("source position {} is not in the view", src),
            },
            SetMode::Excluded => {
                let k = self.positions.len();
                if k == 0 || src < self.positions[0] {
                    src
                } else if self.positions[k - 1] < src {
                    src - k
                } else {
                    match self.positions.binary_search(&src) {
                        Ok(_) => panic!("source position {} is excluded from the view", src),
                        Err(below) => src - below,
                    }
                }
            }
        }
    }

    /// Translates a view position to its source position.
    ///
    /// # Panics
    ///
    /// In `Included` mode, panics if `view` is past the end of the view.
    pub fn to_source(&self, view: usize) -> usize {
        match self.mode {
            SetMode::Included => {
                assert!(
                    view < self.positions.len(),
                    "view position {} out of range (len {})",
                    view,
                    self.positions.len()
                );
                self.positions[view]
            }
            SetMode::Excluded => {
                let k = self.positions.len();
                if k == 0 || view < self.positions[0] {
                    view
                } else if view + k > self.positions[k - 1] {
                    view + k
                } else {
                    // positions[i] - i is the number of view slots before the
                    // i-th hole; it never decreases, so binary search works.
                    let mut lo = 0;
                    let mut hi = k;
                    while lo < hi {
                        let mid = lo + (hi - lo) / 2;
                        if self.positions[mid] - mid <= view {
                            lo = mid + 1;
                        } else {
                            hi = mid;
                        }
                    }
                    view + lo
                }
            }
        }
    }
}

/// Distinct positions, highest first.
///
/// Deleting in this order keeps the remaining positions valid.
pub fn descending_distinct(positions: &[usize]) -> Vec<usize> {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    sorted
}
