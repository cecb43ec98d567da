/// Progress of a job: a non-decreasing count of completed units against a fixed total, with an
/// optional typed payload.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress<P> {
    completed: u64,
    total: u64,
    payload: Option<P>,
}

impl<P> Default for Progress<P> {
    fn default() -> Self {
        Self {
            completed: 0,
            total: 0,
            payload: None,
        }
    }
}

impl<P> Progress<P> {
    pub fn new(total: u64) -> Self {
        Self {
            completed: 0,
            total,
            payload: None,
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }

    /// Records `completed` units. Counts are clamped so they never decrease and never go above
    /// the total. Returns whether anything changed.
    pub(crate) fn advance(&mut self, completed: u64, payload: Option<P>) -> bool {
        let next = completed.min(self.total).max(self.completed);
        let changed = next != self.completed || payload.is_some();
        self.completed = next;
        if payload.is_some() {
            self.payload = payload;
        }
        changed
    }

    /// The total can only be changed while no units have been completed.
    pub(crate) fn set_total(&mut self, total: u64) -> bool {
        if self.completed > 0 {
            return false;
        }
        self.total = total;
        true
    }
}
