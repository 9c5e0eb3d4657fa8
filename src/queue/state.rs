//! Batch item state

/// Status of one item in a download batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Downloading,
    Downloaded,
    Deploying,
    Completed,
    Failed,
    /// Cancelled before its deploy began
    Cancelled,
}

impl ItemStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => ItemStatus::Pending,
            "downloading" => ItemStatus::Downloading,
            "downloaded" => ItemStatus::Downloaded,
            "deploying" => ItemStatus::Deploying,
            "completed" => ItemStatus::Completed,
            "failed" => ItemStatus::Failed,
            "cancelled" => ItemStatus::Cancelled,
            _ => ItemStatus::Pending,
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Downloaded => "downloaded",
            ItemStatus::Deploying => "deploying",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
        }
        .to_string()
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

/// Counts over a finished or running batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchState {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchState {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a ItemStatus>) -> Self {
        let mut state = BatchState::default();
        for status in statuses {
            state.total += 1;
            match status {
                ItemStatus::Completed => state.completed += 1,
                ItemStatus::Failed => state.failed += 1,
                ItemStatus::Cancelled => state.cancelled += 1,
                _ => state.pending += 1,
            }
        }
        state
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.pending) as f32 / self.total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_status() {
        let statuses = [
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Downloading,
            ItemStatus::Cancelled,
        ];
        let state = BatchState::from_statuses(&statuses);
        assert_eq!(state.total, 4);
        assert_eq!(state.pending, 1);
        assert!(!state.is_complete());
        assert_eq!(state.progress(), 0.75);
    }

    #[test]
    fn status_names_parse_back() {
        assert_eq!(ItemStatus::from_str(&ItemStatus::Cancelled.to_string()), ItemStatus::Cancelled);
        assert_eq!(ItemStatus::from_str("bogus"), ItemStatus::Pending);
        assert!(ItemStatus::Failed.is_final());
        assert!(!ItemStatus::Deploying.is_final());
    }
}
