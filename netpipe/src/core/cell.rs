//! Write-once storage for a pipeline's terminal outcome.

use parking_lot::Mutex;
use std::fmt;

/// The state held by a [`ResultCell`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CellState<T, E> {
    /// No outcome yet.
    #[default]
    Pending,
    /// The work produced a value.
    Success(T),
    /// The work failed.
    Failure(E),
}

impl<T, E> CellState<T, E> {
    /// Returns true while no outcome has been written.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Converts a terminal state into a `Result`.
    #[must_use]
    pub fn into_result(self) -> Option<Result<T, E>> {
        match self {
            Self::Pending => None,
            Self::Success(value) => Some(Ok(value)),
            Self::Failure(error) => Some(Err(error)),
        }
    }
}

impl<T, E> From<Result<T, E>> for CellState<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

/// Single-assignment storage for the outcome of one unit of work.
///
/// Transitions from pending to a terminal state at most once. Reads clone
/// the stored value, so every read after the transition sees the same outcome.
pub struct ResultCell<T, E> {
    state: Mutex<CellState<T, E>>,
}

impl<T, E> ResultCell<T, E> {
    /// Creates a pending cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending),
        }
    }

    /// Writes the outcome if the cell is still pending.
    ///
    /// Returns the rejected outcome if the cell was already terminal.
    pub fn try_fill(&self, result: Result<T, E>) -> Result<(), Result<T, E>> {
        let mut state = self.state.lock();
        if !state.is_pending() {
            return Err(result);
        }
        *state = result.into();
        Ok(())
    }

    /// Writes the outcome.
    ///
    /// # Panics
    ///
    /// Panics if the cell already holds an outcome. Only the owning pipeline
    /// writes its cell, so a second write is a broken invariant.
    pub fn fill(&self, result: Result<T, E>) {
        assert!(
            self.try_fill(result).is_ok(),
            "result cell written twice"
        );
    }

    /// Returns true while no outcome has been written.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.lock().is_pending()
    }
}

impl<T: Clone, E: Clone> ResultCell<T, E> {
    /// Returns a copy of the current state.
    #[must_use]
    pub fn state(&self) -> CellState<T, E> {
        self.state.lock().clone()
    }

    /// Returns the outcome, or `None` while pending.
    #[must_use]
    pub fn get(&self) -> Option<Result<T, E>> {
        self.state().into_result()
    }
}

impl<T, E> Default for ResultCell<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for ResultCell<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &*self.state.lock() {
            CellState::Pending => "pending",
            CellState::Success(_) => "success",
            CellState::Failure(_) => "failure",
        };
        f.debug_struct("ResultCell").field("state", &label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cell_starts_pending() {
        let cell: ResultCell<u32, String> = ResultCell::new();
        assert!(cell.is_pending());
        assert_eq!(cell.get(), None);
        assert_eq!(cell.state(), CellState::Pending);
    }

    #[test]
    fn test_cell_transitions_once() {
        let cell: ResultCell<u32, String> = ResultCell::new();
        assert!(cell.try_fill(Ok(1)).is_ok());

        let rejected = cell.try_fill(Err("late".to_string()));
        assert_eq!(rejected, Err(Err("late".to_string())));
        assert_eq!(cell.get(), Some(Ok(1)));
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let cell: ResultCell<String, String> = ResultCell::new();
        cell.fill(Err("boom".to_string()));

        let first = cell.get();
        let second = cell.get();
        assert_eq!(first, second);
        assert_eq!(first, Some(Err("boom".to_string())));
    }

    #[test]
    #[should_panic(expected = "result cell written twice")]
    fn test_double_fill_panics() {
        let cell: ResultCell<u32, String> = ResultCell::new();
        cell.fill(Ok(1));
        cell.fill(Ok(2));
    }

    #[test]
    fn test_debug_hides_values() {
        let cell: ResultCell<u32, String> = ResultCell::new();
        cell.fill(Ok(5));
        assert_eq!(format!("{cell:?}"), "ResultCell { state: \"success\" }");
    }
}
