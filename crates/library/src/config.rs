//! Library workflow settings.

use std::time::Duration;

/// Settings shared by the library workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    /// How long a reserved book is held when the request names no duration.
    pub default_reservation_duration: Duration,
}

impl LibraryConfig {
    /// Sets the default hold in whole hours.
    pub fn with_default_reservation_hours(mut self, hours: u64) -> Self {
        self.default_reservation_duration = Duration::from_secs(hours * 3600);
        self
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_reservation_duration: Duration::from_secs(24 * 3600),
        }
    }
}
