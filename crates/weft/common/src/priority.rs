// Weft
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task execution priority levels
///
/// # Variants
/// - Background: lowest-urgency housekeeping work
/// - Low: non-critical tasks
/// - Normal: default execution priority
/// - High: time-sensitive operations
/// - Critical: must-run-next tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Background = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

/// Number of priority bands in the global queue set.
pub const NUM_PRIORITIES: usize = 5;

impl TaskPriority {
    /// All priorities, highest first; the order in which workers scan the
    /// global queue bands.
    pub const HIGHEST_FIRST: [TaskPriority; NUM_PRIORITIES] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
        TaskPriority::Background,
    ];

    /// Convert to numeric representation
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Index of this priority's band in the global queue array.
    /// Band 0 holds Critical tasks so that an ascending scan visits the
    /// highest priority first.
    pub fn queue_index(&self) -> usize {
        NUM_PRIORITIES - 1 - (*self as usize)
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => write!(f, "Background"),
            Self::Low => write!(f, "Low"),
            Self::Normal => write!(f, "Normal"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}
