use std::fmt;

use serde::{Deserialize, Serialize};

/// Dialog state. A dialog only exists once a response carried a To tag, so
/// there is no initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    /// Created by a provisional response
    Early,
    /// A 2xx was sent or received
    Confirmed,
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Early => "Early",
            DialogState::Confirmed => "Confirmed",
            DialogState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}
