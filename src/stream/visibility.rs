//! Host-app visibility signal.
//!
//! The embedding application tells the service when its surface is hidden
//! (backgrounded tab, suspended app). Hidden tears down every live transport
//! while keeping subscriber registrations; visible reconnects every record
//! that still has subscribers, so consumers never re-register across a
//! suspend/resume cycle.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn is_hidden(self) -> bool {
        self == Visibility::Hidden
    }
}
