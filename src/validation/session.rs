//! Navigation state of a validation session: set list, set details, sheet view.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SelectingSet,
    SetDetails {
        set_id: String,
        page_count: usize,
    },
    SheetView {
        set_id: String,
        page_count: usize,
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SelectSet { set_id: String, page_count: usize },
    OpenSheet(usize),
    Next,
    Previous,
    Back,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot apply {event:?} in state {state:?}")]
pub struct InvalidTransition {
    pub state: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// Next state for `event`; illegal events leave the caller's state as is
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, &event) {
            (S::SelectingSet, E::SelectSet { set_id, page_count }) => Some(S::SetDetails {
                set_id: set_id.clone(),
                page_count: *page_count,
            }),
            (S::SetDetails { set_id, page_count }, E::OpenSheet(index)) if index < page_count => {
                Some(S::SheetView {
                    set_id: set_id.clone(),
                    page_count: *page_count,
                    index: *index,
                })
            }
            (S::SetDetails { .. }, E::Back) => Some(S::SelectingSet),
            (S::SheetView { set_id, page_count, index }, E::Next) if index + 1 < *page_count => {
                Some(S::SheetView {
                    set_id: set_id.clone(),
                    page_count: *page_count,
                    index: index + 1,
                })
            }
            (S::SheetView { set_id, page_count, index }, E::Previous) if *index > 0 => {
                Some(S::SheetView {
                    set_id: set_id.clone(),
                    page_count: *page_count,
                    index: index - 1,
                })
            }
            (S::SheetView { set_id, page_count, .. }, E::Back) => Some(S::SetDetails {
                set_id: set_id.clone(),
                page_count: *page_count,
            }),
            _ => None,
        };

        next.ok_or_else(|| InvalidTransition {
            state: self.clone(),
            event,
        })
    }

    /// Index of the sheet on screen, if any
    pub fn current_sheet(&self) -> Option<usize> {
        match self {
            SessionState::SheetView { index, .. } => Some(*index),
            _ => None,
        }
    }
}
