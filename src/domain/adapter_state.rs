use crate::domain::models::AdapterState;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCommand {
    Start {
        service_filters: Vec<Uuid>,
        allow_duplicates: bool,
    },
    Stop,
}

/// Tracks the radio power state and turns transitions into scan commands
#[derive(Debug)]
pub struct AdapterStateController {
    current: AdapterState,
    service_filters: Vec<Uuid>,
    allow_duplicates: bool,
}

impl AdapterStateController {
    pub fn new(service_filters: Vec<Uuid>, allow_duplicates: bool) -> Self {
        Self {
            current: AdapterState::Unknown,
            service_filters,
            allow_duplicates,
        }
    }

    pub fn current(&self) -> AdapterState {
        self.current
    }

    /// Repeated reports of the same state produce no command.
    pub fn on_state_change(&mut self, state: AdapterState) -> Option<ScanCommand> {
        let previous = std::mem::replace(&mut self.current, state);
        if previous == state {
            return None;
        }

        if state == AdapterState::PoweredOn {
            Some(ScanCommand::Start {
                service_filters: self.service_filters.clone(),
                allow_duplicates: self.allow_duplicates,
            })
        } else if previous == AdapterState::PoweredOn {
            Some(ScanCommand::Stop)
        } else {
            None
        }
    }
}
