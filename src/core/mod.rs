//! Service layer. Every public operation authorizes the caller once, works
//! inside the caller's tenant and delegates invariant-bearing writes to a
//! single store call.

pub mod attendance;
pub mod conflict;
pub mod edit_window;
pub mod schedule;
pub mod timetable;

use std::sync::Arc;

use crate::auth::auth::AuthUser;
use crate::auth::capability::{Authorizer, Capability};
use crate::clock::Clock;
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::store::{AttendanceStore, Directory, ScheduleStore, TimetableStore};

pub use attendance::AttendanceService;
pub use schedule::ScheduleService;
pub use timetable::TimetableService;

/// The four storage seams, usually all backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub schedule: Arc<dyn ScheduleStore>,
    pub timetable: Arc<dyn TimetableStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub directory: Arc<dyn Directory>,
}

impl Stores {
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: ScheduleStore + TimetableStore + AttendanceStore + Directory + 'static,
    {
        Stores {
            schedule: store.clone(),
            timetable: store.clone(),
            attendance: store.clone(),
            directory: store,
        }
    }
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub schedule: ScheduleService,
    pub timetables: TimetableService,
    pub attendance: AttendanceService,
}

impl AppState {
    pub fn new(stores: Stores, authorizer: Arc<dyn Authorizer>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        AppState {
            schedule: ScheduleService::new(stores.schedule.clone(), authorizer.clone(), clock.clone()),
            timetables: TimetableService::new(
                stores.timetable.clone(),
                stores.schedule.clone(),
                stores.directory.clone(),
                authorizer.clone(),
                clock.clone(),
            ),
            attendance: AttendanceService::new(stores, authorizer, clock, config),
        }
    }
}

pub(crate) fn authorize(authorizer: &dyn Authorizer, caller: &AuthUser, capability: Capability) -> AppResult<()> {
    if authorizer.authorize(caller, capability).is_allowed() {
        Ok(())
    } else {
        tracing::debug!(
            user_id = caller.user_id,
            capability = %capability,
            "Capability check denied"
        );
        Err(AppError::missing_capability(capability))
    }
}

/// Trimmed optional text; blank becomes `None`.
pub(crate) fn clean_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
