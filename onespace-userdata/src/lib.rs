//! Per-user tasks, settings and timer state for OneSpace.
//!
//! Built on the document store in `onespace-storage`:
//! - Tasks are `<username>::task::<created_ms>::<suffix>` documents ordered
//!   by an integer `order`
//! - Settings (`<username>::settings`) and timer state
//!   (`<username>::timer::state`) are singletons created on first read
//! - Every mutation is checked against the calling user's identifier prefix
//!
//! [`OneSpace`] ties the store, the service and replication together.

pub mod error;
pub mod ids;
pub mod runtime;
pub mod service;
mod timer;
pub mod types;

pub use error::{UserDataError, UserDataResult};
pub use runtime::{AppConfig, OneSpace, init_logging};
pub use service::UserDataService;
pub use types::{
    FocusModeSettings, PomodoroSettings, Theme, ThemeColors, TimerPhase, TimerState, UserSettings,
};
