/// Domain models
///
/// # Models
///
/// - `case`: Legal cases and their reminder state
/// - `user`: Users, their devices and notification preferences
///
/// Persistence lives in [`crate::store`]; these types carry no database
/// handles.

pub mod case;
pub mod user;

pub use case::{
    Attachment, Case, CaseFilter, CasePatch, CasePriority, CaseStats, CaseStatus, NewCase,
    ReminderCandidate, StatsBounds,
};
pub use user::{token_fingerprint, validate_device_token, User, UserPreferences, UserProfile};
