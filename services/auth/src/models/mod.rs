//! Authentication service models

pub mod session;
pub mod user;

// Re-export for convenience
pub use session::{AuthUser, IssuedSession, RefreshedSession, Session, SessionStatus};
pub use user::{NewUser, Principal, User, UserView};
