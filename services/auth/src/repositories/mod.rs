//! Principal persistence

pub mod user;

pub use user::{InMemoryUserRepository, PgUserRepository, UserRepository};
