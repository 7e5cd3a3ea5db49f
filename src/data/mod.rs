//! Read-only Postgres access to users and their user-sites.

pub mod health;
pub mod user_sites;

pub use user_sites::PgUserSiteStore;
