//! Data-access core for the imagefeed client: OAuth code exchange, the paged
//! photo feed with like toggling, and the signed-in user's profile.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod events;
pub mod feed;
pub mod profile;

mod sync;

#[cfg(test)]
mod test_support;

pub use app::AppServices;
