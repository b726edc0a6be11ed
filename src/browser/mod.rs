pub mod manager;
pub mod profile;

#[cfg(test)]
mod tests;

pub use manager::{check_navigation_status, classify_navigation_error, BrowserManager, BrowserSettings};
pub use profile::{BrowserProfile, ProfileConfig, UserAgentGenerator};
