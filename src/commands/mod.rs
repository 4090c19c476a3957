// ABOUTME: Command implementations for each CLI subcommand
// ABOUTME: Exports merge, info, anonymize, cut, providers, and digest commands

pub mod anonymize;
pub mod cut;
pub mod digest;
pub mod info;
pub mod merge;
pub mod providers;

pub use anonymize::anonymize;
pub use cut::cut;
pub use digest::digest;
pub use info::info;
pub use merge::merge;
pub use providers::providers;
