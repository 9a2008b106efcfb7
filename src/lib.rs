pub mod autosave;
pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dump;
pub mod graph;
pub mod ir;
#[cfg(feature = "cli")]
pub mod logging;
pub mod persistence;
pub mod placement;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::run;
