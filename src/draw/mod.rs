pub mod diff;
pub mod drawer;
pub mod snapshot;
