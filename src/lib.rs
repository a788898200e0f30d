pub mod authority;
pub mod config;
pub mod directory;
pub mod emit;
pub mod model;
pub mod normalize;
pub mod orders;
pub mod reconcile;
pub mod session;
