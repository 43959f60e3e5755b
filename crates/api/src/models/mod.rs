pub mod asset;
pub mod classify;
pub mod identity;

pub use asset::*;
pub use classify::*;
pub use identity::*;
