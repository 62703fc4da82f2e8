mod blacklist;
mod hasher;
mod lockout;
mod refresh;
mod service;

pub use blacklist::*;
pub use hasher::*;
pub use lockout::*;
pub use refresh::*;
pub use service::*;
