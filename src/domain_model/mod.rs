mod lockout;
mod policy;
mod session;
mod user;

pub use lockout::*;
pub use policy::*;
pub use session::*;
pub use user::*;
