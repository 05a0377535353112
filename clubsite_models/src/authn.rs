//! Admin accounts and the bearer sessions they open

pub mod admin_user;
pub mod password;
pub mod session;

pub use admin_user::AdminUser;
pub use session::AdminSession;
