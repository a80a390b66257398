mod auth;
mod health_check;

pub use auth::{admin_only, any_role, login, logout, me, refresh, signup, user_only};
pub use health_check::health_check;
