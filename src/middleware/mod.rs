/// Middleware module
///
/// The per-request verification chain: `AuthGuard` classifies and attaches
/// identity, `RequireRole` enforces route role sets, and `AutoRefresh` is the
/// boundary-level alternative to the caller-side refresh coordinator.

mod auth_guard;
mod auto_refresh;
mod roles;

pub use auth_guard::AuthGuard;
pub use auto_refresh::AutoRefresh;
pub use roles::RequireRole;
