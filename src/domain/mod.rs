/// Domain module
///
/// User identity model and the identity repository seam.

mod repository;
mod user;

pub use repository::InMemoryUserRepository;
pub use repository::PgUserRepository;
pub use repository::UserRepository;
pub use user::CurrentUser;
pub use user::NewUser;
pub use user::Role;
pub use user::User;
