pub mod repo;
pub mod repo_types;
pub mod schema;

pub use repo::UserStore;
pub use repo_types::{PublicUser, Role, UserRecord};
