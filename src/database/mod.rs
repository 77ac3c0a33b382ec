pub mod error;
pub mod filters;
pub mod manager;
pub mod memory;
pub mod models;
pub mod movies;
pub mod optimistic;
pub mod permissions;
pub mod tokens;
pub mod users;

pub use error::StoreError;
pub use manager::{connect, Stores};
pub use memory::MemoryStore;
pub use movies::MovieRepository;
pub use permissions::PermissionRepository;
pub use tokens::TokenRepository;
pub use users::UserRepository;
