pub mod movie;
pub mod user;

pub use movie::{Movie, Runtime};
pub use user::User;
