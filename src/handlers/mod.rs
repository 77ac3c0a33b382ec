// Route handlers, one module per resource.
pub mod health;
pub mod movies;
pub mod tokens;
pub mod users;
