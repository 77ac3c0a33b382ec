pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod state;
pub mod validator;

pub use routes::app;
pub use state::AppState;
