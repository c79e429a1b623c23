pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod mailer;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{AuthUser, Claims, LoginThrottle, TokenPair, TokenService, TokenType};
pub use error::*;
pub use mailer::{LogMailer, MailMessage, Mailer, OutboxMailer};
pub use routes::*;
pub use server::*;
pub use state::*;
