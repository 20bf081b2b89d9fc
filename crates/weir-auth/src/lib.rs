pub mod error;
pub mod manager;
pub mod refresh;
pub mod token;

pub use error::AuthError;
pub use manager::{AuthErrorStrategy, AuthEvent, AuthEventKind, AuthManager};
pub use refresh::TokenResponse;
pub use token::AuthToken;
