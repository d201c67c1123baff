pub mod password;
pub mod service;
pub mod session;

pub use service::AuthService;
pub use session::{IssuedSession, SessionClaims, SessionIssuer, SigningKey};
