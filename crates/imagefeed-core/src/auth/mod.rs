mod credential_store;
mod error;
mod exchange;
mod oauth;

pub use credential_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{AuthError, StoreError};
pub use exchange::TokenExchangeCoordinator;
pub use oauth::{authorization_url, code_from_redirect};
