pub mod lifetime;
pub mod token_store;
pub mod validator;

pub use lifetime::{TimeUnit, TokenLifetime};
pub use token_store::{StoreError, Token, TokenStore};
pub use validator::{Rejection, TokenValidator};
