pub mod error;
pub mod memory_token_repo;
pub mod pg_token_repo;
pub mod token_repo;

pub use memory_token_repo::MemoryTokenRepo;
pub use pg_token_repo::PgTokenRepo;
pub use token_repo::{TokenRepo, TokenRow};
