pub mod accounts;
pub mod me;
