pub mod command;
pub mod domain;
pub mod error;
pub mod protocol;
