//! Transport-independent types and pure transforms

pub mod image;
pub mod input;
pub mod models;
pub mod retry;
pub mod settings;
