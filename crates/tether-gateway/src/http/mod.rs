pub mod auth;
pub mod channels;
pub mod chat;
pub mod health;
