pub mod auth;
pub mod billing;
pub mod chat;
pub mod contact;
pub mod health;
pub mod leads;
pub mod plans;
pub mod ws;
