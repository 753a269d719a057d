pub mod billing;
pub mod chat;
pub mod drafts;
pub mod leads;
pub mod mailer;
pub mod subscription;
pub mod templates;
