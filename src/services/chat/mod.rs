//! Conversation Engine: the scripted chatbot questionnaire.

pub mod format;
pub mod pacing;
pub mod protocol;
pub mod recommend;
pub mod session;
pub mod steps;

pub use recommend::recommend_plan;
pub use session::{Advance, CompletedConversation, ConversationSession, SessionError};
