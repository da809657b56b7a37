//! Multi-tenant Q&A chat widget core.
//!
//! A [`widget::ChatEngine`] holds the shared services (knowledge base, remote
//! Q&A backend, greeting, typing delay). Each embedded widget mounts its own
//! [`widget::ChatWidget`], which owns one session store and drives
//! exchanges through the orchestrator. [`app`] hosts widgets over HTTP and
//! WebSocket.

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod fallback;
pub mod greeting;
pub mod orchestrator;
pub mod resolver;
pub mod session;
pub mod types;
pub mod widget;

pub use backend::{HttpQaBackend, QaBackend};
pub use config::Config;
pub use error::ChatError;
pub use orchestrator::{ChatOrchestrator, PendingReply, TypingDelay, ERROR_REPLY};
pub use resolver::{AnswerResolver, KnowledgeBase};
pub use session::{SessionAction, SessionReducer, SessionStore};
pub use types::{ChatMessage, QaEntry, Sender, SessionEvent, SessionState};
pub use widget::{ChatEngine, ChatWidget};
