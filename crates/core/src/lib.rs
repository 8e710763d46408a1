pub mod controller;
pub mod documents;
pub mod error;
pub mod llm_client;
pub mod openai_http;
pub mod prompts;
pub mod session;
pub mod speech;
pub mod store;
pub mod trigger;
pub mod turn_engine;

pub use controller::{AnswerOutcome, CreateSession, SessionController};
pub use error::{SessionError, SessionResult};
pub use session::{Answer, Session, SessionStatus};
