//! Client side of a surgical-video AI review assistant.
//!
//! The user walks a fixed four-stage flow (choose an expert, upload a video
//! with case details, wait for the analysis, chat with the expert). The
//! [`router`] owns the persisted session record and gates every stage
//! transition; the [`chat`] client streams the expert's answers and renders
//! them through [`markdown`].

pub mod analysis;
pub mod app;
pub mod catalog;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod markdown;
pub mod persona;
pub mod router;
pub mod session;
pub mod storage;
pub mod stream;
pub mod upload;
pub mod url;

pub use app::App;
pub use chat::{ChatClient, ChatUpdate, TurnOutcome};
pub use config::AppConfig;
pub use error::ReviewError;
pub use router::{Router, Stage};
pub use session::{PageKey, PageValue, SessionRecord};
pub use storage::{FileStore, MemoryStore, SessionStore};
