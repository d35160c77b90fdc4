//! # datadoc-bot
//!
//! A chat assistant that answers questions about a fixed set of
//! data-analytics documents (KPI definitions, funnels, SQL guidance).
//!
//! Each question picks the single most relevant document by keyword
//! scoring, and that document's text, the session's recent history and the
//! question are sent to an OpenAI-compatible chat-completion API.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ DocumentStore │──▶│ QueryAnalyzer│──▶│ prompt       │
//! │ docx/md/txt   │   │ keyword score│   │ excerpt+hist │
//! └───────────────┘   └──────────────┘   └──────┬───────┘
//!                                               ▼
//!  ┌───────────────────┐   ┌─────────────┐   ┌──────────────────┐
//!  │ ConversationStore │◀──│ ChatService │──▶│ CompletionClient │
//!  │ per-session turns │   └──────▲──────┘   └──────────────────┘
//!  └───────────────────┘          │
//!                          ┌──────┴──────┐
//!                          │ HTTP / CLI  │
//!                          └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text, heading and table extraction from `.docx`, `.md`, `.txt` |
//! | [`documents`] | Document loading at startup |
//! | [`analyzer`] | Keyword scoring and document selection |
//! | [`conversation`] | Per-session history |
//! | [`sql`] | SQL extraction and clause analysis |
//! | [`prompt`] | Chat-completion message composition |
//! | [`completion`] | Completion client trait and OpenAI implementation |
//! | [`chat`] | Question answering |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |

pub mod analyzer;
pub mod chat;
pub mod commands;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod documents;
pub mod extract;
pub mod models;
pub mod prompt;
pub mod server;
pub mod sql;
