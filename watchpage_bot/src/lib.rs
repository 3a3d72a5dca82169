//! A Telegram bot that turns videos sent by its operators into published
//! watch pages: stored assets, an entry in a JSON index, and two HTML pages.

/// Loading `watchpage_bot.toml`.
pub mod config;

/// Retries with backoff, and polling.
pub mod retry;

/// S3-compatible object storage, plus a directory stand-in.
pub mod storage;

/// Title pool and blur, changeable from the chat.
pub mod settings;

/// The video index and its records.
pub mod index;

/// Frames, thumbnails and blurring.
pub mod media;

/// Downloads and remote video hosts.
pub mod fetch;

/// Rendering and publishing the watch pages.
pub mod publish;

/// Everything a request goes through, start to end.
pub mod pipeline;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
