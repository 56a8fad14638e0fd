//! Rust SDK for chat-guard
//!
//! ```rust,no_run
//! use chat_guard_sdk::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("http://localhost:5000")?.with_token("eyJ...");
//!
//!     for chat in client.chats().list().await? {
//!         println!("{} ({})", chat.title, chat.id);
//!     }
//!
//!     // Retries on 409 while another session is generating in this chat.
//!     let exchange = client.chats().send_message("chat-id", "Hello!").await?;
//!     println!("{}", exchange.assistant_message.content);
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod retry;
pub mod types;

#[cfg(feature = "http-client")]
pub mod client;

// Re-exports
pub use error::Error;
pub use retry::RetryPolicy;
pub use types::*;

#[cfg(feature = "http-client")]
pub use client::Client;
