//! A client for managing forms, sequences, tags and subscribers through the
//! ConvertKit v3 API.
//!
//! ## Example
//!
//! ```no_run
//! use convertkit_client::{Client, Credentials, EmailChange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(Credentials::new("api-key", "api-secret"))?;
//!
//!     match client
//!         .change_email_of_subscriber("old@example.com", "new@example.com")
//!         .await?
//!     {
//!         EmailChange::Renamed(res) => println!("Renamed subscriber {}", res.subscriber.id),
//!         EmailChange::Merged { replayed_tags, .. } => {
//!             println!("Merged into an existing subscriber, {} tags moved", replayed_tags.len())
//!         }
//!         EmailChange::Unchanged(_) => println!("Both emails already belong to the same subscriber"),
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod models;

pub use client::{decode, Client, ClientBuilder, EmailChange};
pub use error::Error;
pub use models::{Credentials, Fields};
