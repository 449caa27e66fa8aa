//! Remote catch API
//!
//! The queue only ever talks to one collaborator: the catch-creation
//! endpoint. [`CatchEndpoint`] is the seam; [`CatchClient`] is the HTTP
//! implementation and tests plug in scripted doubles.
//!
//! ## Configuration
//!
//! ```toml
//! [api]
//! server_url = "https://api.example.com"
//! api_token = "eyJhbGciOi..."
//! timeout_secs = 15
//! ```

mod client;
mod endpoint;

pub use client::CatchClient;
pub use endpoint::{CatchEndpoint, ConnectivityProbe, SubmitError, SubmitErrorKind};
