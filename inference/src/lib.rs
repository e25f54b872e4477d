//! HTTP client to the local model-inference daemon. Speaks the
//! Ollama-compatible wire protocol (`/api/version`, `/api/tags`,
//! `/api/show`, `/api/generate`) over `reqwest`, with a retry/backoff
//! discipline for streaming and non-streaming calls alike.

pub mod client;
pub mod error;

pub use client::DEFAULT_SAFETY_FACTOR;
pub use client::InferenceClient;
pub use client::InferenceOptions;
pub use client::InferenceOutcome;
pub use client::ResponseFormat;
pub use error::InferenceErr;
pub use error::Result;
