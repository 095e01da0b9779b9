//! HTTP front end for Trellis.
//!
//! `GET /` composes the demo page on the blocking pool, renders it with
//! hydration and keeps its callbacks so a later `POST /callback/{id}` can run
//! them. Callback replies are small JSON objects telling the client what to
//! do next.

pub mod config;
pub mod error;
pub mod page;
pub mod routes;

pub use config::ServerConfig;
pub use error::ServerError;
pub use routes::{router, AppState, CallbackReply};
