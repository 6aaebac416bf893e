//! HTTP boundary for vanishling.
//!
//! One route, `/`, dispatches on the method: `POST`/`PUT` accept a multipart
//! `file` field with an optional `x-ttl` header and answer with `x-file-id`;
//! `GET` returns the bytes for the `x-file-id` request header. `/ping` and
//! `/health` answer `200`. [`VanishlingServer`] also owns the reaper task.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::{VanishlingConfig, DEFAULT_MAX_UPLOAD_BYTES};
pub use error::{ServerError, ServerResult};
pub use handler::{AppState, FILE_FIELD, FILE_ID_HEADER, TTL_HEADER};
pub use server::VanishlingServer;
