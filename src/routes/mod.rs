//! HTTP route handlers outside the authentication core.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive
//! an OpenAPI document automatically; the session operations themselves
//! live in `crate::auth::routes`.

pub mod health;
