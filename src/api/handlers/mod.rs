//! Route handlers.
//!
//! Credential endpoints (`/login`, `/register`, `/refresh-token`) and the
//! emailed-token endpoints (`/forgot-password`, `/reset-password`, `/verify`)
//! are public.
//! Everything else resolves `Authorization: Bearer <access_token>` first and
//! answers 401 when that fails.

pub mod admin;
pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod password;
pub mod refresh;
pub mod register;
pub mod types;
pub(crate) mod utils;
pub mod verify;
