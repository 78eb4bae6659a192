//! # coincast-shared
//!
//! Types shared between the Coincast hub server and its clients: id
//! newtypes, the JSON wire protocol for the realtime endpoint, auth-token
//! verification, and project-wide constants.

pub mod auth;
pub mod constants;
pub mod protocol;
pub mod types;
