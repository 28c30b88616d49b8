//! Core data models for the upload gateway.
//!
//! Records describe stored uploads; the bytes themselves live on disk under
//! server-generated names.

pub mod file_record;
