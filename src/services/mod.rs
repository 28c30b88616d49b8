pub mod registry;
pub mod signature;
pub mod upload_service;
