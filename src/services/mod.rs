pub mod backend;
pub mod catalog;
pub mod dedup;
pub mod error;
pub mod locks;
pub mod matter_service;
pub mod share_service;
pub mod staging;
