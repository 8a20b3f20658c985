pub mod libraries;
pub mod media;
pub mod users;
