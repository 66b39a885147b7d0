pub mod auth;
pub mod file;

pub use auth::AuthService;
pub use file::FileService;
