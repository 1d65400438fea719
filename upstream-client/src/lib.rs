pub mod accounts;
pub mod assets;
pub mod auth;
pub mod client;
pub mod upload;

pub use accounts::{Account, AccountListing};
pub use assets::{AssetQuery, FilterMode};
pub use auth::Credentials;
pub use client::UmbrellaClient;
pub use upload::{ImportStatus, PresignedUpload, UploadMode};
