pub mod address;
pub mod deal;
pub mod decrypt;
pub mod encrypt;
pub mod init;
pub mod version;

pub use address::Address;
pub use deal::Deal;
pub use decrypt::Decrypt;
pub use encrypt::Encrypt;
pub use init::Init;
pub use version::Version;
