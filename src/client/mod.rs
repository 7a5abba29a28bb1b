pub(crate) mod builder;
pub(crate) mod core;

#[cfg(feature = "blocking")]
pub(crate) mod blocking;

#[cfg(feature = "async")]
pub(crate) mod tokio;

pub use builder::ClientBuilder;

#[cfg(feature = "blocking")]
pub use blocking::Client;

#[cfg(feature = "async")]
pub use self::tokio::AsyncClient;
