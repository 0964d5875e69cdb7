//! Client for the Calil library API (<https://calil.jp/doc/api_ref.html>).
//!
//! Two things are offered: searching for library branches by location or
//! system, and checking whether books (by ISBN) are held and lendable in one
//! or more library systems.
//!
//! ```no_run
//! use calil::{CalilClient, Config, LibraryQuery, poll};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let client = CalilClient::from_config(&config)?;
//!
//! let libs = client
//!     .search_libraries(&LibraryQuery::new().prefecture("京都府").city("京都市").limit(10))
//!     .await?;
//! println!("{} libraries", libs.len());
//!
//! let first = client.check_availability("4834000826", "Kyoto_Kyoto").await?;
//! let done = poll::wait_for_completion(&client, first, &poll::PollPolicy::default()).await?;
//! if let Some(status) = done.status("4834000826", "Kyoto_Kyoto") {
//!     for (branch, label, _) in status.branch_states() {
//!         println!("{branch}: {label}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod calil_client;
pub mod config;
pub mod error;
pub mod poll;

pub use calil_client::{
    AvailabilityResult, AvailabilityStatus, CalilClient, CheckStatus, Endpoint, LendingState,
    LibraryBranch, LibraryQuery, unwrap_envelope,
};
pub use config::Config;
pub use error::{CalilError, CalilResult, MalformedReason};
