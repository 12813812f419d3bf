// Vailix: a privacy-preserving proximity-tracing core.
//
// The library is organized around the identity/storage/network pipeline a
// device-side SDK and a report/serve server both need:
//
// * **Identity**: derives rotating proximity identifiers and per-identifier
//   metadata keys from a single master secret.
// * **Codec**: the compact binary wire format and QR payload encoding used
//   to exchange identifiers out of band.
// * **Crypto**: authenticated encryption of free-form metadata under a
//   per-identifier key.
// * **Store**: the encrypted local record of identifiers observed nearby.
// * **Net / Report / Matcher**: the client-side pipeline that submits
//   reports and downloads+matches against what other devices reported.
// * **Server**: the ingest/serve HTTP API that reported identifiers flow
//   through.
// * **Sdk**: process-wide lifecycle management tying the above together
//   behind a single idempotent entry point.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod matcher;
pub mod net;
pub mod report;
pub mod sdk;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{Result, VailixError};
pub use types::{ContactRecord, DownloadRecord, Match, Rpi};
