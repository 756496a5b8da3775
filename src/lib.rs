//! # appx
//!
//! Assembles APPX packages: ZIP archives holding a set of files together with
//! the generated `[Content_Types].xml` and `AppxBlockMap.xml` parts and,
//! optionally, an `AppxSignature.p7x` signature.
//!
//! ## Features
//!
//! - Inputs as bare files, directory trees, `dest=src` pairs or a mapping file
//! - Byte-exact escaping of ZIP entry names, XML attributes and extensions
//! - Stored or deflated entries with per-block hashes in the block map
//! - ZIP64 end records, as required by the Windows package loader
//! - Signing through a pluggable [`Signer`], with an `openssl` based default
//!
//! ## Example
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use appx::{InputSpec, PackageOptions, create_package};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let inputs = [
//!         InputSpec::Path(PathBuf::from("build")),
//!         InputSpec::from_arg("Assets/logo.png=art/logo.png"),
//!     ];
//!     let options = PackageOptions {
//!         compression_level: 9,
//!         ..Default::default()
//!     };
//!     let summary = create_package(Path::new("app.appx"), &inputs, &options).await?;
//!     println!("{} files", summary.files);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod encode;
pub mod error;
pub mod input;
pub mod io;
pub mod manifest;
pub mod mapping;
pub mod package;
pub mod sign;
pub mod zip;

pub use cli::Cli;
pub use error::{AppxError, MalformedMappingFile, Result};
pub use input::{Entry, InputSpec};
pub use io::{LocalFileReader, ReadAt};
pub use package::{PackageOptions, PackageSummary, create_package, write_package};
pub use sign::{AppxDigests, CommandSigner, SignError, Signer};
pub use zip::{PackageReader, ZipFileEntry};
