use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::input::InputSpec;
use crate::package::PackageOptions;
use crate::sign::{CommandSigner, Signer};

/// Level flags override one another, so the last one given wins
const LEVEL_FLAGS: [&str; 10] = [
    "store", "level1", "level2", "level3", "level4", "level5", "level6", "level7", "level8", "level9",
];

#[derive(Parser, Debug)]
#[command(name = "appx")]
#[command(version)]
#[command(about = "Creates optionally-signed APPX packages", long_about = None)]
#[command(after_help = "Examples:\n  \
  appx -o app.appx build/              package every file below build/\n  \
  appx -o app.appx -9 Assets/logo.png=logo.png   store logo.png as Assets/logo.png\n  \
  appx -o app.appx -f mapping.txt      package the files listed in mapping.txt")]
pub struct Cli {
    /// Package to create
    #[arg(short = 'o', value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Inputs: files, directories or DEST=SRC pairs
    #[arg(value_name = "INPUT", conflicts_with = "mapping")]
    pub inputs: Vec<String>,

    /// Read inputs from a mapping file ("-" for stdin)
    #[arg(short = 'f', value_name = "FILE")]
    pub mapping: Option<PathBuf>,

    /// Sign with a PEM file holding the certificate and private key
    #[arg(short = 'c', value_name = "CERT")]
    pub certificate: Option<PathBuf>,

    /// Program used to produce signatures
    #[arg(long = "openssl", value_name = "PROGRAM", default_value = "openssl")]
    pub openssl: PathBuf,

    /// Store files without compression (default)
    #[arg(short = '0', overrides_with_all = LEVEL_FLAGS)]
    pub store: bool,
    /// Compress faster
    #[arg(short = '1', overrides_with_all = LEVEL_FLAGS)]
    pub level1: bool,
    #[arg(short = '2', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level2: bool,
    #[arg(short = '3', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level3: bool,
    #[arg(short = '4', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level4: bool,
    #[arg(short = '5', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level5: bool,
    #[arg(short = '6', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level6: bool,
    #[arg(short = '7', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level7: bool,
    #[arg(short = '8', hide = true, overrides_with_all = LEVEL_FLAGS)]
    pub level8: bool,
    /// Compress better
    #[arg(short = '9', overrides_with_all = LEVEL_FLAGS)]
    pub level9: bool,

    /// More logging (-vv => debug)
    #[arg(short = 'v', action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Errors only
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    /// The last compression level given, 0 when none was given
    pub fn compression_level(&self) -> u32 {
        [
            self.store,
            self.level1,
            self.level2,
            self.level3,
            self.level4,
            self.level5,
            self.level6,
            self.level7,
            self.level8,
            self.level9,
        ]
        .iter()
        .position(|&set| set)
        .unwrap_or(0) as u32
    }

    pub fn input_specs(&self) -> Vec<InputSpec> {
        match &self.mapping {
            Some(mapping) => vec![InputSpec::MappingFile(mapping.clone())],
            None => self.inputs.iter().map(|arg| InputSpec::from_arg(arg)).collect(),
        }
    }

    pub fn package_options(&self) -> PackageOptions {
        PackageOptions {
            compression_level: self.compression_level(),
            signer: self.certificate.as_ref().map(|certificate| {
                Arc::new(CommandSigner::new(&self.openssl, certificate)) as Arc<dyn Signer>
            }),
        }
    }

    /// Default log filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (q, _) if q > 0 => "error",
            (_, 0) => "warn",
            (_, 1) => "info",
            _ => "debug",
        }
    }
}
