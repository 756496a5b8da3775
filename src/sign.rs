//! Package signing.
//!
//! Signing happens after every other part has been written. The packager
//! hashes what it wrote into an [`AppxDigests`] blob and hands it to a
//! [`Signer`], which returns an opaque PKCS#7 signature. That signature is
//! stored, prefixed with `PKCX`, as the `AppxSignature.p7x` part.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Name of the signature part
pub const SIGNATURE_PART: &str = "AppxSignature.p7x";

/// Magic prefix of the signature part's content
pub const P7X_MAGIC: &[u8; 4] = b"PKCX";

pub type Digest = [u8; 32];

/// The SHA-256 digests an APPX signature covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppxDigests {
    /// Local file records (headers and data)
    pub axpc: Digest,
    /// Central directory and end records, without the signature entry
    pub axcd: Digest,
    /// `[Content_Types].xml`, uncompressed
    pub axct: Digest,
    /// `AppxBlockMap.xml`, uncompressed
    pub axbm: Digest,
    /// Code integrity catalog; always zero, no catalog is produced
    pub axci: Digest,
}

impl AppxDigests {
    /// Serialized form: `APPX` followed by tagged digests.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 5 * (4 + 32));
        out.extend_from_slice(b"APPX");
        for (tag, digest) in [
            (b"AXPC", &self.axpc),
            (b"AXCD", &self.axcd),
            (b"AXCT", &self.axct),
            (b"AXBM", &self.axbm),
            (b"AXCI", &self.axci),
        ] {
            out.extend_from_slice(tag);
            out.extend_from_slice(digest);
        }
        out
    }
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("signer produced an empty signature")]
    Empty,
}

/// Produces a detached PKCS#7 signature over the digest blob.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, digests: &AppxDigests) -> Result<Vec<u8>, SignError>;
}

/// Signs by piping the digest blob through `openssl cms`.
///
/// The certificate file must be a PEM containing both the certificate and
/// its private key.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: PathBuf,
    certificate: PathBuf,
}

impl CommandSigner {
    pub fn new(program: impl Into<PathBuf>, certificate: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            certificate: certificate.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["cms", "-sign", "-binary", "-nodetach", "-outform", "DER", "-md", "sha256"])
            .arg("-signer")
            .arg(&self.certificate)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl Signer for CommandSigner {
    async fn sign(&self, digests: &AppxDigests) -> Result<Vec<u8>, SignError> {
        let program = self.program.display().to_string();
        let spawn_error = |source| SignError::Spawn {
            program: program.clone(),
            source,
        };

        debug!(program = %program, certificate = %self.certificate.display(), "signing package");
        let mut child = self.command().spawn().map_err(spawn_error)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&digests.to_bytes()).await.map_err(spawn_error)?;
            // Dropping stdin closes the pipe so the signer sees EOF
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            return Err(SignError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(SignError::Empty);
        }
        Ok(output.stdout)
    }
}

/// Content of the signature part for `signature`.
pub fn p7x_content(signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(P7X_MAGIC.len() + signature.len());
    out.extend_from_slice(P7X_MAGIC);
    out.extend_from_slice(signature);
    out
}
