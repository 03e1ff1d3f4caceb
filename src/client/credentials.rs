//! Credential slots and authentication modes
//!
//! Each credential kind has its own slot. A slot holds a [`Bytes`] buffer,
//! which is either borrowed static data (`Bytes::from_static`) or a buffer
//! the client owns, such as one filled by a loader. Replacing or dropping a
//! slot releases only that slot's buffer.

use super::{Error, Result};
use bytes::Bytes;
use log::debug;
use std::fmt;
use std::io::Read;

/// Credential kinds that can be loaded from a byte source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    CaCert,
    Certificate,
    PrivateKey,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::CaCert => "CA certificate",
            CredentialKind::Certificate => "client certificate",
            CredentialKind::PrivateKey => "private key",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certificate-mode material, each piece optional
///
/// All three absent means "validate against no pinned CA"; the engine
/// decides what trust that implies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertCredentials {
    pub ca_cert: Option<Bytes>,
    pub client_cert: Option<Bytes>,
    pub client_key: Option<Bytes>,
}

impl CertCredentials {
    /// Client certificate and key, when both are present
    pub fn client_identity(&self) -> Option<(&Bytes, &Bytes)> {
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

/// Pre-shared-key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskCredentials {
    /// Identity sent to the server
    pub identity: Bytes,
    /// Key as hex text
    pub key: Bytes,
}

/// Authentication mode for one connect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Certificate(CertCredentials),
    Psk(PskCredentials),
}

impl Auth {
    pub fn is_psk(&self) -> bool {
        matches!(self, Auth::Psk(_))
    }
}

/// Configured credential slots
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    ca_cert: Option<Bytes>,
    client_cert: Option<Bytes>,
    client_key: Option<Bytes>,
    psk_identity: Option<Bytes>,
    psk_key: Option<Bytes>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ca_cert(&mut self, pem: impl Into<Bytes>) {
        self.ca_cert = Some(pem.into());
    }

    pub fn set_certificate(&mut self, pem: impl Into<Bytes>) {
        self.client_cert = Some(pem.into());
    }

    pub fn set_private_key(&mut self, pem: impl Into<Bytes>) {
        self.client_key = Some(pem.into());
    }

    /// Set PSK identity and hex-encoded key
    pub fn set_pre_shared_key(&mut self, identity: impl Into<Bytes>, key: impl Into<Bytes>) {
        self.psk_identity = Some(identity.into());
        self.psk_key = Some(key.into());
    }

    /// Empty a slot
    pub fn clear(&mut self, kind: CredentialKind) {
        *self.slot_mut(kind) = None;
    }

    pub fn ca_cert(&self) -> Option<&Bytes> {
        self.ca_cert.as_ref()
    }

    pub fn certificate(&self) -> Option<&Bytes> {
        self.client_cert.as_ref()
    }

    pub fn private_key(&self) -> Option<&Bytes> {
        self.client_key.as_ref()
    }

    /// Read exactly `len` bytes from `source` into an owned buffer and
    /// install it in the slot for `kind`.
    ///
    /// A short source is a load failure: nothing is installed and the slot
    /// is left empty.
    pub fn load<R: Read>(&mut self, kind: CredentialKind, source: R, len: usize) -> Result<()> {
        match read_exact_len(source, len) {
            Ok(buf) => {
                debug!("loaded {} ({} bytes)", kind, buf.len());
                *self.slot_mut(kind) = Some(buf);
                Ok(())
            }
            Err(e) => {
                self.clear(kind);
                Err(match e {
                    LoadFailure::Short(read) => Error::CredentialLoad {
                        kind,
                        expected: len,
                        read,
                    },
                    LoadFailure::Io(e) => Error::Io(e),
                })
            }
        }
    }

    /// Certificate-mode view of the slots
    pub fn cert(&self) -> CertCredentials {
        CertCredentials {
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
        }
    }

    /// PSK view of the slots, when both identity and key are set
    pub fn psk(&self) -> Option<PskCredentials> {
        match (&self.psk_identity, &self.psk_key) {
            (Some(identity), Some(key)) => Some(PskCredentials {
                identity: identity.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }

    /// Pick the mode for a connect attempt. PSK wins when fully configured.
    pub fn select(&self) -> Auth {
        match self.psk() {
            Some(psk) => Auth::Psk(psk),
            None => Auth::Certificate(self.cert()),
        }
    }

    fn slot_mut(&mut self, kind: CredentialKind) -> &mut Option<Bytes> {
        match kind {
            CredentialKind::CaCert => &mut self.ca_cert,
            CredentialKind::Certificate => &mut self.client_cert,
            CredentialKind::PrivateKey => &mut self.client_key,
        }
    }
}

enum LoadFailure {
    Short(usize),
    Io(std::io::Error),
}

fn read_exact_len<R: Read>(source: R, len: usize) -> std::result::Result<Bytes, LoadFailure> {
    let mut buf = Vec::with_capacity(len);
    let read = source
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(LoadFailure::Io)?;

    if read != len {
        return Err(LoadFailure::Short(read));
    }

    Ok(Bytes::from(buf))
}
