//! Shared test support
//!
//! `ScriptedEngine` records every engine call and plays back scripted
//! results. The certificate helpers mint throwaway keys for real TLS tests.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use securestream::client::{Auth, CertCredentials};
use securestream::engine::{Engine, EngineError, EngineResult, HandshakeParams};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

/// One recorded engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Handshake { host: String, port: u16, auth: Auth },
    Send(Vec<u8>),
    Recv(usize),
    Readable,
    WaitReadable(Duration),
    CloseTransport,
    Teardown(CertCredentials),
    Verify(String, Option<String>),
}

/// Engine double with scripted results
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub calls: Vec<Call>,
    /// Results for successive handshakes; success when empty
    pub handshake_results: VecDeque<EngineResult<()>>,
    /// Decrypted bytes waiting to be read
    pub inbound: VecDeque<u8>,
    /// Bytes accepted by `send`
    pub outbound: Vec<u8>,
    pub readable_error: Option<EngineError>,
    pub wait_error: Option<EngineError>,
    pub recv_error: Option<EngineError>,
    pub send_error: Option<EngineError>,
    /// Largest chunk `send` accepts at once
    pub send_limit: Option<usize>,
    pub fingerprint: Option<String>,
    pub open: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbound(data: &[u8]) -> Self {
        let mut engine = Self::new();
        engine.inbound.extend(data);
        engine
    }

    pub fn fail_handshake(mut self, code: i32) -> Self {
        self.handshake_results
            .push_back(Err(EngineError::new(code, "scripted handshake failure")));
        self
    }

    /// Number of calls matching `pred`
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn handshakes(&self) -> Vec<&Auth> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Handshake { auth, .. } => Some(auth),
                _ => None,
            })
            .collect()
    }

    /// Calls that touch the session's data path
    pub fn io_calls(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                Call::Send(_) | Call::Recv(_) | Call::Readable | Call::WaitReadable(_)
            )
        })
    }
}

impl Engine for ScriptedEngine {
    /// An adopted session is represented by the bytes it still has queued
    type Transport = Vec<u8>;

    fn attach(&mut self, transport: Vec<u8>) -> bool {
        self.inbound.extend(transport);
        self.open = true;
        true
    }

    fn detach(&mut self) -> Option<Vec<u8>> {
        if !self.open {
            return None;
        }
        self.open = false;
        Some(self.inbound.drain(..).collect())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn handshake(&mut self, params: &HandshakeParams<'_>) -> EngineResult<()> {
        self.calls.push(Call::Handshake {
            host: params.host.to_string(),
            port: params.port,
            auth: params.auth.clone(),
        });
        match self.handshake_results.pop_front().unwrap_or(Ok(())) {
            Ok(()) => {
                self.open = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, buf: &[u8]) -> EngineResult<usize> {
        self.calls.push(Call::Send(buf.to_vec()));
        if let Some(e) = self.send_error.take() {
            return Err(e);
        }
        let n = self.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        self.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        self.calls.push(Call::Recv(buf.len()));
        if let Some(e) = self.recv_error.take() {
            return Err(e);
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn readable(&mut self) -> EngineResult<usize> {
        self.calls.push(Call::Readable);
        if let Some(e) = self.readable_error.take() {
            return Err(e);
        }
        Ok(self.inbound.len())
    }

    /// Sleeps out the whole timeout when nothing is queued
    fn wait_readable(&mut self, timeout: Duration) -> EngineResult<bool> {
        self.calls.push(Call::WaitReadable(timeout));
        if let Some(e) = self.wait_error.take() {
            return Err(e);
        }
        if !self.inbound.is_empty() {
            return Ok(true);
        }
        thread::sleep(timeout);
        Ok(false)
    }

    fn close_transport(&mut self) {
        self.calls.push(Call::CloseTransport);
        self.open = false;
    }

    fn teardown(&mut self, credentials: &CertCredentials) {
        self.calls.push(Call::Teardown(credentials.clone()));
    }

    fn verify_fingerprint(&self, fingerprint: &str, _domain: Option<&str>) -> bool {
        self.open && self.fingerprint.as_deref() == Some(fingerprint)
    }

    fn error_text(&self, code: i32) -> String {
        format!("scripted error {}", code)
    }
}

/// A self-signed certificate and its key
pub struct Identity {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Identity {
    /// Self-signed certificate for `host`, also valid for 127.0.0.1
    pub fn self_signed(host: &str) -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, host).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();

        let constraints = BasicConstraints::new().critical().ca().build().unwrap();
        builder.append_extension(constraints).unwrap();
        let san = SubjectAlternativeName::new()
            .dns(host)
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();

        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Identity {
            cert: builder.build(),
            key,
        }
    }

    pub fn cert_pem(&self) -> Vec<u8> {
        self.cert.to_pem().unwrap()
    }

    pub fn key_pem(&self) -> Vec<u8> {
        self.key.private_key_to_pem_pkcs8().unwrap()
    }

    /// Hex SHA-256 of the DER certificate
    pub fn fingerprint(&self) -> String {
        hex::encode(self.cert.digest(MessageDigest::sha256()).unwrap())
    }
}

/// Route log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
