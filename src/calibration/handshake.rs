//! TLS 1.3 ClientHello construction and ServerHello parsing for probes.
//!
//! Probes only need the server's first flight: everything after ServerHello
//! is encrypted in TLS 1.3, so the handshake is never completed.

use bytes::{BufMut, BytesMut};

use crate::crypto::{self, SecureRandom};
use crate::error::{Error, Result};

/// TLS record header length
pub(crate) const RECORD_HEADER_LEN: usize = 5;

/// Largest record a peer may send (2^14 plus expansion)
pub(crate) const MAX_RECORD_LEN: usize = 16384 + 256;

/// TLS record types
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContentType {
    /// Alert record
    Alert = 21,
    /// Handshake record
    Handshake = 22,
}

/// TLS handshake types
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HandshakeType {
    /// client_hello
    ClientHello = 1,
    /// server_hello
    ServerHello = 2,
}

/// TLS extension types
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExtensionType {
    /// server_name
    ServerName = 0,
    /// supported_groups
    SupportedGroups = 10,
    /// signature_algorithms
    SignatureAlgorithms = 13,
    /// application_layer_protocol_negotiation
    ApplicationLayerProtocolNegotiation = 16,
    /// supported_versions
    SupportedVersions = 43,
    /// psk_key_exchange_modes
    PskKeyExchangeModes = 45,
    /// key_share
    KeyShare = 51,
}

const TLS13: u16 = 0x0304;
const TLS12: u16 = 0x0303;
const GROUP_X25519: u16 = 0x001d;

/// Cipher suites offered by the probe, browser order.
const OFFERED_CIPHER_SUITES: &[u16] = &[
    0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8,
];

const OFFERED_GROUPS: &[u16] = &[GROUP_X25519, 0x0017, 0x0018];

const OFFERED_SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
];

/// Builder for the probe's ClientHello.
pub struct ClientHelloBuilder {
    /// Server name indication (SNI)
    sni: String,
    /// ALPN protocols to advertise
    alpn: Vec<String>,
    /// X25519 key share
    key_share: [u8; 32],
}

impl ClientHelloBuilder {
    /// Create a builder with a fresh X25519 key share.
    pub fn new(sni: impl Into<String>, alpn: Vec<String>) -> Self {
        Self {
            sni: sni.into(),
            alpn,
            key_share: crypto::key_share(),
        }
    }

    /// Build the full ClientHello record.
    pub fn build(&self) -> Vec<u8> {
        let mut client_random = [0u8; 32];
        SecureRandom::fill(&mut client_random);
        // Non-empty legacy session ID, as middlebox-compatible clients send
        let session_id: [u8; 32] = SecureRandom::bytes();

        let handshake_body = self.build_client_hello_body(&client_random, &session_id);

        let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + handshake_body.len());
        buf.put_u8(ContentType::Handshake as u8);
        buf.put_u16(0x0301); // record version, as browsers send it
        buf.put_u16(handshake_body.len() as u16);
        buf.put_slice(&handshake_body);

        buf.to_vec()
    }

    fn build_client_hello_body(&self, client_random: &[u8; 32], session_id: &[u8; 32]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(512);

        buf.put_u8(HandshakeType::ClientHello as u8);
        let length_pos = buf.len();
        buf.put_slice(&[0, 0, 0]); // 3-byte length placeholder

        buf.put_u16(TLS12); // legacy version
        buf.put_slice(client_random);

        buf.put_u8(session_id.len() as u8);
        buf.put_slice(session_id);

        buf.put_u16((OFFERED_CIPHER_SUITES.len() * 2) as u16);
        for suite in OFFERED_CIPHER_SUITES {
            buf.put_u16(*suite);
        }

        // Compression methods (null only)
        buf.put_u8(1);
        buf.put_u8(0);

        let extensions = self.build_extensions();
        buf.put_u16(extensions.len() as u16);
        buf.put_slice(&extensions);

        let total_len = buf.len() - 4;
        buf[length_pos] = ((total_len >> 16) & 0xff) as u8;
        buf[length_pos + 1] = ((total_len >> 8) & 0xff) as u8;
        buf[length_pos + 2] = (total_len & 0xff) as u8;

        buf.to_vec()
    }

    fn build_extensions(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(256);

        self.write_sni_extension(&mut buf);
        write_u16_list(&mut buf, ExtensionType::SupportedGroups, OFFERED_GROUPS);
        write_u16_list(&mut buf, ExtensionType::SignatureAlgorithms, OFFERED_SIGNATURE_ALGORITHMS);
        if !self.alpn.is_empty() {
            self.write_alpn_extension(&mut buf);
        }
        write_supported_versions(&mut buf);
        write_psk_modes(&mut buf);
        self.write_key_share(&mut buf);

        buf.to_vec()
    }

    fn write_sni_extension(&self, buf: &mut BytesMut) {
        let sni_bytes = self.sni.as_bytes();
        let list_len = 3 + sni_bytes.len(); // type(1) + len(2) + name

        buf.put_u16(ExtensionType::ServerName as u16);
        buf.put_u16((2 + list_len) as u16);
        buf.put_u16(list_len as u16);
        buf.put_u8(0); // host_name
        buf.put_u16(sni_bytes.len() as u16);
        buf.put_slice(sni_bytes);
    }

    fn write_alpn_extension(&self, buf: &mut BytesMut) {
        let mut alpn_list = Vec::new();
        for proto in &self.alpn {
            alpn_list.push(proto.len() as u8);
            alpn_list.extend_from_slice(proto.as_bytes());
        }

        buf.put_u16(ExtensionType::ApplicationLayerProtocolNegotiation as u16);
        buf.put_u16((2 + alpn_list.len()) as u16);
        buf.put_u16(alpn_list.len() as u16);
        buf.put_slice(&alpn_list);
    }

    fn write_key_share(&self, buf: &mut BytesMut) {
        let entry_len = 2 + 2 + self.key_share.len(); // group(2) + len(2) + key

        buf.put_u16(ExtensionType::KeyShare as u16);
        buf.put_u16((2 + entry_len) as u16);
        buf.put_u16(entry_len as u16);
        buf.put_u16(GROUP_X25519);
        buf.put_u16(self.key_share.len() as u16);
        buf.put_slice(&self.key_share);
    }
}

fn write_u16_list(buf: &mut BytesMut, ext: ExtensionType, items: &[u16]) {
    let list_len = items.len() * 2;
    buf.put_u16(ext as u16);
    buf.put_u16((2 + list_len) as u16);
    buf.put_u16(list_len as u16);
    for item in items {
        buf.put_u16(*item);
    }
}

fn write_supported_versions(buf: &mut BytesMut) {
    buf.put_u16(ExtensionType::SupportedVersions as u16);
    buf.put_u16(5); // extension length
    buf.put_u8(4); // list length
    buf.put_u16(TLS13);
    buf.put_u16(TLS12);
}

fn write_psk_modes(buf: &mut BytesMut) {
    buf.put_u16(ExtensionType::PskKeyExchangeModes as u16);
    buf.put_u16(2);
    buf.put_u8(1);
    buf.put_u8(1); // psk_dhe_ke
}

/// Parsed ServerHello message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedServerHello {
    /// Version from the ServerHello body
    pub legacy_version: u16,
    /// Version selected through supported_versions, if any
    pub selected_version: Option<u16>,
    /// Selected cipher suite
    pub cipher_suite: u16,
    /// Extension types in the order the server sent them
    pub extensions: Vec<u16>,
    /// Key share group the server answered with
    pub key_share_group: Option<u16>,
}

impl ParsedServerHello {
    /// Negotiated protocol version.
    pub fn version(&self) -> u16 {
        self.selected_version.unwrap_or(self.legacy_version)
    }
}

fn truncated(what: &str) -> Error {
    Error::probe(format!("ServerHello truncated in {what}"))
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]))
}

/// Parser for TLS ServerHello messages.
pub struct ServerHelloParser;

impl ServerHelloParser {
    /// Length of the first complete record in `data`, if one is buffered.
    pub fn record_len(data: &[u8]) -> Option<usize> {
        let len = usize::from(read_u16(data, 3)?);
        let total = RECORD_HEADER_LEN + len;
        (data.len() >= total).then_some(total)
    }

    /// Parse a ServerHello record.
    pub fn parse(data: &[u8]) -> Result<ParsedServerHello> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(truncated("record header"));
        }

        match data[0] {
            t if t == ContentType::Handshake as u8 => {}
            t if t == ContentType::Alert as u8 => {
                let description = data.get(RECORD_HEADER_LEN + 1).copied().unwrap_or(0);
                return Err(Error::probe(format!("server sent alert {description}")));
            }
            other => return Err(Error::probe(format!("unexpected record type {other}"))),
        }

        let record_len = usize::from(read_u16(data, 3).ok_or_else(|| truncated("record header"))?);
        if record_len > MAX_RECORD_LEN {
            return Err(Error::probe("record too large"));
        }
        let handshake = data
            .get(RECORD_HEADER_LEN..RECORD_HEADER_LEN + record_len)
            .ok_or_else(|| truncated("record"))?;

        if handshake.first() != Some(&(HandshakeType::ServerHello as u8)) {
            return Err(Error::probe("not a ServerHello"));
        }
        if handshake.len() < 4 {
            return Err(truncated("handshake header"));
        }
        let handshake_len = ((handshake[1] as usize) << 16)
            | ((handshake[2] as usize) << 8)
            | (handshake[3] as usize);
        let body = handshake
            .get(4..4 + handshake_len)
            .ok_or_else(|| truncated("handshake"))?;

        let legacy_version = read_u16(body, 0).ok_or_else(|| truncated("version"))?;
        // version(2) + random(32)
        let session_id_len = usize::from(*body.get(34).ok_or_else(|| truncated("session id"))?);
        let mut pos = 35 + session_id_len;

        let cipher_suite = read_u16(body, pos).ok_or_else(|| truncated("cipher suite"))?;
        pos += 3; // cipher suite + compression method

        let mut extensions = Vec::new();
        let mut selected_version = None;
        let mut key_share_group = None;

        if let Some(extensions_len) = read_u16(body, pos) {
            pos += 2;
            let extensions_end = pos + usize::from(extensions_len);
            if extensions_end > body.len() {
                return Err(truncated("extensions"));
            }

            while pos + 4 <= extensions_end {
                let ext_type = read_u16(body, pos).ok_or_else(|| truncated("extension"))?;
                let ext_len =
                    usize::from(read_u16(body, pos + 2).ok_or_else(|| truncated("extension"))?);
                pos += 4;
                if pos + ext_len > extensions_end {
                    return Err(truncated("extension body"));
                }

                if ext_type == ExtensionType::SupportedVersions as u16 && ext_len == 2 {
                    selected_version = read_u16(body, pos);
                } else if ext_type == ExtensionType::KeyShare as u16 && ext_len >= 2 {
                    key_share_group = read_u16(body, pos);
                }

                extensions.push(ext_type);
                pos += ext_len;
            }
        }

        Ok(ParsedServerHello {
            legacy_version,
            selected_version,
            cipher_suite,
            extensions,
            key_share_group,
        })
    }
}

/// Protocol version label.
pub fn version_name(version: u16) -> String {
    match version {
        0x0304 => "TLS 1.3".into(),
        0x0303 => "TLS 1.2".into(),
        0x0302 => "TLS 1.1".into(),
        0x0301 => "TLS 1.0".into(),
        other => format!("0x{other:04x}"),
    }
}

/// IANA cipher suite name.
pub fn cipher_suite_name(suite: u16) -> String {
    let name = match suite {
        0x1301 => "TLS_AES_128_GCM_SHA256",
        0x1302 => "TLS_AES_256_GCM_SHA384",
        0x1303 => "TLS_CHACHA20_POLY1305_SHA256",
        0x1304 => "TLS_AES_128_CCM_SHA256",
        0xc02b => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        0xc02f => "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        0xc02c => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        0xc030 => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        0xcca9 => "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        0xcca8 => "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        other => return format!("0x{other:04x}"),
    };
    name.into()
}

/// Extension name as used in templates.
pub fn extension_name(ext: u16) -> String {
    let name = match ext {
        0 => "server_name",
        5 => "status_request",
        10 => "supported_groups",
        11 => "ec_point_formats",
        13 => "signature_algorithms",
        16 => "alpn",
        18 => "signed_certificate_timestamp",
        23 => "extended_master_secret",
        35 => "session_ticket",
        41 => "pre_shared_key",
        43 => "supported_versions",
        45 => "psk_key_exchange_modes",
        51 => "key_share",
        0xff01 => "renegotiation_info",
        other => return format!("0x{other:04x}"),
    };
    name.into()
}

/// Named group label.
pub fn group_name(group: u16) -> String {
    let name = match group {
        0x001d => "x25519",
        0x0017 => "secp256r1",
        0x0018 => "secp384r1",
        0x0019 => "secp521r1",
        other => return format!("0x{other:04x}"),
    };
    name.into()
}
