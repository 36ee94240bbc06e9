//! Portable backup archives of one or more profiles.
//!
//! An archive is a single JSON document:
//!
//! ```json
//! {
//!   "format": "ccswap-archive",
//!   "version": 1,
//!   "created_at": "2024-01-15T10:30:45Z",
//!   "encryption": { "scheme": "aes-256-gcm", "salt": "…", "nonce": "…",
//!                   "kdf": { "algorithm": "argon2id", "memory_kib": 19456,
//!                            "iterations": 2, "parallelism": 1 } },
//!   "payload": "<base64>"
//! }
//! ```
//!
//! The payload is gzip of `{"entries":[{"name":…,"content":…}]}` with entries
//! sorted by name, AES-256-GCM encrypted under an Argon2id-derived key when a
//! password is given (`"encryption": {"scheme": "none"}` otherwise). The header
//! only carries what is needed to repeat the derivation, never secret material,
//! and is bound to the ciphertext as associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, SubsecRound, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::profiles::{Profile, ProfileName, validate_profile_name};

pub const ARCHIVE_FORMAT: &str = "ccswap-archive";
pub const ARCHIVE_VERSION: u32 = 1;

/// Decompressed payloads larger than this are rejected
pub const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

// Upper bounds accepted from an archive header, so a crafted file cannot make
// the key derivation allocate or spin without limit.
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    fn derive_key(&self, password: &str, salt: &[u8]) -> std::result::Result<[u8; KEY_LEN], String> {
        if self.memory_kib > MAX_MEMORY_KIB
            || self.iterations > MAX_ITERATIONS
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(format!("kdf parameters out of range: {:?}", self));
        }
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| e.to_string())?;

        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| e.to_string())?;
        Ok(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    Argon2id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kdf {
    pub algorithm: KdfAlgorithm,
    #[serde(flatten)]
    pub params: KdfParams,
}

/// How the payload is protected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme")]
pub enum Encryption {
    #[serde(rename = "none")]
    Plain,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm {
        #[serde(with = "b64")]
        salt: Vec<u8>,
        #[serde(with = "b64")]
        nonce: Vec<u8>,
        kdf: Kdf,
    },
}

impl Encryption {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub format: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub encryption: Encryption,
}

impl ArchiveHeader {
    /// Every header field in a fixed form, bound to the ciphertext so any
    /// header edit makes decryption fail
    fn associated_data(&self) -> Vec<u8> {
        let encryption = match &self.encryption {
            Encryption::Plain => "none".to_string(),
            Encryption::Aes256Gcm { salt, nonce, kdf } => format!(
                "aes-256-gcm/{}/{}/{:?}/m{}/t{}/p{}",
                hex::encode(salt),
                hex::encode(nonce),
                kdf.algorithm,
                kdf.params.memory_kib,
                kdf.params.iterations,
                kdf.params.parallelism
            ),
        };
        format!(
            "{}/v{}/{}/{}",
            self.format,
            self.version,
            self.created_at.timestamp(),
            encryption
        )
        .into_bytes()
    }
}

#[derive(Serialize, Deserialize)]
struct ArchiveFile {
    #[serde(flatten)]
    header: ArchiveHeader,
    #[serde(with = "b64")]
    payload: Vec<u8>,
}

/// One profile inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: ProfileName,
    pub content: Vec<u8>,
}

impl From<Profile> for ArchiveEntry {
    fn from(profile: Profile) -> Self {
        Self {
            name: profile.name,
            content: profile.content,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EntryRecord {
    name: String,
    content: String,
}

#[derive(Serialize, Deserialize)]
struct EntryList {
    entries: Vec<EntryRecord>,
}

/// A decoded archive
#[derive(Debug, Clone)]
pub struct Archive {
    pub header: ArchiveHeader,
    pub entries: Vec<ArchiveEntry>,
}

/// Encodes and decodes archives
#[derive(Debug, Clone, Default)]
pub struct ArchiveCodec {
    kdf: KdfParams,
}

impl ArchiveCodec {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Serialize `entries` into archive bytes, encrypting when `password` is set
    pub fn export(&self, entries: &[ArchiveEntry], password: Option<&str>) -> Result<Vec<u8>> {
        let plain = compress(&serialize_entries(entries)?)?;
        let created_at = Utc::now().trunc_subsecs(0);

        let (header, payload) = match password {
            None => (
                ArchiveHeader {
                    format: ARCHIVE_FORMAT.to_string(),
                    version: ARCHIVE_VERSION,
                    created_at,
                    encryption: Encryption::Plain,
                },
                plain,
            ),
            Some(password) => {
                let mut salt = vec![0u8; SALT_LEN];
                let mut nonce = vec![0u8; NONCE_LEN];
                OsRng.fill_bytes(&mut salt);
                OsRng.fill_bytes(&mut nonce);

                let key = self.kdf.derive_key(password, &salt).map_err(|e| {
                    Error::invalid_content("config.json", format!("kdf: {}", e))
                })?;
                let header = ArchiveHeader {
                    format: ARCHIVE_FORMAT.to_string(),
                    version: ARCHIVE_VERSION,
                    created_at,
                    encryption: Encryption::Aes256Gcm {
                        salt,
                        nonce: nonce.clone(),
                        kdf: Kdf {
                            algorithm: KdfAlgorithm::Argon2id,
                            params: self.kdf,
                        },
                    },
                };

                let cipher = Aes256Gcm::new_from_slice(&key)
                    .map_err(|e| Error::InvalidArchive(e.to_string()))?;
                let aad = header.associated_data();
                let sealed = cipher
                    .encrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: &plain,
                            aad: &aad,
                        },
                    )
                    .map_err(|e| Error::InvalidArchive(format!("encryption failed: {}", e)))?;
                (header, sealed)
            }
        };

        tracing::debug!(
            entries = entries.len(),
            encrypted = header.encryption.is_encrypted(),
            "exported archive"
        );
        serde_json::to_vec_pretty(&ArchiveFile { header, payload })
            .map_err(|e| Error::InvalidArchive(e.to_string()))
    }

    /// Decode archive bytes; the archive is accepted whole or not at all
    pub fn import(&self, bytes: &[u8], password: Option<&str>) -> Result<Archive> {
        let file = parse(bytes)?;
        let header = file.header;

        let compressed = match &header.encryption {
            Encryption::Plain => file.payload,
            Encryption::Aes256Gcm { salt, nonce, kdf } => {
                let password = password.ok_or(Error::PasswordRequired)?;
                if salt.len() < 8 || nonce.len() != NONCE_LEN {
                    return Err(Error::InvalidArchive("bad salt or nonce length".to_string()));
                }
                let key = kdf
                    .params
                    .derive_key(password, salt)
                    .map_err(Error::InvalidArchive)?;
                let cipher = Aes256Gcm::new_from_slice(&key)
                    .map_err(|e| Error::InvalidArchive(e.to_string()))?;
                let aad = header.associated_data();
                cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload {
                            msg: &file.payload,
                            aad: &aad,
                        },
                    )
                    .map_err(|_| Error::DecryptionFailed)?
            }
        };

        let entries = deserialize_entries(&decompress(&compressed)?)?;
        tracing::debug!(entries = entries.len(), "imported archive");
        Ok(Archive { header, entries })
    }
}

/// Parse only the cleartext header, e.g. to decide whether to ask for a password
pub fn read_header(bytes: &[u8]) -> Result<ArchiveHeader> {
    parse(bytes).map(|f| f.header)
}

fn parse(bytes: &[u8]) -> Result<ArchiveFile> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidArchive(format!("not an archive: {}", e)))?;

    if value.get("format").and_then(|f| f.as_str()) != Some(ARCHIVE_FORMAT) {
        return Err(Error::InvalidArchive("missing archive format marker".to_string()));
    }
    match value.get("version").and_then(|v| v.as_u64()) {
        Some(v) if v == u64::from(ARCHIVE_VERSION) => {}
        Some(v) => return Err(Error::InvalidArchive(format!("unsupported archive version {}", v))),
        None => return Err(Error::InvalidArchive("missing archive version".to_string())),
    }

    serde_json::from_value(value).map_err(|e| Error::InvalidArchive(e.to_string()))
}

fn serialize_entries(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&ArchiveEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut records = Vec::with_capacity(sorted.len());
    for pair in sorted.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(Error::AlreadyExists(pair[0].name.to_string()));
        }
    }
    for entry in sorted {
        let content = String::from_utf8(entry.content.clone())
            .map_err(|e| Error::invalid_content(format!("{}.json", entry.name), e))?;
        records.push(EntryRecord {
            name: entry.name.to_string(),
            content,
        });
    }

    serde_json::to_vec(&EntryList { entries: records })
        .map_err(|e| Error::InvalidArchive(e.to_string()))
}

fn deserialize_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let list: EntryList = serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidArchive(format!("bad entry list: {}", e)))?;

    let mut seen = BTreeSet::new();
    let mut entries = Vec::with_capacity(list.entries.len());
    for record in list.entries {
        validate_profile_name(&record.name).map_err(|e| Error::InvalidArchive(e.to_string()))?;
        if !seen.insert(record.name.clone()) {
            return Err(Error::InvalidArchive(format!(
                "entry '{}' appears more than once",
                record.name
            )));
        }
        if serde_json::from_str::<serde_json::Value>(&record.content).is_err() {
            return Err(Error::InvalidArchive(format!(
                "entry '{}' is not a JSON document",
                record.name
            )));
        }
        entries.push(ArchiveEntry {
            name: ProfileName::new(record.name).map_err(|e| Error::InvalidArchive(e.to_string()))?,
            content: record.content.into_bytes(),
        });
    }
    Ok(entries)
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let fail = |e: std::io::Error| Error::InvalidArchive(format!("compression failed: {}", e));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(fail)?;
    encoder.finish().map_err(fail)
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_PAYLOAD_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::InvalidArchive(format!("payload does not decompress: {}", e)))?;
    if out.len() as u64 > MAX_PAYLOAD_BYTES {
        return Err(Error::InvalidArchive("payload too large".to_string()));
    }
    Ok(out)
}

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
