//! Encrypted framing used by the secondary control channel.
//!
//! Every frame is a 16-byte header (the CBC initialisation vector encrypted
//! with AES-128 in ECB mode) followed by the AES-128-CBC ciphertext of the
//! command line. The key is derived from the passphrase shown in the
//! television's network settings.
//!
//! The salt below is fixed by the device firmware and shared by every
//! installation, so the key is only as strong as the passphrase. It must not
//! be changed: the television derives its key the same way.

use crate::error::{Error, Result};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::Sha256;

/// AES block size; also the IV, header and key length
pub const BLOCK_SIZE: usize = 16;

/// PBKDF2 iteration count expected by the device
pub const KEY_ITERATIONS: u32 = 16_384;

const SALT: [u8; BLOCK_SIZE] = [
    0x63, 0x61, 0xb8, 0x0e, 0x9b, 0xdc, 0xa6, 0x63, 0x8d, 0x07, 0x20, 0xf2, 0xcc, 0x56, 0x8f, 0xb9,
];

const TERMINATOR: u8 = b'\r';
const LINE_FEED: u8 = b'\n';

type CbcEncryptor = cbc::Encryptor<Aes128>;
type CbcDecryptor = cbc::Decryptor<Aes128>;

/// Derive the 16-byte channel key from a passphrase
pub fn derive_key(passphrase: &str) -> [u8; BLOCK_SIZE] {
    let mut key = [0u8; BLOCK_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &SALT, KEY_ITERATIONS, &mut key);
    key
}

/// Encoder/decoder bound to one derived key.
///
/// Holds no state besides the key, so a single instance can be shared
/// between the reader and writer halves of a connection.
#[derive(Clone)]
pub struct SecureCodec {
    key: [u8; BLOCK_SIZE],
}

impl std::fmt::Debug for SecureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCodec").finish_non_exhaustive()
    }
}

impl SecureCodec {
    /// Create a codec from a passphrase
    pub fn new(passphrase: &str) -> Self {
        Self::with_key(derive_key(passphrase))
    }

    /// Create a codec from an already derived key
    pub fn with_key(key: [u8; BLOCK_SIZE]) -> Self {
        Self { key }
    }

    /// Encode a command line into a frame, using a fresh random IV
    pub fn encode(&self, message: &str) -> Result<Vec<u8>> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encode_with_iv(message, iv)
    }

    pub(crate) fn encode_with_iv(&self, message: &str, iv: [u8; BLOCK_SIZE]) -> Result<Vec<u8>> {
        let mut header = GenericArray::clone_from_slice(&iv);
        self.block_cipher().encrypt_block(&mut header);

        let mut body = pad(message);
        let len = body.len();
        CbcEncryptor::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(&iv))
            .encrypt_padded_mut::<NoPadding>(&mut body, len)
            .map_err(|_| Error::Codec("plaintext is not block aligned".to_string()))?;

        let mut frame = Vec::with_capacity(BLOCK_SIZE + body.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a frame back into its text line
    pub fn decode(&self, frame: &[u8]) -> Result<String> {
        if frame.len() < 2 * BLOCK_SIZE || frame.len() % BLOCK_SIZE != 0 {
            return Err(Error::Codec(format!(
                "frame length {} is not a multiple of {} beyond the header",
                frame.len(),
                BLOCK_SIZE
            )));
        }

        let (header, body) = frame.split_at(BLOCK_SIZE);
        let mut iv = GenericArray::clone_from_slice(header);
        self.block_cipher().decrypt_block(&mut iv);

        let mut body = body.to_vec();
        let plain = CbcDecryptor::new(GenericArray::from_slice(&self.key), &iv)
            .decrypt_padded_mut::<NoPadding>(&mut body)
            .map_err(|_| Error::Codec("ciphertext is not block aligned".to_string()))?;

        let line = match plain.iter().position(|&b| b == LINE_FEED) {
            Some(end) => {
                let line = &plain[..end];
                line.strip_suffix(&[TERMINATOR]).unwrap_or(line)
            }
            None => unpad(plain)
                .ok_or_else(|| Error::Codec("frame carries no line terminator".to_string()))?,
        };

        String::from_utf8(line.to_vec())
            .map_err(|e| Error::Codec(format!("decoded line is not UTF-8: {}", e)))
    }

    fn block_cipher(&self) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.key))
    }
}

/// Append the terminator and the device's padding.
///
/// A block-aligned line gets one extra space so the padding is never empty;
/// each padding byte holds the padding length (always below 16).
pub(crate) fn pad(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 2 * BLOCK_SIZE);
    buf.extend_from_slice(message.as_bytes());
    buf.push(TERMINATOR);

    if buf.len() % BLOCK_SIZE == 0 {
        buf.push(b' ');
    }

    let padding = BLOCK_SIZE - buf.len() % BLOCK_SIZE;
    buf.resize(buf.len() + padding, padding as u8);
    buf
}

/// Reverse of [`pad`] for frames whose plaintext has no line feed.
fn unpad(plain: &[u8]) -> Option<&[u8]> {
    let &last = plain.last()?;
    let padding = last as usize;
    if padding == 0 || padding >= BLOCK_SIZE || padding > plain.len() {
        return None;
    }

    let (line, tail) = plain.split_at(plain.len() - padding);
    if tail.iter().any(|&b| b != last) {
        return None;
    }

    let line = if line.len() % BLOCK_SIZE == 1 && line.ends_with(b"\r ") {
        &line[..line.len() - 1]
    } else {
        line
    };
    line.strip_suffix(&[TERMINATOR])
}
