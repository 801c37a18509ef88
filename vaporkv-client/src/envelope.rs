//! The cryptographic envelope: record ids are keyed digests of the user's
//! key, and values travel as compressed, integrity-checked AES-CBC
//! ciphertext. The server only ever sees the sealed forms.
//!
//! Wire layout of a sealed value, before base64:
//! `IV(16) ∥ AES-128-CBC(key, bzip2(plaintext) ∥ SHA1(bzip2(plaintext)) ∥ padding)`
//! with PKCS#7 padding (always 1..=16 bytes, a full block when the payload
//! is already aligned).

use std::io::Read;

use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bzip2::read::{BzDecoder, BzEncoder};
use bzip2::Compression;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

use vaporkv_common::{Result, VaporKvError};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size; also the IV length and the derived key length.
pub const BLOCK_SIZE: usize = 16;
/// SHA-1 digest length.
const DIGEST_SIZE: usize = 20;

/// Derive the 16-byte AES key from the shared secret.
pub fn derive_key(secret: &[u8]) -> [u8; BLOCK_SIZE] {
    let digest = Sha1::digest(secret);
    let mut key = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&digest[..BLOCK_SIZE]);
    key
}

/// Record id on the wire: lowercase hex of `HMAC-SHA1(key, user_key)`.
pub fn record_id(key: &[u8; BLOCK_SIZE], user_key: &[u8]) -> String {
    let mut mac =
        <Hmac<Sha1> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(user_key);
    hex::encode(mac.finalize().into_bytes())
}

/// Seal a plaintext for storage: compress, digest, encrypt, base64.
pub fn seal(key: &[u8; BLOCK_SIZE], plaintext: &[u8]) -> String {
    let mut payload = compress(plaintext);
    let digest = Sha1::digest(&payload);
    payload.extend_from_slice(&digest);

    let iv: [u8; BLOCK_SIZE] = rand::random();
    let cipher = Aes128CbcEnc::new_from_slices(key, &iv).expect("key and IV lengths are fixed");
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&payload);

    let mut binary = iv.to_vec();
    binary.extend_from_slice(&ciphertext);
    BASE64.encode(binary)
}

/// Open a sealed value. Every malformed stage reports `DecryptionFailed`;
/// a digest mismatch means a wrong secret or corrupted data.
pub fn open(key: &[u8; BLOCK_SIZE], wire: &str) -> Result<Vec<u8>> {
    let binary = BASE64.decode(wire).map_err(|_| invalid_format())?;

    if binary.len() < BLOCK_SIZE {
        return Err(invalid_format());
    }
    let (iv, ciphertext) = binary.split_at(BLOCK_SIZE);
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(invalid_format());
    }

    let cipher = Aes128CbcDec::new_from_slices(key, iv).expect("key and IV lengths are fixed");
    let unpadded = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| invalid_format())?;

    if unpadded.len() < DIGEST_SIZE {
        return Err(invalid_format());
    }
    let (compressed, digest_msg) = unpadded.split_at(unpadded.len() - DIGEST_SIZE);

    let digest_real = Sha1::digest(compressed);
    if digest_msg != digest_real.as_slice() {
        return Err(VaporKvError::DecryptionFailed(
            "wrong secret or corrupted data".to_string(),
        ));
    }

    decompress(compressed)
}

fn invalid_format() -> VaporKvError {
    VaporKvError::DecryptionFailed("invalid format".to_string())
}

fn compress(plaintext: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::new();
    BzEncoder::new(plaintext, Compression::best())
        .read_to_end(&mut compressed)
        .expect("in-memory bzip2 compression cannot fail");
    compressed
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut plaintext = Vec::new();
    BzDecoder::new(compressed)
        .read_to_end(&mut plaintext)
        .map_err(|_| VaporKvError::DecryptionFailed("corrupted compressed payload".to_string()))?;
    Ok(plaintext)
}
