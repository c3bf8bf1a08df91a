//! AEAD encryption for session payloads: ChaCha20-Poly1305 (IETF) via `libsodium-sys`, the same
//! primitive and key/nonce layout the session wire protocol negotiates during the handshake.
use byteorder::{LittleEndian, WriteBytesExt};
use ctor::ctor;
use flux::error::{Error, Result};

pub const MAC_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_ABYTES as usize;
pub const KEY_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_NPUBBYTES as usize;

const NONCE_OFFSET: usize = NONCE_SIZE - 8;

#[ctor]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("cryptography initialization failed");
        }
    }
}

#[inline]
fn nonce_to_bytes(nonce: u64) -> [u8; NONCE_SIZE] {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    (&mut nonce_bytes[NONCE_OFFSET..])
        .write_u64::<LittleEndian>(nonce)
        .expect("nonce buffer is exactly 8 bytes");
    nonce_bytes
}

/// Encrypts `plain` with `key`, returning ciphertext `plain.len() + MAC_SIZE` bytes long.
/// `additional_data` is authenticated but not encrypted (the frame's mode byte, typically).
pub fn encrypt(plain: &[u8], additional_data: &[u8], nonce: u64, key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    let nonce_bytes = nonce_to_bytes(nonce);
    let mut cipher = vec![0u8; plain.len() + MAC_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_aead_chacha20poly1305_ietf_encrypt(
            cipher.as_mut_ptr(),
            std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            std::ptr::null(),
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        )
    };

    if result >= 0 {
        Ok(cipher)
    } else {
        Err(Error::Crypto("encryption failed".into()))
    }
}

/// Decrypts `cipher` with `key`, verifying the MAC against `additional_data` and `nonce`.
pub fn decrypt(cipher: &[u8], additional_data: &[u8], nonce: u64, key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    if cipher.len() < MAC_SIZE {
        return Err(Error::Crypto("ciphertext shorter than MAC".into()));
    }
    let nonce_bytes = nonce_to_bytes(nonce);
    let mut plain = vec![0u8; cipher.len() - MAC_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_aead_chacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        )
    };

    if result >= 0 {
        Ok(plain)
    } else {
        Err(Error::Crypto("decryption failed (bad key or tampered ciphertext)".into()))
    }
}

/// Fills `out` with cryptographically secure random bytes.
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut std::ffi::c_void, out.len());
    }
}

pub fn random_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    random_bytes(&mut key);
    key
}
