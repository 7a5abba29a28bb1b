use core::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use md2::Md2;
use md5::{Digest, Md5};
use rc4::consts::{U5, U16};
use rc4::{Rc4, StreamCipher};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }

    /// The secret truncated or zero-padded to exactly `N` bytes.
    pub(crate) fn padded<const N: usize>(&self) -> [u8; N] {
        pad_key(self.expose())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Normalize a secret (password/Kg) into a fixed-size key.
///
/// IPMI implementations treat user keys as fixed-size arrays where the
/// provided secret is truncated and the remainder is zero-padded.
pub(crate) fn pad_key<const N: usize>(secret: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = secret.len().min(N);
    out[..n].copy_from_slice(&secret[..n]);
    out
}

pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Hash function underneath an HMAC computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HmacAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl HmacAlgorithm {
    pub(crate) fn output_len(self) -> usize {
        match self {
            HmacAlgorithm::Md5 => 16,
            HmacAlgorithm::Sha1 => 20,
            HmacAlgorithm::Sha256 => 32,
        }
    }
}

pub(crate) fn hmac(alg: HmacAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut mac =
            <M as Mac>::new_from_slice(key).map_err(|_| Error::Crypto("invalid HMAC key"))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    match alg {
        HmacAlgorithm::Md5 => run::<Hmac<Md5>>(key, data),
        HmacAlgorithm::Sha1 => run::<Hmac<Sha1>>(key, data),
        HmacAlgorithm::Sha256 => run::<Hmac<Sha256>>(key, data),
    }
}

pub(crate) fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

pub(crate) fn md2_digest(data: &[u8]) -> [u8; 16] {
    Md2::digest(data).into()
}

/// AES-128-CBC encryption without padding.
///
/// The caller must ensure `plaintext.len()` is a multiple of 16.
pub(crate) fn aes128_cbc_encrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    if !plaintext.len().is_multiple_of(16) {
        return Err(Error::Crypto(
            "AES-CBC plaintext length must be a multiple of 16",
        ));
    }

    let cipher = Aes128::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES-128 key"))?;

    let mut out = Vec::with_capacity(plaintext.len());
    let mut prev = *iv;

    for block in plaintext.chunks(16) {
        let mut xored = [0u8; 16];
        for i in 0..16 {
            xored[i] = block[i] ^ prev[i];
        }

        let mut ga = GenericArray::clone_from_slice(&xored);
        cipher.encrypt_block(&mut ga);

        prev.copy_from_slice(&ga);
        out.extend_from_slice(&prev);
    }

    Ok(out)
}

/// AES-128-CBC decryption without padding.
///
/// The caller must ensure `ciphertext.len()` is a multiple of 16.
pub(crate) fn aes128_cbc_decrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if !ciphertext.len().is_multiple_of(16) {
        return Err(Error::Crypto(
            "AES-CBC ciphertext length must be a multiple of 16",
        ));
    }

    let cipher = Aes128::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES-128 key"))?;

    let mut out = Vec::with_capacity(ciphertext.len());
    let mut prev = *iv;

    for block in ciphertext.chunks(16) {
        let mut ga = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut ga);

        for (b, p) in ga.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        out.extend_from_slice(&ga);
        prev.copy_from_slice(block);
    }

    Ok(out)
}

/// Apply the RC4 keystream to `data`, starting `offset` bytes into the stream.
///
/// RC4 is symmetric so this both encrypts and decrypts. Only 40-bit and
/// 128-bit keys are accepted.
pub(crate) fn rc4_apply(key: &[u8], offset: u64, data: &mut [u8]) -> Result<()> {
    fn run<C: StreamCipher>(mut cipher: C, offset: u64, data: &mut [u8]) {
        let mut discard = [0u8; 256];
        let mut left = offset;
        while left > 0 {
            let n = left.min(discard.len() as u64) as usize;
            cipher.apply_keystream(&mut discard[..n]);
            left -= n as u64;
        }
        cipher.apply_keystream(data);
    }

    match key.len() {
        16 => {
            let cipher = <Rc4<U16> as KeyInit>::new_from_slice(key)
                .map_err(|_| Error::Crypto("invalid RC4 key"))?;
            run(cipher, offset, data);
        }
        5 => {
            let cipher = <Rc4<U5> as KeyInit>::new_from_slice(key)
                .map_err(|_| Error::Crypto("invalid RC4 key"))?;
            run(cipher, offset, data);
        }
        _ => return Err(Error::Crypto("RC4 key must be 5 or 16 bytes")),
    }
    Ok(())
}
