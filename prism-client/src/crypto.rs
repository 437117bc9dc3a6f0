//! AES-CBC payload encryption and asset-bundle deobfuscation
//!
//! The backend speaks AES-CBC with a fixed key/iv pair and a pad-byte-equals-
//! pad-length scheme. Padding content is never validated on decrypt: the last
//! byte is trusted as the pad length, matching the peer's behavior.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{ClientError, ClientResult};

const BLOCK_SIZE: usize = 16;

/// Number of leading bytes covered by the obfuscation transform
const OBFUSCATED_PREFIX: usize = 132;

/// Fixed-key AES-CBC codec for request/response payloads
#[derive(Clone)]
pub struct Crypt {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl Crypt {
    /// Create a codec from raw key/iv material.
    ///
    /// Key must be 16, 24 or 32 bytes (AES-128/192/256); iv must be 16 bytes.
    pub fn new(key: impl Into<Vec<u8>>, iv: impl Into<Vec<u8>>) -> ClientResult<Self> {
        let key = key.into();
        let iv = iv.into();
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(ClientError::Crypto(format!(
                "invalid AES key length {}",
                key.len()
            )));
        }
        if iv.len() != BLOCK_SIZE {
            return Err(ClientError::Crypto(format!(
                "invalid IV length {}",
                iv.len()
            )));
        }
        Ok(Self { key, iv })
    }

    /// Pad to a block boundary (a full extra block when already aligned)
    /// and CBC-encrypt.
    pub fn encrypt(&self, plaintext: &[u8]) -> ClientResult<Vec<u8>> {
        let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
        let mut buf = Vec::with_capacity(plaintext.len() + pad);
        buf.extend_from_slice(plaintext);
        buf.resize(plaintext.len() + pad, pad as u8);

        let len = buf.len();
        match self.key.len() {
            16 => self.encrypt_in_place::<aes::Aes128>(&mut buf, len)?,
            24 => self.encrypt_in_place::<aes::Aes192>(&mut buf, len)?,
            _ => self.encrypt_in_place::<aes::Aes256>(&mut buf, len)?,
        }
        Ok(buf)
    }

    /// CBC-decrypt and strip the trailing pad, trusting the last byte as the
    /// pad length. An empty ciphertext decrypts to an empty plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> ClientResult<Vec<u8>> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(ClientError::Crypto(format!(
                "ciphertext length {} not block-aligned",
                ciphertext.len()
            )));
        }

        let mut buf = ciphertext.to_vec();
        match self.key.len() {
            16 => self.decrypt_in_place::<aes::Aes128>(&mut buf)?,
            24 => self.decrypt_in_place::<aes::Aes192>(&mut buf)?,
            _ => self.decrypt_in_place::<aes::Aes256>(&mut buf)?,
        }

        let pad = usize::from(*buf.last().unwrap_or(&0));
        buf.truncate(buf.len().saturating_sub(pad));
        Ok(buf)
    }

    fn encrypt_in_place<C>(&self, buf: &mut [u8], msg_len: usize) -> ClientResult<()>
    where
        C: aes::cipher::BlockCipher + aes::cipher::BlockEncryptMut + aes::cipher::KeyInit,
    {
        cbc::Encryptor::<C>::new_from_slices(&self.key, &self.iv)
            .map_err(|e| ClientError::Crypto(e.to_string()))?
            .encrypt_padded_mut::<NoPadding>(buf, msg_len)
            .map_err(|e| ClientError::Crypto(e.to_string()))?;
        Ok(())
    }

    fn decrypt_in_place<C>(&self, buf: &mut [u8]) -> ClientResult<()>
    where
        C: aes::cipher::BlockCipher + aes::cipher::BlockDecryptMut + aes::cipher::KeyInit,
    {
        cbc::Decryptor::<C>::new_from_slices(&self.key, &self.iv)
            .map_err(|e| ClientError::Crypto(e.to_string()))?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|e| ClientError::Crypto(e.to_string()))?;
        Ok(())
    }
}

/// Undo the bit-flip obfuscation applied to asset-bundle downloads.
///
/// Only the first 132 bytes are transformed: byte `i` is inverted when
/// `(i + 4) % 8 < 5`. The transform is an involution.
pub fn deobfuscate(obfuscated: &[u8]) -> Vec<u8> {
    let mut out = obfuscated.to_vec();
    for (i, byte) in out.iter_mut().take(OBFUSCATED_PREFIX).enumerate() {
        if (i + 4) % 8 < 5 {
            *byte ^= 0xFF;
        }
    }
    out
}
