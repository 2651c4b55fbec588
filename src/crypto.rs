// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tunnel payload encryption (XOR or AES-128-ECB) and the MD5 auth tag shared
// by the L/R tunnel frames and the PAT auth handshake.

use aes::Aes128;
use ecb::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::{Decryptor, Encryptor};
use md5::{Digest, Md5};

/// Default XOR key used when `EncryptType::Xor` is configured without an
/// explicit key override.
pub const DEFAULT_XOR_KEY: u8 = 0x86;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptType {
    None,
    Aes,
    Xor,
}

/// 16-byte MD5 tag over `user || password`, used both by the tunnel frame
/// auth field and the PAT auth handshake.
pub fn auth_tag(user: &str, pass: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(user.as_bytes());
    hasher.update(pass.as_bytes());
    hasher.finalize().into()
}

/// XOR every byte of `data` in place with `key`.
pub fn xor_in_place(data: &mut [u8], key: u8) {
    for b in data.iter_mut() {
        *b ^= key;
    }
}

/// AES-128-ECB encrypt: zero-pad `plaintext` to a 16-byte multiple, append
/// the original length as a big-endian u32, encrypt the whole buffer.
pub fn aes_encrypt(plaintext: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    let pad = (16 - (buf.len() % 16)) % 16;
    buf.resize(buf.len() + pad, 0);
    buf.extend_from_slice(&(plaintext.len() as u32).to_be_bytes());
    let final_pad = (16 - (buf.len() % 16)) % 16;
    buf.resize(buf.len() + final_pad, 0);

    let enc = Encryptor::<Aes128>::new(key.into());
    enc.encrypt_padded_mut::<ecb::cipher::block_padding::NoPadding>(&mut buf, buf.len())
        .expect("buffer already block-aligned")
        .to_vec()
}

/// Inverse of [`aes_encrypt`]: decrypt then trim to the trailing plaintext
/// length. Returns `None` if the ciphertext is malformed (not block-aligned,
/// or the trailing length exceeds the decrypted buffer).
pub fn aes_decrypt(ciphertext: &[u8], key: &[u8; 16]) -> Option<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return None;
    }
    let mut buf = ciphertext.to_vec();
    let dec = Decryptor::<Aes128>::new(key.into());
    let out = dec
        .decrypt_padded_mut::<ecb::cipher::block_padding::NoPadding>(&mut buf)
        .ok()?;
    if out.len() < 4 {
        return None;
    }
    let len_offset = out.len() - 4;
    let len = u32::from_be_bytes(out[len_offset..].try_into().unwrap()) as usize;
    if len > len_offset {
        return None;
    }
    Some(out[..len].to_vec())
}
