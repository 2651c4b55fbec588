// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// PAT wire framing: big-endian length-prefixed auth and data frames.
//
// AuthReq = u32 len || u8 client_pno || u8 ulen || user || u8 plen || pass
// AuthRsp = u8 status          (0 = ok)
// Data    = u32 len || u8 dest_pno || u8 src_pno || payload

use crate::error::ProtocolError;

pub fn encode_auth_request(client_pno: u8, user: &str, pass: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + user.len() + 1 + pass.len());
    body.push(client_pno);
    body.push(user.len() as u8);
    body.extend_from_slice(user.as_bytes());
    body.push(pass.len() as u8);
    body.extend_from_slice(pass.as_bytes());

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

pub struct AuthRequest {
    pub client_pno: u8,
    pub user: String,
    pub pass: String,
}

/// Decode an auth request body (the bytes *after* the `u32 len` prefix has
/// already been read and used to size `body`).
pub fn decode_auth_request(body: &[u8]) -> Result<AuthRequest, ProtocolError> {
    if body.len() < 2 {
        return Err(ProtocolError::Malformed("auth request too short"));
    }
    let client_pno = body[0];
    let ulen = body[1] as usize;
    if body.len() < 2 + ulen + 1 {
        return Err(ProtocolError::Malformed("auth request truncated (user)"));
    }
    let user = String::from_utf8_lossy(&body[2..2 + ulen]).into_owned();
    let plen_pos = 2 + ulen;
    let plen = body[plen_pos] as usize;
    let pass_start = plen_pos + 1;
    if body.len() < pass_start + plen {
        return Err(ProtocolError::Malformed("auth request truncated (pass)"));
    }
    let pass = String::from_utf8_lossy(&body[pass_start..pass_start + plen]).into_owned();
    Ok(AuthRequest { client_pno, user, pass })
}

pub const AUTH_OK: u8 = 0x00;
pub const AUTH_FAIL: u8 = 0x01;

pub fn encode_auth_response(ok: bool) -> [u8; 1] {
    [if ok { AUTH_OK } else { AUTH_FAIL }]
}

/// Encode a data frame: `u32 len || u8 dest_pno || u8 src_pno || payload`.
pub fn encode_data(dest_pno: u8, src_pno: u8, payload: &[u8]) -> Vec<u8> {
    let body_len = 2 + payload.len();
    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.push(dest_pno);
    frame.push(src_pno);
    frame.extend_from_slice(payload);
    frame
}

pub struct DataFrame {
    pub dest_pno: u8,
    pub src_pno: u8,
    pub payload: Vec<u8>,
}

/// Decode a data frame body (bytes after the `u32 len` prefix).
pub fn decode_data(body: &[u8]) -> Result<DataFrame, ProtocolError> {
    if body.len() < 2 {
        return Err(ProtocolError::Malformed("data frame too short"));
    }
    Ok(DataFrame {
        dest_pno: body[0],
        src_pno: body[1],
        payload: body[2..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_request_round_trips() {
        let frame = encode_auth_request(7, "alice", "s3cret");
        let len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded = decode_auth_request(&frame[4..]).unwrap();
        assert_eq!(decoded.client_pno, 7);
        assert_eq!(decoded.user, "alice");
        assert_eq!(decoded.pass, "s3cret");
    }

    #[test]
    fn data_frame_round_trips() {
        let frame = encode_data(3, 9, b"hello");
        let len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded = decode_data(&frame[4..]).unwrap();
        assert_eq!(decoded.dest_pno, 3);
        assert_eq!(decoded.src_pno, 9);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn decode_rejects_truncated_auth() {
        assert!(decode_auth_request(&[1, 5]).is_err());
    }
}
