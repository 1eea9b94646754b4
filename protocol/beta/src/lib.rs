//! Minecraft Beta 1.7.3 login-sequence protocol.
//!
//! This crate implements the two inbound packets a client sends before it
//! is considered joined, and the single canned response the server sends
//! between them:
//!
//! - `0x02` Handshake (client → server): username, answered with the
//!   offline-mode response `"-"`.
//! - `0x01` Login Request (client → server): protocol version, username,
//!   map seed, dimension.
//!
//! Parsing is incremental: the caller accumulates bytes and retries, and
//! [`ParseError::Incomplete`] reports the minimum number of additional
//! bytes needed before the parser can make progress. The handshake
//! username is never materialized — only its length matters, because it
//! determines the exact size of the login packet that follows and the
//! login packet carries the username again.
//!
//! # Example
//!
//! ```
//! use protocol_beta::{Handshake, Login, ParseError};
//!
//! // A handshake for the one-character username "a".
//! let handshake = Handshake::parse(&[0x02, 0x00, 0x01, 0x00, 0x61]).unwrap();
//! assert_eq!(handshake.username_len, 1);
//! assert_eq!(Login::packet_size(1), 18);
//!
//! // Three bytes buffered: at least two more are needed.
//! assert_eq!(
//!     Handshake::parse(&[0x02, 0x00, 0x01]),
//!     Err(ParseError::Incomplete(2)),
//! );
//! ```

pub mod wire;

/// Protocol version sent in the login request for Beta 1.7.3.
pub const PROTOCOL_VERSION: i32 = 14;

/// Usernames are 1..=16 UTF-16 code units on the wire.
pub const MAX_USERNAME_LEN: usize = 16;

/// Packet parse outcome when the input is not a complete, valid packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// At least this many more bytes are needed before parsing can
    /// make progress.
    #[error("need at least {0} more bytes")]
    Incomplete(usize),
    /// The packet can never parse, no matter how many bytes follow.
    #[error("malformed packet")]
    Invalid,
}

/// Parsed handshake packet.
///
/// Only the username length survives parsing; the username bytes are
/// skipped. Layout:
///
/// ```text
/// u8  id = 0x02
/// i16 username_len (1..=16)
/// u16[username_len] username (UTF-16BE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Username length in code units, validated to 1..=16.
    pub username_len: i16,
}

impl Handshake {
    /// Packet id byte.
    pub const ID: u8 = 0x02;

    /// The fixed response sent after a valid handshake: packet id `0x02`
    /// and the one-character string `"-"`, which tells the client the
    /// server runs in offline mode.
    pub const OFFLINE_MODE_RESPONSE: [u8; 5] = [Self::ID, 0x00, 0x01, 0x00, b'-'];

    /// Smallest possible handshake: id plus a one-character username.
    pub const MIN_SIZE: usize = 1 + wire::string_size(1);

    /// Encoded size of a handshake carrying `username_len` code units.
    pub const fn packet_size(username_len: usize) -> usize {
        1 + wire::string_size(username_len)
    }

    /// Incrementally parse a handshake from the front of `buf`.
    ///
    /// `buf` is the bytes received so far; it may end mid-packet. The id
    /// and length header are not inspected until [`Self::MIN_SIZE`] bytes
    /// are available.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::MIN_SIZE {
            return Err(ParseError::Incomplete(Self::MIN_SIZE - buf.len()));
        }

        if buf[0] != Self::ID {
            return Err(ParseError::Invalid);
        }

        let (username_len, _) = wire::read_i16(&buf[1..]).ok_or(ParseError::Invalid)?;
        if username_len < 1 || username_len as usize > MAX_USERNAME_LEN {
            return Err(ParseError::Invalid);
        }

        let total = Self::packet_size(username_len as usize);
        if buf.len() < total {
            return Err(ParseError::Incomplete(total - buf.len()));
        }

        Ok(Self { username_len })
    }
}

/// Parsed login request.
///
/// Layout:
///
/// ```text
/// u8  id = 0x01
/// i32 protocol_version (14 for Beta 1.7.3)
/// i16 username_len (1..=16)
/// u16[username_len] username (UTF-16BE)
/// i64 map_seed
/// u8  dimension
/// ```
///
/// The parser does not enforce `protocol_version == 14`; the server
/// checks it so a mismatch can be reported distinctly from a malformed
/// packet. Seed and dimension are carried but unused by the login path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Login {
    /// Client protocol version, compared against [`PROTOCOL_VERSION`].
    pub protocol_version: i32,
    /// Username length in code units, validated to 1..=16.
    pub username_len: i16,
    /// Username code units; only the first `username_len` are meaningful.
    pub username: [u16; MAX_USERNAME_LEN],
    /// World seed echoed by the client.
    pub map_seed: i64,
    /// Requested dimension.
    pub dimension: u8,
}

impl Login {
    /// Packet id byte.
    pub const ID: u8 = 0x01;

    /// Encoded size of a login request carrying `username_len` code
    /// units: id, protocol version, username string, seed, dimension.
    pub const fn packet_size(username_len: usize) -> usize {
        1 + 4 + wire::string_size(username_len) + 8 + 1
    }

    /// Largest possible login request.
    pub const MAX_SIZE: usize = Self::packet_size(MAX_USERNAME_LEN);

    /// Parse a login request from the front of `buf`.
    ///
    /// The caller buffers the exact packet size (known from the
    /// handshake) before calling, so an undersized buffer is treated as
    /// malformed rather than incomplete. Trailing bytes are ignored —
    /// a client may pipeline post-login packets behind the request.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let (id, rest) = wire::read_u8(buf).ok_or(ParseError::Invalid)?;
        if id != Self::ID {
            return Err(ParseError::Invalid);
        }

        let (protocol_version, rest) = wire::read_i32(rest).ok_or(ParseError::Invalid)?;
        let (username_len, rest) = wire::read_i16(rest).ok_or(ParseError::Invalid)?;
        if username_len < 1
            || username_len as usize > MAX_USERNAME_LEN
            || buf.len() < Self::packet_size(username_len as usize)
        {
            return Err(ParseError::Invalid);
        }

        let mut username = [0u16; MAX_USERNAME_LEN];
        let rest = wire::read_utf16(rest, &mut username[..username_len as usize])
            .ok_or(ParseError::Invalid)?;

        let (map_seed, rest) = wire::read_i64(rest).ok_or(ParseError::Invalid)?;
        let (dimension, _) = wire::read_u8(rest).ok_or(ParseError::Invalid)?;

        Ok(Self {
            protocol_version,
            username_len,
            username,
            map_seed,
            dimension,
        })
    }

    /// Narrow the username to bytes, null-terminated iff shorter than 16.
    ///
    /// Legal usernames are ASCII-printable, so keeping the low octet of
    /// each code unit is lossless in practice.
    pub fn username_bytes(&self) -> [u8; MAX_USERNAME_LEN] {
        let mut out = [0u8; MAX_USERNAME_LEN];
        for (dst, &code_unit) in out.iter_mut().zip(&self.username[..self.username_len as usize]) {
            *dst = code_unit as u8;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an encoded login request for `username` with the given
    /// protocol version.
    fn encode_login(protocol_version: i32, username: &str) -> Vec<u8> {
        let mut out = vec![Login::ID];
        wire::write_i32(&mut out, protocol_version);
        wire::write_i16(&mut out, username.len() as i16);
        for c in username.chars() {
            wire::write_i16(&mut out, c as i16);
        }
        wire::write_i64(&mut out, 0);
        out.push(0);
        out
    }

    #[test]
    fn test_handshake_parse() {
        // "ab"
        let buf = [0x02, 0x00, 0x02, 0x00, 0x61, 0x00, 0x62];
        let handshake = Handshake::parse(&buf).unwrap();
        assert_eq!(handshake.username_len, 2);
    }

    #[test]
    fn test_handshake_wrong_id() {
        let buf = [0x01, 0x00, 0x01, 0x00, 0x61];
        assert_eq!(Handshake::parse(&buf), Err(ParseError::Invalid));
    }

    #[test]
    fn test_handshake_username_len_bounds() {
        // Zero-length username.
        let buf = [0x02, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(Handshake::parse(&buf), Err(ParseError::Invalid));

        // 17 code units.
        let buf = [0x02, 0x00, 0x11, 0x00, 0x61];
        assert_eq!(Handshake::parse(&buf), Err(ParseError::Invalid));
    }

    #[test]
    fn test_handshake_incremental() {
        // One byte at a time up to the minimum, then up to the full
        // packet for a two-character username.
        let buf = [0x02, 0x00, 0x02, 0x00, 0x61, 0x00, 0x62];
        for have in 0..Handshake::MIN_SIZE {
            assert_eq!(
                Handshake::parse(&buf[..have]),
                Err(ParseError::Incomplete(Handshake::MIN_SIZE - have)),
                "have = {have}"
            );
        }
        for have in Handshake::MIN_SIZE..buf.len() {
            assert_eq!(
                Handshake::parse(&buf[..have]),
                Err(ParseError::Incomplete(buf.len() - have)),
                "have = {have}"
            );
        }
        assert!(Handshake::parse(&buf).is_ok());
    }

    #[test]
    fn test_offline_mode_response_is_a_valid_handshake() {
        // The response has the same shape as the inbound handshake, so
        // it must parse as one with a single-character name.
        let handshake = Handshake::parse(&Handshake::OFFLINE_MODE_RESPONSE).unwrap();
        assert_eq!(handshake.username_len, 1);
    }

    #[test]
    fn test_login_parse() {
        let buf = encode_login(PROTOCOL_VERSION, "ab");
        assert_eq!(buf.len(), Login::packet_size(2));

        let login = Login::parse(&buf).unwrap();
        assert_eq!(login.protocol_version, PROTOCOL_VERSION);
        assert_eq!(login.username_len, 2);
        assert_eq!(&login.username[..2], &[0x61, 0x62]);
        assert_eq!(login.map_seed, 0);
        assert_eq!(login.dimension, 0);
    }

    #[test]
    fn test_login_parse_tolerates_trailing_bytes() {
        let mut buf = encode_login(PROTOCOL_VERSION, "ab");
        buf.extend_from_slice(&[0xFF; 8]);
        assert!(Login::parse(&buf).is_ok());
    }

    #[test]
    fn test_login_wrong_id() {
        let mut buf = encode_login(PROTOCOL_VERSION, "ab");
        buf[0] = 0x02;
        assert_eq!(Login::parse(&buf), Err(ParseError::Invalid));
    }

    #[test]
    fn test_login_carries_any_protocol_version() {
        // Version enforcement is the server's job.
        let buf = encode_login(13, "ab");
        assert_eq!(Login::parse(&buf).unwrap().protocol_version, 13);
    }

    #[test]
    fn test_login_username_len_bounds() {
        let mut buf = encode_login(PROTOCOL_VERSION, "ab");
        buf[6] = 0x00; // username_len = 0
        assert_eq!(Login::parse(&buf), Err(ParseError::Invalid));
        buf[6] = 0x11; // username_len = 17
        assert_eq!(Login::parse(&buf), Err(ParseError::Invalid));
    }

    #[test]
    fn test_login_rejects_high_surrogate() {
        let mut buf = encode_login(PROTOCOL_VERSION, "ab");
        buf[7] = 0xD8; // first code unit becomes 0xD861
        assert_eq!(Login::parse(&buf), Err(ParseError::Invalid));
    }

    #[test]
    fn test_login_short_buffer() {
        let buf = encode_login(PROTOCOL_VERSION, "ab");
        assert_eq!(Login::parse(&buf[..buf.len() - 1]), Err(ParseError::Invalid));
    }

    #[test]
    fn test_login_packet_size() {
        assert_eq!(Login::packet_size(1), 18);
        assert_eq!(Login::packet_size(2), 20);
        assert_eq!(Login::MAX_SIZE, 48);
    }

    #[test]
    fn test_username_bytes() {
        let login = Login::parse(&encode_login(PROTOCOL_VERSION, "ab")).unwrap();
        let mut expected = [0u8; MAX_USERNAME_LEN];
        expected[0] = b'a';
        expected[1] = b'b';
        assert_eq!(login.username_bytes(), expected);
    }

    #[test]
    fn test_username_bytes_full_length() {
        let name = "abcdefghijklmnop";
        let login = Login::parse(&encode_login(PROTOCOL_VERSION, name)).unwrap();
        assert_eq!(&login.username_bytes(), name.as_bytes());
    }
}
