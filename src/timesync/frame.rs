use crate::utils::error::{NtError, Result};

pub const VERSION: u8 = 1;
pub const PING_ID: u8 = 1;
pub const PONG_ID: u8 = 2;
pub const PING_LEN: usize = 10;
pub const PONG_LEN: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub client_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub client_time: u64,
    pub server_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Ping(Ping),
    Pong(Pong),
}

impl Ping {
    pub fn encode(&self) -> [u8; PING_LEN] {
        let mut buf = [0u8; PING_LEN];
        buf[0] = VERSION;
        buf[1] = PING_ID;
        buf[2..10].copy_from_slice(&self.client_time.to_be_bytes());
        buf
    }
}

impl Pong {
    pub fn encode(&self) -> [u8; PONG_LEN] {
        let mut buf = [0u8; PONG_LEN];
        buf[0] = VERSION;
        buf[1] = PONG_ID;
        buf[2..10].copy_from_slice(&self.client_time.to_be_bytes());
        buf[10..18].copy_from_slice(&self.server_time.to_be_bytes());
        buf
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(bytes)
}

impl Frame {
    /// Decodes one datagram. Frames have a fixed size per message id.
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        if buf.len() < 2 {
            return Err(NtError::Protocol(format!(
                "time sync frame too short: {} bytes",
                buf.len()
            )));
        }
        if buf[0] != VERSION {
            return Err(NtError::UnsupportedVersion(buf[0]));
        }
        let expected = match buf[1] {
            PING_ID => PING_LEN,
            PONG_ID => PONG_LEN,
            other => {
                return Err(NtError::Protocol(format!(
                    "unknown time sync message id {other}"
                )));
            }
        };
        if buf.len() != expected {
            return Err(NtError::Protocol(format!(
                "time sync frame has {} bytes, expected {}",
                buf.len(),
                expected
            )));
        }
        Ok(match buf[1] {
            PING_ID => Frame::Ping(Ping {
                client_time: read_u64(buf, 2),
            }),
            _ => Frame::Pong(Pong {
                client_time: read_u64(buf, 2),
                server_time: read_u64(buf, 10),
            }),
        })
    }
}
