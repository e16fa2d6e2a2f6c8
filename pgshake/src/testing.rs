//! Scripted transport and backend message builders for unit tests.
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::transport::Transport;

#[derive(Default)]
pub struct MockState {
    /// Bytes served to reads, in order.
    pub incoming: VecDeque<u8>,
    /// Every successful write, and whether it went through an upgraded transport.
    pub writes: Vec<(bool, Vec<u8>)>,
    pub closed: bool,
    pub upgrades: usize,
    pub fail_write: bool,
    pub fail_close: bool,
    pub fail_upgrade: bool,
    /// Reads on exhausted input time out instead of hitting eof.
    pub stall: bool,
}

/// In memory [`Transport`], clones share the same state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    encrypted: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue bytes for subsequent reads.
    pub fn serve(&self, bytes: &[u8]) {
        self.state().incoming.extend(bytes);
    }
}

impl Transport for MockTransport {
    async fn read_exact(&mut self, buf: &mut [u8], _: Duration) -> io::Result<()> {
        let mut state = self.state();
        if state.incoming.len() < buf.len() {
            if state.stall {
                return Err(io::ErrorKind::TimedOut.into());
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let len = buf.len();
        for (b, incoming) in buf.iter_mut().zip(state.incoming.drain(..len)) {
            *b = incoming;
        }
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8], _: Duration) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_write {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.writes.push((self.encrypted, buf.to_vec()));
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        Some(40000)
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.closed = true;
        if state.fail_close {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        Ok(())
    }

    async fn upgrade(self) -> io::Result<Self> {
        {
            let mut state = self.state();
            if state.fail_upgrade {
                return Err(io::Error::other("handshake failed"));
            }
            state.upgrades += 1;
        }
        Ok(Self { encrypted: true, ..self })
    }
}

/// A tagged backend message.
pub fn message(msgtype: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = vec![msgtype];
    msg.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    msg.extend_from_slice(body);
    msg
}

fn cstrs<'a>(strings: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    let mut body = vec![];
    for s in strings {
        body.extend_from_slice(s.as_bytes());
        body.push(0);
    }
    body
}

fn fields(fields: &[(u8, &str)]) -> Vec<u8> {
    let mut body = vec![];
    for (code, value) in fields {
        body.push(*code);
        body.extend(cstrs([*value]));
    }
    body.push(0);
    body
}

pub fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut body = code.to_be_bytes().to_vec();
    body.extend_from_slice(extra);
    message(b'R', &body)
}

pub fn key_data(process_id: i32, secret_key: i32) -> Vec<u8> {
    let mut body = process_id.to_be_bytes().to_vec();
    body.extend_from_slice(&secret_key.to_be_bytes());
    message(b'K', &body)
}

pub fn ready(status: u8) -> Vec<u8> {
    message(b'Z', &[status])
}

pub fn param(name: &str, value: &str) -> Vec<u8> {
    message(b'S', &cstrs([name, value]))
}

pub fn notification(process_id: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = process_id.to_be_bytes().to_vec();
    body.extend(cstrs([channel, payload]));
    message(b'A', &body)
}

pub fn notice(notice: &[(u8, &str)]) -> Vec<u8> {
    message(b'N', &fields(notice))
}

pub fn error(error: &[(u8, &str)]) -> Vec<u8> {
    message(b'E', &fields(error))
}
