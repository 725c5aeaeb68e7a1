//! Line-oriented TCP command server.
//!
//! Polled from the guide loop thread: each [`CommandChannel::poll`] accepts
//! new clients and returns the complete lines received so far, waiting at
//! most the given timeout when there is nothing to report.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::session::{ClientSession, SessionId};

/// Longest line accepted from a client before the connection is dropped.
const MAX_LINE_LEN: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(ClientSession),
    Line { session: SessionId, line: String },
    Disconnected(SessionId),
}

/// Source of operator commands for the guide loop.
pub trait CommandChannel {
    /// Collect events, waiting up to `timeout` if none are ready.
    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<ServerEvent>>;

    /// Send one reply line to a session.
    fn send(&mut self, session: SessionId, line: &str) -> io::Result<()>;

    /// Drop a session without a reply.
    fn close(&mut self, session: SessionId);

    /// Send a notice line to every session.
    fn broadcast(&mut self, line: &str);
}

struct Client {
    stream: TcpStream,
    pending: Vec<u8>,
}

pub struct LineServer {
    listener: TcpListener,
    clients: HashMap<SessionId, Client>,
    next_id: u64,
}

impl LineServer {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("command server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            clients: HashMap::new(),
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn accept(&mut self, events: &mut Vec<ServerEvent>) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("dropping client, cannot make socket non-blocking: {e}");
                        continue;
                    }
                    let id = SessionId(self.next_id);
                    self.next_id += 1;
                    let session = ClientSession::new(id, stream.peer_addr().ok());
                    self.clients.insert(
                        id,
                        Client {
                            stream,
                            pending: Vec::new(),
                        },
                    );
                    events.push(ServerEvent::Connected(session));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn read_clients(&mut self, events: &mut Vec<ServerEvent>) {
        let mut closed = Vec::new();
        let mut buf = [0u8; 1024];

        for (&id, client) in self.clients.iter_mut() {
            loop {
                match client.stream.read(&mut buf) {
                    Ok(0) => {
                        closed.push(id);
                        break;
                    }
                    Ok(n) => client.pending.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("read from client {id} failed: {e}");
                        closed.push(id);
                        break;
                    }
                }
            }

            while let Some(pos) = client.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = client.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(&['\r', '\n'][..])
                    .to_string();
                events.push(ServerEvent::Line { session: id, line });
            }
            if client.pending.len() > MAX_LINE_LEN {
                warn!("client {id} sent an over-long line, disconnecting");
                closed.push(id);
            }
        }

        for id in closed {
            if let Some(client) = self.clients.remove(&id) {
                let _ = client.stream.shutdown(Shutdown::Both);
                events.push(ServerEvent::Disconnected(id));
            }
        }
    }
}

impl CommandChannel for LineServer {
    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<ServerEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut events = Vec::new();
            self.accept(&mut events);
            self.read_clients(&mut events);

            let now = Instant::now();
            if !events.is_empty() || now >= deadline {
                return Ok(events);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn send(&mut self, session: SessionId, line: &str) -> io::Result<()> {
        let client = self
            .clients
            .get_mut(&session)
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, format!("no session {session}")))?;
        debug!("-> {session}: {line}");
        client.stream.write_all(line.as_bytes())?;
        client.stream.write_all(b"\n")
    }

    fn close(&mut self, session: SessionId) {
        if let Some(client) = self.clients.remove(&session) {
            let _ = client.stream.shutdown(Shutdown::Both);
            info!("closed session {session}");
        }
    }

    fn broadcast(&mut self, line: &str) {
        let ids: Vec<SessionId> = self.clients.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.send(id, line) {
                warn!("unable to notify client {id}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    fn poll_until<F: Fn(&[ServerEvent]) -> bool>(
        server: &mut LineServer,
        done: F,
    ) -> Vec<ServerEvent> {
        let mut all = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && !done(all.as_slice()) {
            all.extend(server.poll(Duration::from_millis(20)).unwrap());
        }
        all
    }

    #[test]
    fn test_lines_and_replies() {
        let mut server = LineServer::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        client.write_all(b"ROI 10 10\r\nFRAME").unwrap();

        let events = poll_until(&mut server, |e| {
            e.iter().any(|ev| matches!(ev, ServerEvent::Line { .. }))
        });
        let session = match &events[0] {
            ServerEvent::Connected(session) => session.clone(),
            other => panic!("expected connect, got {other:?}"),
        };
        assert_eq!(session.hostname, "127.0.0.1");
        assert!(events.contains(&ServerEvent::Line {
            session: session.id,
            line: "ROI 10 10".to_string()
        }));

        client.write_all(b"RATE 50\n").unwrap();
        let events = poll_until(&mut server, |e| !e.is_empty());
        assert_eq!(
            events,
            vec![ServerEvent::Line {
                session: session.id,
                line: "FRAMERATE 50".to_string()
            }]
        );

        server.send(session.id, ". ROI").unwrap();
        let mut reader = BufReader::new(client.try_clone().unwrap());
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, ". ROI\n");
    }

    #[test]
    fn test_disconnect_and_close() {
        let mut server = LineServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let first = TcpStream::connect(addr).unwrap();
        let mut second = TcpStream::connect(addr).unwrap();

        let events = poll_until(&mut server, |e| e.len() >= 2);
        let ids: Vec<SessionId> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::Connected(session) => Some(session.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(server.client_count(), 2);

        drop(first);
        let events = poll_until(&mut server, |e| !e.is_empty());
        assert!(matches!(events.as_slice(), [ServerEvent::Disconnected(_)]));
        assert_eq!(server.client_count(), 1);

        let remaining = ids
            .into_iter()
            .find(|id| !events.contains(&ServerEvent::Disconnected(*id)))
            .unwrap();
        server.close(remaining);
        assert_eq!(server.client_count(), 0);

        second
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(second.read(&mut buf).unwrap(), 0);
    }
}
