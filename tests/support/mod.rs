#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Log output for debugging a failing test. Safe to call from every test;
/// only the first call per process wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// A single-connection server fully scripted by the test: reply bytes go in
/// through `replies` (split however the test likes, to exercise reassembly),
/// and every chunk the client writes comes back out through `requests`.
pub struct MockServer {
    pub replies: UnboundedSender<Vec<u8>>,
    pub requests: UnboundedReceiver<Vec<u8>>,
    pub port: u16,
}

impl MockServer {
    pub fn reply(&self, bytes: &[u8]) {
        self.replies.send(bytes.to_vec()).unwrap();
    }

    /// Collects request chunks until `len` bytes have arrived.
    pub async fn written(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            match self.requests.recv().await {
                Some(chunk) => bytes.extend_from_slice(&chunk),
                None => break,
            }
        }
        bytes
    }
}

pub async fn mock_server() -> MockServer {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (request_tx, request_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            let (mut reader, mut writer) = socket.into_split();

            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = request_tx.send(chunk[..n].to_vec());
                        }
                    }
                }
            });

            while let Some(bytes) = reply_rx.recv().await {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        }
    });

    MockServer {
        replies: reply_tx,
        requests: request_rx,
        port,
    }
}

/// What a `plan_server` connection does with the requests it receives.
pub enum ConnPlan {
    /// Drop the socket as soon as the first complete request arrives.
    CloseOnFirstRequest,
    /// Answer every complete request with the same bytes, after `delay`.
    ReplyPerRequest { reply: Vec<u8>, delay: Duration },
}

impl ConnPlan {
    pub fn ok() -> ConnPlan {
        ConnPlan::reply(b"+OK\r\n")
    }

    pub fn reply(bytes: &[u8]) -> ConnPlan {
        ConnPlan::ReplyPerRequest {
            reply: bytes.to_vec(),
            delay: Duration::ZERO,
        }
    }

    pub fn reply_after(bytes: &[u8], delay: Duration) -> ConnPlan {
        ConnPlan::ReplyPerRequest {
            reply: bytes.to_vec(),
            delay,
        }
    }
}

/// Accepts one connection per plan, in order, and runs each plan against its
/// connection. Request framing is parsed properly, so coalesced or split
/// request chunks still get one reply per command.
pub async fn plan_server(plans: Vec<ConnPlan>) -> u16 {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        for plan in plans {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(run_plan(socket, plan));
                }
                Err(_) => break,
            }
        }
    });

    port
}

async fn run_plan(mut socket: TcpStream, plan: ConnPlan) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let complete = drain_requests(&mut buf);
        if complete == 0 {
            continue;
        }

        match &plan {
            ConnPlan::CloseOnFirstRequest => return,
            ConnPlan::ReplyPerRequest { reply, delay } => {
                for _ in 0..complete {
                    if !delay.is_zero() {
                        tokio::time::sleep(*delay).await;
                    }
                    if socket.write_all(reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Removes complete RESP requests from the front of `buf`, returning how
/// many there were.
pub fn drain_requests(buf: &mut Vec<u8>) -> usize {
    let mut consumed = 0;
    let mut count = 0;
    while let Some(len) = request_len(&buf[consumed..]) {
        consumed += len;
        count += 1;
    }
    buf.drain(..consumed);
    count
}

fn request_len(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    let header = next_line(buf, &mut pos)?;
    if header.first() != Some(&b'*') {
        return None;
    }
    let args: usize = std::str::from_utf8(&header[1..]).ok()?.parse().ok()?;

    for _ in 0..args {
        let length = next_line(buf, &mut pos)?;
        if length.first() != Some(&b'$') {
            return None;
        }
        let length: usize = std::str::from_utf8(&length[1..]).ok()?.parse().ok()?;
        if buf.len() < pos + length + 2 {
            return None;
        }
        pos += length + 2;
    }

    Some(pos)
}

fn next_line<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let rest = &buf[*pos..];
    let at = rest.windows(2).position(|window| window == b"\r\n")?;
    let line = &rest[..at];
    *pos += at + 2;
    Some(line)
}
