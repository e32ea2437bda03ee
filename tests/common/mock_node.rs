// tests/common/mock_node.rs

//! A minimal scripted RESP2 server used as a stand-in primary in tests.
//!
//! Every non-`AUTH` command is handed to a caller-supplied closure along
//! with a 1-based call counter (so a test can script "fail twice, then
//! succeed"); `AUTH` always succeeds so password-configured pools work the
//! same as unauthenticated ones.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use clusterkv::protocol::{RespCodec, RespFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder};

pub type ReplyFn = Arc<dyn Fn(&[Bytes], usize) -> RespFrame + Send + Sync>;

pub struct MockNode {
    pub addr: SocketAddr,
}

impl MockNode {
    pub async fn spawn(reply: ReplyFn) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock node");
        let addr = listener.local_addr().expect("local addr");
        let calls = Arc::new(AtomicUsize::new(0));

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle_conn(stream, reply.clone(), calls.clone()));
            }
        });

        Self { addr }
    }
}

async fn handle_conn(mut stream: TcpStream, reply: ReplyFn, calls: Arc<AtomicUsize>) {
    let mut codec = RespCodec;
    let mut buf = BytesMut::new();

    loop {
        let frame = match next_frame(&mut stream, &mut codec, &mut buf).await {
            Some(frame) => frame,
            None => return,
        };

        let RespFrame::Array(items) = frame else {
            continue;
        };
        let args: Vec<Bytes> = items
            .into_iter()
            .filter_map(|f| match f {
                RespFrame::BulkString(b) => Some(b),
                _ => None,
            })
            .collect();

        let reply_frame = if args.first().is_some_and(|v| v.eq_ignore_ascii_case(b"AUTH")) {
            RespFrame::SimpleString("OK".into())
        } else {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            reply(&args, call)
        };

        let mut out = BytesMut::new();
        if codec.encode(reply_frame, &mut out).is_err() {
            return;
        }
        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

async fn next_frame(
    stream: &mut TcpStream,
    codec: &mut RespCodec,
    buf: &mut BytesMut,
) -> Option<RespFrame> {
    loop {
        if let Ok(Some(frame)) = codec.decode(buf) {
            return Some(frame);
        }
        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
}

/// Builds a `CLUSTER SLOTS` reply assigning the full slot range to one
/// primary with no replicas, the common case this client actually routes on.
pub fn full_range_slots_reply(addr: SocketAddr) -> RespFrame {
    RespFrame::Array(vec![RespFrame::Array(vec![
        RespFrame::Integer(0),
        RespFrame::Integer(16383),
        RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::copy_from_slice(addr.ip().to_string().as_bytes())),
            RespFrame::Integer(addr.port() as i64),
        ]),
    ])])
}
