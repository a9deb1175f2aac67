//! Scripted OP_MSG peer for unit tests

use super::{DialStrategy, Transport};
use crate::client::ServerAddress;
use crate::protocol::{decode_message, encode_message, OpMsg};
use bson::{doc, Document};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Read one OP_MSG from a raw socket
pub(crate) async fn read_request(socket: &mut TcpStream) -> OpMsg {
    let mut buf = Vec::new();
    loop {
        match decode_message(&buf) {
            Ok((msg, _)) => return msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                let mut chunk = [0u8; 1024];
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client hung up");
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => panic!("bad request: {e}"),
        }
    }
}

/// Answer `request` with `body`
pub(crate) async fn reply(socket: &mut TcpStream, request: &OpMsg, body: Document) {
    let mut msg = OpMsg::command(body);
    msg.response_to = request.request_id;
    socket
        .write_all(&encode_message(&msg).unwrap())
        .await
        .unwrap();
}

/// `isMaster` reply from a standalone or replica-set primary
pub(crate) fn hello_reply(set_name: Option<&str>) -> Document {
    let mut body = doc! { "ismaster": true, "maxWireVersion": 17, "ok": 1.0 };
    if let Some(name) = set_name {
        body.insert("setName", name);
    }
    body
}

/// Plain TCP transport to a local listener
pub(crate) async fn connect(port: u16) -> (Transport, ServerAddress) {
    let address = ServerAddress {
        host: "127.0.0.1".into(),
        port,
    };
    (DialStrategy::Plain.dial(&address).await.unwrap(), address)
}
