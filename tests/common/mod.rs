//! In-process stand-in for a mongod
//!
//! Speaks just enough OP_MSG to complete the handshake, SCRAM-SHA-256
//! authentication and `ping`, and records every command it receives.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bson::{doc, spec::BinarySubtype, Binary, Document};
use hmac::{Hmac, Mac};
use mongo_producer::protocol::{decode_message, encode_message, OpMsg};
use sha2::{Digest, Sha256};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type HmacSha256 = Hmac<Sha256>;

const SALT: &[u8] = b"fake-mongod-salt";
const ITERATIONS: u32 = 4096;

/// Install a test subscriber; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// How the fake server presents itself
#[derive(Clone, Default)]
pub struct Behavior {
    /// Replica-set name reported by `isMaster`
    pub set_name: Option<String>,
    /// SCRAM user and password the server accepts
    pub credentials: Option<(String, String)>,
}

struct Shared {
    behavior: Behavior,
    accepted: AtomicUsize,
    generation: AtomicUsize,
    commands: Mutex<Vec<Document>>,
}

/// Handle to a running fake server
pub struct FakeMongod {
    /// Listening port on 127.0.0.1
    pub port: u16,
    shared: Arc<Shared>,
}

impl FakeMongod {
    /// Start a server with `behavior`
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared {
            behavior,
            accepted: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accept_shared)));
            }
        });

        Self { port, shared }
    }

    /// `host:port` for connection URLs
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> Vec<Document> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// First recorded command named `name`
    pub fn command(&self, name: &str) -> Option<Document> {
        self.commands()
            .into_iter()
            .find(|c| c.keys().next().map(String::as_str) == Some(name))
    }

    /// Drop every open connection at its next request
    pub fn sever_connections(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Conversation {
    client_first_bare: String,
    server_first: String,
}

async fn serve(mut socket: TcpStream, shared: Arc<Shared>) {
    let generation = shared.generation.load(Ordering::SeqCst);
    let mut buf = Vec::new();
    let mut conversation = Conversation::default();

    loop {
        let request = match read_request(&mut socket, &mut buf).await {
            Some(request) => request,
            None => return,
        };
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        shared.commands.lock().unwrap().push(request.body.clone());
        let name = request.body.keys().next().cloned().unwrap_or_default();
        let body = match name.as_str() {
            "isMaster" | "hello" => {
                let mut body = doc! { "ismaster": true, "maxWireVersion": 17, "ok": 1.0 };
                if let Some(set_name) = &shared.behavior.set_name {
                    body.insert("setName", set_name.as_str());
                }
                body
            }
            "saslStart" => sasl_start(&request.body, &mut conversation),
            "saslContinue" => sasl_continue(&request.body, &conversation, &shared.behavior),
            _ => doc! { "ok": 1.0 },
        };

        let mut reply = OpMsg::command(body);
        reply.response_to = request.request_id;
        let bytes = encode_message(&reply).unwrap();
        if socket.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

async fn read_request(socket: &mut TcpStream, buf: &mut Vec<u8>) -> Option<OpMsg> {
    loop {
        match decode_message(buf) {
            Ok((msg, consumed)) => {
                buf.drain(..consumed);
                return Some(msg);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                let mut chunk = [0u8; 4096];
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return None,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            Err(_) => return None,
        }
    }
}

fn payload(bytes: impl Into<Vec<u8>>) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.into(),
    }
}

fn auth_failed() -> Document {
    doc! { "ok": 0.0, "code": 18, "codeName": "AuthenticationFailed", "errmsg": "Authentication failed." }
}

fn sasl_start(command: &Document, conversation: &mut Conversation) -> Document {
    let client_first = match command.get_binary_generic("payload") {
        Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Err(_) => return auth_failed(),
    };
    let Some(bare) = client_first.strip_prefix("n,,") else {
        return auth_failed();
    };
    let Some(client_nonce) = bare.split(',').find_map(|p| p.strip_prefix("r=")) else {
        return auth_failed();
    };

    conversation.client_first_bare = bare.to_string();
    conversation.server_first = format!(
        "r={}fakeserver,s={},i={}",
        client_nonce,
        BASE64.encode(SALT),
        ITERATIONS
    );

    doc! {
        "conversationId": 1,
        "payload": payload(conversation.server_first.clone().into_bytes()),
        "done": false,
        "ok": 1.0,
    }
}

fn sasl_continue(command: &Document, conversation: &Conversation, behavior: &Behavior) -> Document {
    let Some((_, password)) = &behavior.credentials else {
        return auth_failed();
    };
    let client_final = match command.get_binary_generic("payload") {
        Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Err(_) => return auth_failed(),
    };
    let Some((without_proof, proof)) = client_final.rsplit_once(",p=") else {
        return auth_failed();
    };
    let Ok(proof) = BASE64.decode(proof) else {
        return auth_failed();
    };

    let mut salted = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), SALT, ITERATIONS, &mut salted).unwrap();
    let client_key = mac_sha256(&salted, b"Client Key");
    let stored_key = Sha256::digest(&client_key);
    let auth_message = format!(
        "{},{},{}",
        conversation.client_first_bare, conversation.server_first, without_proof
    );
    let signature = mac_sha256(&stored_key, auth_message.as_bytes());
    let expected: Vec<u8> = client_key
        .iter()
        .zip(signature.iter())
        .map(|(k, s)| k ^ s)
        .collect();
    if expected != proof {
        return auth_failed();
    }

    let server_key = mac_sha256(&salted, b"Server Key");
    let server_signature = mac_sha256(&server_key, auth_message.as_bytes());
    doc! {
        "conversationId": 1,
        "payload": payload(format!("v={}", BASE64.encode(server_signature)).into_bytes()),
        "done": true,
        "ok": 1.0,
    }
}

fn mac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
