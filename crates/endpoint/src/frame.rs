//! Client-facing wire frames: a fixed binary header
//! `{magic:4, version:2, type:2, length:4, requestId:8}` around a
//! `serde_json`-encoded body.
//!
//! `requestId` is round-tripped verbatim by the server so a client pairs a
//! `Result`/`Error` response with the `Invoke` that produced it; the header
//! carries the frame's type on the wire so a peer can dispatch on it without
//! decoding the body first.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const MAGIC: [u8; 4] = *b"VLX1";
const PROTOCOL_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 8;
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Wire-level frame type tag, carried in the header ahead of the body.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameType {
    /// First frame either side sends after the socket is accepted.
    Hello = 1,
    /// Server -> client: prove identity before `Invoke` is accepted.
    AuthChallenge = 2,
    /// Client -> server: response to an `AuthChallenge`.
    AuthResponse = 3,
    /// Client -> server: run `api_name.op_name` with a JSON argument blob.
    Invoke = 4,
    /// Server -> client: the operation succeeded.
    Result = 5,
    /// Server -> client: the operation, or the frame itself, failed.
    Error = 6,
    /// Either direction: idle-connection liveness probe.
    Heartbeat = 7,
    /// Either direction: orderly connection shutdown.
    Goodbye = 8,
}

impl FrameType {
    fn from_u16(value: u16) -> std::io::Result<Self> {
        match value {
            1 => Ok(Self::Hello),
            2 => Ok(Self::AuthChallenge),
            3 => Ok(Self::AuthResponse),
            4 => Ok(Self::Invoke),
            5 => Ok(Self::Result),
            6 => Ok(Self::Error),
            7 => Ok(Self::Heartbeat),
            8 => Ok(Self::Goodbye),
            other => Err(invalid_data(format!("unknown frame type {other}"))),
        }
    }
}

/// The error shape sent back to a client on a failed `Invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBlob {
    /// The `VeloxError` variant name (`ConflictError`, `NotPrimary`, ...).
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

/// A frame sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Opening handshake frame, naming the connecting client.
    Hello {
        /// Client-chosen identifier, logged but not otherwise validated.
        client_name: String,
    },
    /// Answer to the server's `AuthChallenge`.
    AuthResponse {
        /// Opaque credential; `None` means "no credential offered".
        credential: Option<String>,
    },
    /// Invoke `api_name.op_name` with a JSON argument blob.
    Invoke {
        /// Target API name.
        api_name: String,
        /// Target operation name.
        op_name: String,
        /// JSON-encoded arguments, validated against the operation's schema
        /// by the handler itself.
        args: serde_json::Value,
    },
    /// Liveness probe; answered with a `Heartbeat` of the same `requestId`.
    Heartbeat,
    /// Client is closing the connection voluntarily.
    Goodbye,
}

/// A frame sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Opening handshake reply, naming the server.
    Hello {
        /// Server-chosen identifier.
        server_name: String,
    },
    /// Challenge the client to authenticate before `Invoke` is accepted.
    AuthChallenge {
        /// Opaque nonce the client's credential should be bound to.
        nonce: String,
    },
    /// The operation succeeded; carries its JSON result blob.
    Result(serde_json::Value),
    /// The operation, or the frame itself, failed.
    Error(ErrorBlob),
    /// Reply to a client `Heartbeat`.
    Heartbeat,
    /// Server is closing the connection (shutdown, idle timeout, `MaxOpenConnCount`).
    Goodbye,
}

impl ClientFrame {
    fn frame_type(&self) -> FrameType {
        match self {
            Self::Hello { .. } => FrameType::Hello,
            Self::AuthResponse { .. } => FrameType::AuthResponse,
            Self::Invoke { .. } => FrameType::Invoke,
            Self::Heartbeat => FrameType::Heartbeat,
            Self::Goodbye => FrameType::Goodbye,
        }
    }
}

impl ServerFrame {
    fn frame_type(&self) -> FrameType {
        match self {
            Self::Hello { .. } => FrameType::Hello,
            Self::AuthChallenge { .. } => FrameType::AuthChallenge,
            Self::Result(_) => FrameType::Result,
            Self::Error(_) => FrameType::Error,
            Self::Heartbeat => FrameType::Heartbeat,
            Self::Goodbye => FrameType::Goodbye,
        }
    }
}

fn invalid_data(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}

struct Header {
    frame_type: FrameType,
    request_id: u64,
    body_len: u32,
}

async fn read_header<R>(stream: &mut R) -> std::io::Result<Option<Header>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    match stream.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if buf[0..4] != MAGIC {
        return Err(invalid_data("bad frame magic"));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != PROTOCOL_VERSION {
        return Err(invalid_data(format!("unsupported frame version {version}")));
    }
    let frame_type = FrameType::from_u16(u16::from_le_bytes([buf[6], buf[7]]))?;
    let body_len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if body_len > MAX_FRAME_LEN {
        return Err(invalid_data(format!(
            "frame of {body_len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let request_id = u64::from_le_bytes(buf[12..20].try_into().unwrap());
    Ok(Some(Header {
        frame_type,
        request_id,
        body_len,
    }))
}

async fn write_header_and_body<W>(
    stream: &mut W,
    frame_type: FrameType,
    request_id: u64,
    body: &[u8],
) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&(frame_type as u16).to_le_bytes());
    header[8..12].copy_from_slice(&(body.len() as u32).to_le_bytes());
    header[12..20].copy_from_slice(&request_id.to_le_bytes());
    stream.write_all(&header).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Read one client frame, returning its `requestId` alongside the decoded
/// frame. `Ok(None)` is a clean EOF at a frame boundary.
pub async fn read_client_frame<R>(stream: &mut R) -> std::io::Result<Option<(u64, ClientFrame)>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(header) = read_header(stream).await? else {
        return Ok(None);
    };
    let mut body = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body).await?;
    let frame = decode_client_body(header.frame_type, &body)?;
    Ok(Some((header.request_id, frame)))
}

/// Write one client frame under `request_id`.
pub async fn write_client_frame<W>(stream: &mut W, request_id: u64, frame: &ClientFrame) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let body = encode_client_body(frame)?;
    write_header_and_body(stream, frame.frame_type(), request_id, &body).await
}

/// Read one server frame, returning the `requestId` it answers.
/// `Ok(None)` is a clean EOF at a frame boundary.
pub async fn read_server_frame<R>(stream: &mut R) -> std::io::Result<Option<(u64, ServerFrame)>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(header) = read_header(stream).await? else {
        return Ok(None);
    };
    let mut body = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body).await?;
    let frame = decode_server_body(header.frame_type, &body)?;
    Ok(Some((header.request_id, frame)))
}

/// Write one server frame under `request_id` (normally the `requestId` of
/// the `Invoke`/`Hello`/... frame it answers).
pub async fn write_server_frame<W>(stream: &mut W, request_id: u64, frame: &ServerFrame) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let body = encode_server_body(frame)?;
    write_header_and_body(stream, frame.frame_type(), request_id, &body).await
}

#[derive(Serialize, Deserialize)]
struct HelloBody {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct AuthResponseBody {
    credential: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct AuthChallengeBody {
    nonce: String,
}

#[derive(Serialize, Deserialize)]
struct InvokeBody {
    api_name: String,
    op_name: String,
    args: serde_json::Value,
}

fn encode_client_body(frame: &ClientFrame) -> std::io::Result<Vec<u8>> {
    let json = match frame {
        ClientFrame::Hello { client_name } => serde_json::to_vec(&HelloBody { name: client_name.clone() }),
        ClientFrame::AuthResponse { credential } => {
            serde_json::to_vec(&AuthResponseBody { credential: credential.clone() })
        }
        ClientFrame::Invoke { api_name, op_name, args } => serde_json::to_vec(&InvokeBody {
            api_name: api_name.clone(),
            op_name: op_name.clone(),
            args: args.clone(),
        }),
        ClientFrame::Heartbeat | ClientFrame::Goodbye => Ok(Vec::new()),
    };
    json.map_err(|e| invalid_data(e.to_string()))
}

fn encode_server_body(frame: &ServerFrame) -> std::io::Result<Vec<u8>> {
    let json = match frame {
        ServerFrame::Hello { server_name } => serde_json::to_vec(&HelloBody { name: server_name.clone() }),
        ServerFrame::AuthChallenge { nonce } => serde_json::to_vec(&AuthChallengeBody { nonce: nonce.clone() }),
        ServerFrame::Result(value) => serde_json::to_vec(value),
        ServerFrame::Error(blob) => serde_json::to_vec(blob),
        ServerFrame::Heartbeat | ServerFrame::Goodbye => Ok(Vec::new()),
    };
    json.map_err(|e| invalid_data(e.to_string()))
}

fn decode_client_body(frame_type: FrameType, body: &[u8]) -> std::io::Result<ClientFrame> {
    match frame_type {
        FrameType::Hello => {
            let b: HelloBody = serde_json::from_slice(body).map_err(|e| invalid_data(e.to_string()))?;
            Ok(ClientFrame::Hello { client_name: b.name })
        }
        FrameType::AuthResponse => {
            let b: AuthResponseBody = serde_json::from_slice(body).map_err(|e| invalid_data(e.to_string()))?;
            Ok(ClientFrame::AuthResponse { credential: b.credential })
        }
        FrameType::Invoke => {
            let b: InvokeBody = serde_json::from_slice(body).map_err(|e| invalid_data(e.to_string()))?;
            Ok(ClientFrame::Invoke {
                api_name: b.api_name,
                op_name: b.op_name,
                args: b.args,
            })
        }
        FrameType::Heartbeat => Ok(ClientFrame::Heartbeat),
        FrameType::Goodbye => Ok(ClientFrame::Goodbye),
        FrameType::AuthChallenge | FrameType::Result | FrameType::Error => {
            Err(invalid_data(format!("{frame_type:?} is not a valid client frame type")))
        }
    }
}

fn decode_server_body(frame_type: FrameType, body: &[u8]) -> std::io::Result<ServerFrame> {
    match frame_type {
        FrameType::Hello => {
            let b: HelloBody = serde_json::from_slice(body).map_err(|e| invalid_data(e.to_string()))?;
            Ok(ServerFrame::Hello { server_name: b.name })
        }
        FrameType::AuthChallenge => {
            let b: AuthChallengeBody = serde_json::from_slice(body).map_err(|e| invalid_data(e.to_string()))?;
            Ok(ServerFrame::AuthChallenge { nonce: b.nonce })
        }
        FrameType::Result => serde_json::from_slice(body)
            .map(ServerFrame::Result)
            .map_err(|e| invalid_data(e.to_string())),
        FrameType::Error => serde_json::from_slice(body)
            .map(ServerFrame::Error)
            .map_err(|e| invalid_data(e.to_string())),
        FrameType::Heartbeat => Ok(ServerFrame::Heartbeat),
        FrameType::Goodbye => Ok(ServerFrame::Goodbye),
        FrameType::AuthResponse | FrameType::Invoke => {
            Err(invalid_data(format!("{frame_type:?} is not a valid server frame type")))
        }
    }
}

impl std::fmt::Debug for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Hello => "Hello",
            Self::AuthChallenge => "AuthChallenge",
            Self::AuthResponse => "AuthResponse",
            Self::Invoke => "Invoke",
            Self::Result => "Result",
            Self::Error => "Error",
            Self::Heartbeat => "Heartbeat",
            Self::Goodbye => "Goodbye",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn invoke_frame_round_trips_with_its_request_id() {
        let (mut client, mut server) = duplex(4096);
        let frame = ClientFrame::Invoke {
            api_name: "BlogApi".into(),
            op_name: "CreateBlog".into(),
            args: serde_json::json!({ "url": "https://example.com" }),
        };
        write_client_frame(&mut client, 42, &frame).await.unwrap();
        let (request_id, decoded) = read_client_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(request_id, 42);
        match decoded {
            ClientFrame::Invoke { api_name, op_name, .. } => {
                assert_eq!(api_name, "BlogApi");
                assert_eq!(op_name, "CreateBlog");
            }
            _ => panic!("expected Invoke"),
        }
    }

    #[tokio::test]
    async fn hello_and_auth_frames_round_trip() {
        let (mut client, mut server) = duplex(4096);
        write_server_frame(&mut client, 1, &ServerFrame::Hello { server_name: "velox".into() })
            .await
            .unwrap();
        write_server_frame(
            &mut client,
            1,
            &ServerFrame::AuthChallenge { nonce: "abc".into() },
        )
        .await
        .unwrap();

        let (id1, hello) = read_server_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(id1, 1);
        assert!(matches!(hello, ServerFrame::Hello { .. }));
        let (id2, challenge) = read_server_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(id2, 1);
        assert!(matches!(challenge, ServerFrame::AuthChallenge { .. }));
    }

    #[tokio::test]
    async fn heartbeat_and_goodbye_carry_no_body() {
        let (mut client, mut server) = duplex(4096);
        write_client_frame(&mut client, 7, &ClientFrame::Heartbeat).await.unwrap();
        write_client_frame(&mut client, 8, &ClientFrame::Goodbye).await.unwrap();

        let (id, frame) = read_client_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(id, 7);
        assert!(matches!(frame, ClientFrame::Heartbeat));
        let (id, frame) = read_client_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(id, 8);
        assert!(matches!(frame, ClientFrame::Goodbye));
    }

    #[tokio::test]
    async fn clean_close_at_a_frame_boundary_reads_as_none() {
        let (client, mut server) = duplex(4096);
        drop(client);
        let decoded = read_client_frame(&mut server).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let (mut client, mut server) = duplex(4096);
        client.write_all(&[0u8; HEADER_LEN]).await.unwrap();
        let result = read_client_frame(&mut server).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = duplex(4096);
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&(FrameType::Invoke as u16).to_le_bytes());
        header[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        client.write_all(&header).await.unwrap();
        let result = read_client_frame(&mut server).await;
        assert!(result.is_err());
    }
}
