use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::{Transport, TransportError};

const OK: u16 = 250;

/// Minimal Tor control port client that publishes an ephemeral onion
///  service forwarding to the local HTTP server.
#[derive(Clone)]
pub struct TorControl {
    control_addr: SocketAddr,
    virtual_port: u16,
    password: Option<String>,
}

impl fmt::Debug for TorControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorControl")
            .field("control_addr", &self.control_addr)
            .field("virtual_port", &self.virtual_port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TorControl {
    pub fn new(control_addr: SocketAddr, virtual_port: u16, password: Option<String>) -> Self {
        Self {
            control_addr,
            virtual_port,
            password,
        }
    }

    fn public_host(&self, service_id: &str) -> String {
        if self.virtual_port == 80 {
            format!("{}.onion", service_id)
        } else {
            format!("{}.onion:{}", service_id, self.virtual_port)
        }
    }
}

#[async_trait]
impl Transport for TorControl {
    async fn start_hidden_service(&self, local_port: u16) -> Result<String, TransportError> {
        let mut conn = ControlConnection::connect(self.control_addr).await?;

        let info = conn.command("PROTOCOLINFO", "PROTOCOLINFO 1").await?;
        let auth = AuthMethod::choose(&info, self.password.as_deref())?;
        let authenticate = auth.command().await?;
        conn.command("AUTHENTICATE", &authenticate).await?;

        // Detach keeps the service up after this connection closes
        let add_onion = format!(
            "ADD_ONION NEW:BEST Flags=Detach,DiscardPK Port={},127.0.0.1:{}",
            self.virtual_port, local_port
        );
        let reply = conn.command("ADD_ONION", &add_onion).await?;
        let service_id = reply
            .lines
            .iter()
            .find_map(|line| line.strip_prefix("ServiceID="))
            .ok_or_else(|| TransportError::Protocol("ADD_ONION reply has no ServiceID".into()))?;

        Ok(self.public_host(service_id))
    }
}

/// One complete control port reply; `lines` omit the status prefix
#[derive(Debug)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let (read, writer) = TcpStream::connect(addr).await?.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    async fn command(&mut self, name: &'static str, line: &str) -> Result<Reply, TransportError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;

        let reply = self.read_reply().await?;
        if reply.code != OK {
            return Err(TransportError::Rejected {
                command: name,
                code: reply.code,
                message: reply.lines.join(" "),
            });
        }
        Ok(reply)
    }

    async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| TransportError::Protocol(format!("bad status line: {}", line)))?;
            let rest = line.get(4..).unwrap_or_default().to_string();

            match line.as_bytes().get(3) {
                Some(b' ') => {
                    lines.push(rest);
                    return Ok(Reply { code, lines });
                }
                Some(b'-') => lines.push(rest),
                Some(b'+') => {
                    lines.push(rest);
                    // data block runs until a lone "."
                    while self.read_line().await? != "." {}
                }
                _ => return Err(TransportError::Protocol(format!("bad status line: {}", line))),
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(TransportError::Protocol(
                "control connection closed mid-reply".into(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AuthMethod {
    Null,
    Password(String),
    Cookie(PathBuf),
}

impl AuthMethod {
    /// Pick from the methods a PROTOCOLINFO reply advertises
    fn choose(info: &Reply, password: Option<&str>) -> Result<Self, TransportError> {
        let auth_line = info
            .lines
            .iter()
            .find_map(|line| line.strip_prefix("AUTH "))
            .ok_or_else(|| TransportError::Protocol("PROTOCOLINFO reply has no AUTH line".into()))?;

        let methods: Vec<&str> = auth_line
            .split(' ')
            .find_map(|field| field.strip_prefix("METHODS="))
            .map(|m| m.split(',').collect())
            .unwrap_or_default();
        let cookie_file = auth_line
            .find("COOKIEFILE=\"")
            .map(|start| unquote(&auth_line[start + "COOKIEFILE=".len()..]));

        if methods.contains(&"NULL") {
            return Ok(Self::Null);
        }
        if let Some(password) = password {
            if methods.contains(&"HASHEDPASSWORD") {
                return Ok(Self::Password(password.to_string()));
            }
        }
        if methods.contains(&"COOKIE") {
            if let Some(path) = cookie_file {
                return Ok(Self::Cookie(PathBuf::from(path)));
            }
        }
        Err(TransportError::NoAuthMethod(methods.join(",")))
    }

    async fn command(&self) -> Result<String, TransportError> {
        Ok(match self {
            Self::Null => "AUTHENTICATE".to_string(),
            Self::Password(password) => format!("AUTHENTICATE {}", quote(password)),
            Self::Cookie(path) => {
                let cookie = tokio::fs::read(path).await?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
        })
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Read a quoted string off the front of `s`, stopping at the closing quote
fn unquote(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.strip_prefix('"').unwrap_or(s).chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            c => out.push(c),
        }
    }
    out
}
