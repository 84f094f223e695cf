/*!
Stub de broker MQTT pour tests sans broker réel

Parle juste assez de MQTT 3.1.1 (CONNECT/CONNACK, PUBLISH, PINGREQ, DISCONNECT)
pour qu'un vrai client rumqttc puisse publier. Enregistre tous les messages
publiés pour les assertions.
*/

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

/// CONNACK return code 5: not authorized
const NOT_AUTHORIZED: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
struct Shared {
    refuse: bool,
    published: Mutex<Vec<StubMessage>>,
    client_ids: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

/// Broker stub listening on an ephemeral localhost port
pub struct BrokerStub {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl BrokerStub {
    /// Broker acceptant toutes les connexions
    pub async fn start() -> Result<Self> {
        Self::spawn(false).await
    }

    /// Broker répondant "not authorized" à chaque CONNECT
    pub async fn start_refusing() -> Result<Self> {
        Self::spawn(true).await
    }

    async fn spawn(refuse: bool) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared { refuse, ..Default::default() });

        let task_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let shared = task_shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_session(stream, &shared).await {
                        debug!("[stub] session {peer} ended: {e:#}");
                    }
                });
            }
        });

        Ok(Self { addr, shared, accept_task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Récupère tous les messages publiés
    pub fn published_messages(&self) -> Vec<StubMessage> {
        self.shared.published.lock().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<StubMessage> {
        self.shared
            .published
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Attend au moins `count` messages sur `topic`
    pub async fn wait_for_messages(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<StubMessage>> {
        let start = Instant::now();
        loop {
            let messages = self.find_messages_by_topic(topic);
            if messages.len() >= count {
                return Ok(messages);
            }
            if start.elapsed() >= timeout {
                bail!(
                    "timeout waiting for {count} messages on {topic}, got {}",
                    messages.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Attend `count` DISCONNECT propres
    pub async fn wait_for_disconnects(&self, count: usize, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.disconnect_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.disconnect_count() >= count
    }

    /// Nombre de CONNECT reçus
    pub fn connection_count(&self) -> usize {
        self.shared.client_ids.lock().len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.shared.client_ids.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.shared.disconnects.load(Ordering::Relaxed)
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.shared.published.lock().clear();
        self.shared.client_ids.lock().clear();
        self.shared.disconnects.store(0, Ordering::Relaxed);
    }
}

impl Drop for BrokerStub {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn run_session(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    loop {
        let header = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let len = read_remaining_length(&mut stream).await?;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        match header >> 4 {
            CONNECT => {
                let client_id = parse_client_id(&body)?;
                debug!("[stub] CONNECT from {client_id}");
                shared.client_ids.lock().push(client_id);
                let code = if shared.refuse { NOT_AUTHORIZED } else { 0x00 };
                stream.write_all(&[0x20, 0x02, 0x00, code]).await?;
                if shared.refuse {
                    return Ok(());
                }
            }
            PUBLISH => {
                let (msg, pkid) = parse_publish(header, &body)?;
                if let Some(pkid) = pkid {
                    // PUBACK, QoS 2 n'est pas géré
                    let [hi, lo] = pkid.to_be_bytes();
                    stream.write_all(&[0x40, 0x02, hi, lo]).await?;
                }
                debug!("[stub] PUBLISH {} ({} bytes)", msg.topic, msg.payload.len());
                shared.published.lock().push(msg);
            }
            PINGREQ => stream.write_all(&[0xD0, 0x00]).await?,
            DISCONNECT => {
                shared.disconnects.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            other => debug!("[stub] ignored packet type {other}"),
        }
    }
}

async fn read_remaining_length(stream: &mut TcpStream) -> Result<usize> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for _ in 0..4 {
        let byte = stream.read_u8().await?;
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    bail!("malformed remaining length")
}

/// Chaîne MQTT préfixée par sa longueur (u16 big endian)
fn read_str(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let len_bytes = buf.get(offset..offset + 2).context("truncated string length")?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = offset + 2;
    let raw = buf.get(start..start + len).context("truncated string")?;
    Ok((String::from_utf8(raw.to_vec())?, start + len))
}

fn parse_client_id(body: &[u8]) -> Result<String> {
    // protocol name, level (1), flags (1), keep alive (2)
    let (_protocol, offset) = read_str(body, 0)?;
    let (client_id, _) = read_str(body, offset + 4)?;
    Ok(client_id)
}

fn parse_publish(header: u8, body: &[u8]) -> Result<(StubMessage, Option<u16>)> {
    let qos = (header >> 1) & 0x03;
    let retain = header & 0x01 == 1;
    let (topic, mut offset) = read_str(body, 0)?;

    let pkid = if qos > 0 {
        let raw = body.get(offset..offset + 2).context("truncated packet id")?;
        offset += 2;
        Some(u16::from_be_bytes([raw[0], raw[1]]))
    } else {
        None
    };

    let msg = StubMessage { topic, payload: body[offset..].to_vec(), qos, retain };
    Ok((msg, pkid))
}
