/**
 * CONNECTION HANDLER - Traitement d'une connexion TCP
 *
 * RÔLE :
 * Une lecture bornée, puis décodage -> encodage -> publication -> écho.
 *
 * FONCTIONNEMENT :
 * - Fin de flux avant toute donnée : fermeture silencieuse
 * - Échec de décodage, d'encodage ou de publication : aucun écho
 * - Le flux appartient au handler et se ferme à chaque sortie
 */

use crate::bus::{PublishError, Publisher};
use crate::document::{self, EncodeError};
use crate::record::{self, AlarmRecord, DecodeError};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

/// Topic every alarm document is published on
pub const ALARM_TOPIC: &str = "topic/alarmConcentrator";

/// Size of the single read performed per connection
pub const READ_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    pub read_timeout: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self { read_timeout: Duration::from_secs(30) }
    }
}

/// How a connection ended when nothing went wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The client closed before sending anything
    Closed,
    /// A document was published and `echoed` bytes were written back
    Published { echoed: usize },
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("no data received within {0:?}")]
    ReadTimeout(Duration),

    #[error("cannot decode CSV record: {0}")]
    Decode(#[from] DecodeError),

    #[error("cannot encode JSON document: {0}")]
    Encode(#[from] EncodeError),

    #[error("cannot publish document: {0}")]
    Publish(#[from] PublishError),
}

/// Serve exactly one message on `stream`.
pub async fn handle_connection<S, P>(
    mut stream: S,
    publisher: &P,
    settings: &HandlerSettings,
) -> Result<Outcome, HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: Publisher + ?Sized,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];

    let received = match timeout(settings.read_timeout, stream.read(&mut buf)).await {
        Err(_) => return Err(HandlerError::ReadTimeout(settings.read_timeout)),
        Ok(Err(e)) => return Err(HandlerError::Read(e)),
        Ok(Ok(0)) => {
            debug!("client closed the connection before sending data");
            return Ok(Outcome::Closed);
        }
        Ok(Ok(n)) => n,
    };
    debug!(bytes = received, raw = %String::from_utf8_lossy(&buf[..received]), "request received");

    // the whole fixed-size buffer goes to the decoder, padding included
    let rows = record::decode_rows(&buf)?;
    debug!(lines = rows.len(), "CSV decoded");
    for row in &rows {
        debug!(count = row.len(), elements = ?row, "CSV row");
    }

    let alarm = AlarmRecord::from_rows(&rows);
    let json = document::encode(&alarm)?;
    debug!(document = %json, "document encoded");

    publisher.publish(ALARM_TOPIC, &json).await?;

    // echo is best effort, the client may already be gone
    let echoed = match stream.write_all(&buf[..received]).await {
        Ok(()) => {
            let _ = stream.flush().await;
            received
        }
        Err(e) => {
            debug!(error = %e, "echo to client failed");
            0
        }
    };
    let _ = stream.shutdown().await;

    Ok(Outcome::Published { echoed })
}
