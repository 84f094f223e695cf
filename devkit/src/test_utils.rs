/*!
Helpers TCP pour les tests d'intégration

Jouent le rôle d'une source d'alarmes : connexion, envoi d'un enregistrement,
lecture de l'écho jusqu'à la fermeture par le serveur.
*/

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// Init logging pour tests (RUST_LOG, sinon warn)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Adresse localhost sur laquelle plus rien n'écoute
pub fn unused_local_addr() -> std::io::Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    listener.local_addr()
}

/// Envoie `payload` et renvoie tout ce que le serveur écrit avant de fermer
pub async fn send_and_read(addr: SocketAddr, payload: &[u8], wait: Duration) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await.context("connect to concentrator")?;
    stream.write_all(payload).await?;

    let mut echoed = Vec::new();
    timeout(wait, stream.read_to_end(&mut echoed))
        .await
        .context("timeout waiting for the server to close")??;
    Ok(echoed)
}

/// Connexion fermée côté client sans rien envoyer
pub async fn connect_and_close(addr: SocketAddr, wait: Duration) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await.context("connect to concentrator")?;
    stream.shutdown().await?;

    let mut echoed = Vec::new();
    timeout(wait, stream.read_to_end(&mut echoed))
        .await
        .context("timeout waiting for the server to close")??;
    Ok(echoed)
}
