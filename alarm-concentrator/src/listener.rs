/**
 * LISTENER - Boucle d'acceptation TCP, une task tokio par connexion
 *
 * Les erreurs d'une connexion restent dans sa task, l'écoute continue.
 */

use crate::bus::Publisher;
use crate::handler::{handle_connection, HandlerSettings, Outcome};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, Instrument};

/// Bind on all local IPv4 interfaces.
pub async fn bind(port: u16) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
}

/// Accept connections until `shutdown` resolves. Every connection runs in
/// its own task; a failing connection never stops the loop.
pub async fn serve<P, F>(
    listener: TcpListener,
    publisher: Arc<P>,
    settings: Arc<HandlerSettings>,
    shutdown: F,
) -> io::Result<()>
where
    P: Publisher + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "listener accept failed");
                        // fd exhaustion and friends, avoid spinning
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };

                let span = info_span!("connection", id = next_id, %peer);
                next_id += 1;
                let publisher = publisher.clone();
                let settings = settings.clone();
                tokio::spawn(
                    async move { serve_connection(stream, &*publisher, &settings).await }.instrument(span),
                );
            }
        }
    }
}

async fn serve_connection<P>(stream: TcpStream, publisher: &P, settings: &HandlerSettings)
where
    P: Publisher + ?Sized,
{
    debug!("connection accepted");
    match handle_connection(stream, publisher, settings).await {
        Ok(Outcome::Closed) => debug!("client closed the connection"),
        Ok(Outcome::Published { echoed }) => info!(echoed, "alarm forwarded"),
        Err(e) => error!(error = %e, "connection aborted"),
    }
}
