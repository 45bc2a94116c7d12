use std::io::BufReader;

use rustls::ClientConfig;
use sink_config::shared::{IntoConnectOptions, PgConnectionConfig};
use tokio::sync::Mutex;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info, Instrument};

use crate::error::{ErrorKind, SinkResult};
use crate::sink_error;

/// Spawns a background task driving a PostgreSQL connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(e) = connection.await {
            error!("an error occurred during the postgres connection: {}", e);
            return;
        }

        debug!("postgres connection terminated successfully")
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Reusable connections to the destination database.
///
/// Connections are opened on demand and handed back after use. Closed connections are
/// dropped instead of being reused, so a lost connection is replaced on the next use.
#[derive(Debug)]
pub struct PgClientPool {
    config: PgConnectionConfig,
    idle: Mutex<Vec<Client>>,
}

impl PgClientPool {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Returns an open connection, establishing one when none is idle.
    pub async fn acquire(&self) -> SinkResult<Client> {
        loop {
            let Some(client) = self.idle.lock().await.pop() else {
                break;
            };

            if !client.is_closed() {
                return Ok(client);
            }
            debug!("discarding closed postgres connection");
        }

        self.connect().await
    }

    /// Hands `client` back for reuse.
    pub async fn release(&self, client: Client) {
        if client.is_closed() {
            return;
        }

        self.idle.lock().await.push(client);
    }

    async fn connect(&self) -> SinkResult<Client> {
        match self.config.tls.enabled {
            true => self.connect_tls().await,
            false => self.connect_no_tls().await,
        }
    }

    async fn connect_no_tls(&self) -> SinkResult<Client> {
        let config: Config = self.config.with_db();

        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        info!(
            host = self.config.host,
            dbname = self.config.name,
            "connected to postgres without tls"
        );

        Ok(client)
    }

    async fn connect_tls(&self) -> SinkResult<Client> {
        let config: Config = self.config.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader = BufReader::new(self.config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert?;
            root_store.add(cert).map_err(|err| {
                sink_error!(
                    ErrorKind::ConfigError,
                    "Invalid trusted root certificate",
                    err
                )
            })?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        info!(
            host = self.config.host,
            dbname = self.config.name,
            "connected to postgres with tls"
        );

        Ok(client)
    }
}
