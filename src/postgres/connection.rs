// ABOUTME: PostgreSQL connection setup for the destination store
// ABOUTME: Bounded connect, optional native-tls, background connection task

use anyhow::Context;
use tokio_postgres::{Client, Config, NoTls};

use crate::config::DestinationConfig;
use crate::error::{ReplicatorError, Result};

fn pg_config(dest: &DestinationConfig) -> Config {
    let mut config = Config::new();
    config
        .host(&dest.host)
        .port(dest.port)
        .dbname(&dest.database)
        .user(&dest.user)
        .application_name("device-replicator")
        .connect_timeout(dest.connect_timeout());
    if !dest.password.is_empty() {
        config.password(&dest.password);
    }
    config
}

/// Connect to the destination database.
///
/// The connection future is driven on a spawned task; errors on it are
/// logged and surface on the next query through the returned client.
pub async fn connect(dest: &DestinationConfig) -> Result<Client> {
    if !dest.is_configured() {
        return Err(ReplicatorError::Config(
            "destination.host and destination.database must be set".to_string(),
        ));
    }

    let endpoint = dest.endpoint();
    let config = pg_config(dest);
    tracing::debug!("Connecting to PostgreSQL at {}", endpoint);

    let client = if dest.tls {
        let connector = native_tls::TlsConnector::builder()
            .build()
            .context("Failed to build TLS connector")
            .map_err(|source| ReplicatorError::DestinationConnect {
                endpoint: endpoint.clone(),
                source,
            })?;
        let tls = postgres_native_tls::MakeTlsConnector::new(connector);
        let (client, connection) = config.connect(tls).await.map_err(|e| {
            ReplicatorError::DestinationConnect {
                endpoint: endpoint.clone(),
                source: e.into(),
            }
        })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });
        client
    } else {
        let (client, connection) =
            config
                .connect(NoTls)
                .await
                .map_err(|e| ReplicatorError::DestinationConnect {
                    endpoint: endpoint.clone(),
                    source: e.into(),
                })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });
        client
    };

    tracing::info!("Connected to PostgreSQL at {}", endpoint);
    Ok(client)
}
