use tiberius::{AuthMethod, Client, Config as TiberiusConfig};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::{ConnectionProfile, Credentials};
use crate::error::TransferError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

const DEFAULT_PORT: u16 = 1433;

pub(super) fn build_tiberius_config(
    profile: &ConnectionProfile,
) -> Result<TiberiusConfig, TransferError> {
    let mut config = TiberiusConfig::new();
    config.host(&profile.server);
    config.database(&profile.catalog);
    config.port(profile.port.unwrap_or(DEFAULT_PORT));
    config.authentication(auth_method(&profile.credentials)?);
    if let Some(instance) = &profile.instance_name {
        config.instance_name(instance);
    }
    config.trust_cert();
    Ok(config)
}

fn auth_method(credentials: &Credentials) -> Result<AuthMethod, TransferError> {
    match credentials {
        Credentials::Login { user, password } => Ok(AuthMethod::sql_server(user, password)),
        #[cfg(windows)]
        Credentials::Integrated => Ok(AuthMethod::Integrated),
        #[cfg(not(windows))]
        Credentials::Integrated => Err(TransferError::ConnectionError(
            "integrated authentication is only available on Windows; supply a login".into(),
        )),
    }
}

/// Open a new SQL Server connection for `profile`.
///
/// # Errors
/// Returns `TransferError::ConnectionError` if the TCP or TDS handshake fails.
pub async fn create_mssql_client(profile: &ConnectionProfile) -> Result<MssqlClient, TransferError> {
    let config = build_tiberius_config(profile)?;

    let tcp = if profile.instance_name.is_some() {
        use tiberius::SqlBrowser;
        TcpStream::connect_named(&config).await.map_err(|e| {
            TransferError::ConnectionError(format!("SQL Browser lookup failed: {e}"))
        })?
    } else {
        TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| TransferError::ConnectionError(format!("TCP connection error: {e}")))?
    };
    tcp.set_nodelay(true)
        .map_err(|e| TransferError::ConnectionError(format!("TCP configuration error: {e}")))?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| TransferError::ConnectionError(format!("SQL Server connection error: {e}")))
}
