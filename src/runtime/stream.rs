use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpStream;

use crate::{
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    runtime,
};

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(not(target_os = "wasi"))]
const KEEPALIVE_TIME: Duration = Duration::from_secs(120);

/// Open a TCP stream to `address`, giving up after `connect_timeout` (or the default timeout when
/// none is configured). A zero timeout means no timeout.
pub(crate) async fn connect(
    address: &ServerAddress,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream> {
    let timeout = connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
    if timeout.is_zero() {
        return resolve_and_connect(address).await;
    }
    runtime::timeout(timeout, resolve_and_connect(address)).await?
}

async fn resolve_and_connect(address: &ServerAddress) -> Result<TcpStream> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((address.host(), address.port()))
        .await?
        .collect();
    if resolved.is_empty() {
        return Err(ErrorKind::Io(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No DNS results for domain {address}"),
        )))
        .into());
    }
    tcp_connect(resolved).await
}

async fn tcp_try_connect(address: &SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;

    #[cfg(not(target_os = "wasi"))]
    {
        let sock_ref = socket2::SockRef::from(&stream);
        let conf = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
        sock_ref.set_tcp_keepalive(&conf)?;
    }

    Ok(stream)
}

/// Try each resolved address in turn, IPv4 first, returning the first error if none of them
/// accepts the connection.
async fn tcp_connect(resolved: Vec<SocketAddr>) -> Result<TcpStream> {
    let (addrs_v4, addrs_v6): (Vec<_>, Vec<_>) = resolved
        .into_iter()
        .partition(|a| matches!(a, SocketAddr::V4(_)));

    let mut connect_error = None;
    for socket_addr in addrs_v4.iter().chain(addrs_v6.iter()) {
        match tcp_try_connect(socket_addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                connect_error.get_or_insert(e);
            }
        }
    }

    Err(connect_error.unwrap_or_else(|| {
        Error::internal("connecting to all DNS results failed but no error reported")
    }))
}
