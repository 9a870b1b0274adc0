//! Host/port resolution for the socket transports. Failures are reported, never retried.

use std::net::SocketAddr;

use sockline_core::address;
use tokio::net::lookup_host;

use crate::error::{Error, Result};

/// Every socket address `host:port` resolves to, in resolver order.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let target = address(host, port);
    let addrs: Vec<SocketAddr> = lookup_host(target.as_str())
        .await
        .map_err(|e| Error::Resolve(format!("{target}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Resolve(target));
    }
    Ok(addrs)
}

/// First resolved address; what listeners bind to and UDP clients connect to.
pub async fn resolve_first(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs = resolve(host, port).await?;
    addrs
        .into_iter()
        .next()
        .ok_or_else(|| Error::Resolve(address(host, port)))
}
