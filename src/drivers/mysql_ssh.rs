//! MySQL over an SSH tunnel.
//!
//! Registered under the synthetic `mysql+ssh` scheme. The address part of
//! the DSN is a compound tunnel address; the driver opens the tunnel,
//! rewrites the address to the local listener, and delegates to the plain
//! MySQL driver. The returned connection owns the tunnel so both are torn
//! down together.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::contract::{Connection, Database, Driver};
use crate::drivers::mysql::MySqlDriver;
use crate::dsn::Dsn;
use crate::error::Result;
use crate::tunnel::{SshTunnel, TunnelAddress};

#[derive(Debug)]
pub struct MySqlSshDriver;

impl MySqlSshDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MySqlSshDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MySqlSshDriver {
    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>> {
        let parsed = Dsn::parse(dsn)?;
        let addr = TunnelAddress::parse(&parsed.address)?;

        let tunnel = SshTunnel::open(addr).await?;
        let local_dsn = parsed.with_address("mysql", &tunnel.local_addr());
        debug!(local = %tunnel.local_addr(), "dialing through tunnel");

        let inner = MySqlDriver::new().connect(&local_dsn).await?;

        Ok(Arc::new(TunneledConnection {
            inner,
            _tunnel: tunnel,
        }))
    }
}

/// A connection whose lifetime pins the tunnel it dials through.
struct TunneledConnection {
    inner: Arc<dyn Connection>,
    _tunnel: SshTunnel,
}

#[async_trait]
impl Connection for TunneledConnection {
    async fn databases(&self) -> Result<Vec<String>> {
        self.inner.databases().await
    }

    async fn use_database(&self, name: &str) -> Result<Arc<dyn Database>> {
        self.inner.use_database(name).await
    }

    async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    fn last_error(&self) -> Option<String> {
        self.inner.last_error()
    }
}
