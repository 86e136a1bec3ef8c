//! SSH port-forwarding tunnel.
//!
//! A transparent TCP-to-SSH-channel relay: a local listener accepts
//! connections one at a time and, for each, opens a fresh SSH client
//! connection to the jump host, a direct-tcpip channel to the final
//! destination, and two relay tasks that shuttle bytes until either side
//! closes.
//!
//! Host keys are accepted without verification. This is an intentional
//! trade-off carried over from the existing deployment model.

use std::fmt;
use std::sync::Arc;

use russh::client;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Decomposed compound tunnel address:
/// `destHost[:destPort],sshHost[:sshPort];AGENT_ENV_VAR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAddress {
    /// Final destination, as reachable from the jump host.
    pub remote: Endpoint,
    /// The SSH jump host.
    pub server: Endpoint,
    /// Environment variable naming the SSH agent socket path.
    pub agent_env: String,
}

impl TunnelAddress {
    pub fn parse(addr: &str) -> Result<Self> {
        let bad = || Error::InvalidDsn(format!("tunnel address: {addr}"));

        let (local_half, remote_half) = addr.split_once(',').ok_or_else(bad)?;

        let remote = match local_half.split(':').collect::<Vec<_>>()[..] {
            [host] => Endpoint {
                host: host.to_owned(),
                port: 3306,
            },
            [host, port] => Endpoint {
                host: host.to_owned(),
                port: port.parse().map_err(|_| bad())?,
            },
            _ => return Err(bad()),
        };

        let (server, agent_env) = match remote_half.split(';').collect::<Vec<_>>()[..] {
            [host, agent_env] => (
                Endpoint {
                    host: host.to_owned(),
                    port: 22,
                },
                agent_env,
            ),
            [host, port, agent_env] => (
                Endpoint {
                    host: host.to_owned(),
                    port: port.parse().map_err(|_| bad())?,
                },
                agent_env,
            ),
            _ => return Err(bad()),
        };

        if remote.host.is_empty() || server.host.is_empty() || agent_env.is_empty() {
            return Err(bad());
        }

        Ok(Self {
            remote,
            server,
            agent_env: agent_env.to_owned(),
        })
    }
}

struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An active tunnel: a bound local listener and its accept-loop task.
pub struct SshTunnel {
    local: Endpoint,
    accept_task: JoinHandle<()>,
}

impl SshTunnel {
    /// Binds an ephemeral local port and starts relaying to `addr`.
    pub async fn open(addr: TunnelAddress) -> Result<Self> {
        let agent_path = std::env::var(&addr.agent_env)
            .map_err(|_| Error::Ssh(format!("{} is not set", addr.agent_env)))?;
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .map_err(|_| Error::ssh("cannot determine the current user"))?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let bound = listener.local_addr()?;
        let local = Endpoint {
            host: bound.ip().to_string(),
            port: bound.port(),
        };

        debug!(local = %local, server = %addr.server, remote = %addr.remote, "tunnel listening");

        let accept_task = tokio::spawn(accept_loop(listener, addr, user, agent_path));

        Ok(Self { local, accept_task })
    }

    pub fn local_port(&self) -> u16 {
        self.local.port
    }

    pub fn local_addr(&self) -> String {
        self.local.to_string()
    }

    pub fn close(&self) {
        self.accept_task.abort();
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, addr: TunnelAddress, user: String, agent_path: String) {
    loop {
        let socket = match listener.accept().await {
            Ok((socket, _)) => socket,
            Err(err) => {
                warn!(%err, "tunnel accept failed");
                break;
            }
        };

        let addr = addr.clone();
        let user = user.clone();
        let agent_path = agent_path.clone();
        tokio::spawn(async move {
            if let Err(err) = forward(socket, &addr, &user, &agent_path).await {
                warn!(%err, server = %addr.server, "tunnel relay failed");
            }
        });
    }
}

/// Relays one accepted socket over a fresh SSH connection.
async fn forward(local: TcpStream, addr: &TunnelAddress, user: &str, agent_path: &str) -> Result<()> {
    let config = Arc::new(client::Config::default());
    let mut handle = client::connect(
        config,
        (addr.server.host.as_str(), addr.server.port),
        AcceptAnyHostKey,
    )
    .await
    .map_err(Error::ssh)?;

    let mut agent = AgentClient::connect_uds(agent_path).await.map_err(Error::ssh)?;
    let identities = agent.request_identities().await.map_err(Error::ssh)?;

    let mut authenticated = false;
    for key in identities {
        let auth = handle
            .authenticate_publickey_with(user, key, None, &mut agent)
            .await
            .map_err(Error::ssh)?;
        if auth.success() {
            authenticated = true;
            break;
        }
    }
    if !authenticated {
        return Err(Error::ssh("ssh agent offered no usable identity"));
    }

    let channel = handle
        .channel_open_direct_tcpip(
            addr.remote.host.clone(),
            u32::from(addr.remote.port),
            "127.0.0.1",
            0,
        )
        .await
        .map_err(Error::ssh)?;

    let (mut local_read, mut local_write) = local.into_split();
    let (mut remote_read, mut remote_write) = tokio::io::split(channel.into_stream());

    let up = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut local_read, &mut remote_write).await;
        let _ = remote_write.shutdown().await;
    });
    let down = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut remote_read, &mut local_write).await;
        let _ = local_write.shutdown().await;
    });

    let _ = tokio::join!(up, down);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_compound_address() {
        let addr =
            TunnelAddress::parse("localhost:3306,jump.host;22;SSH_AUTH_SOCK").expect("should parse");

        assert_eq!(addr.remote, Endpoint { host: "localhost".into(), port: 3306 });
        assert_eq!(addr.server, Endpoint { host: "jump.host".into(), port: 22 });
        assert_eq!(addr.agent_env, "SSH_AUTH_SOCK");
    }

    #[test]
    fn destination_port_defaults_to_3306() {
        let addr = TunnelAddress::parse("db.internal,jump.host;2222;SSH_AUTH_SOCK")
            .expect("should parse");

        assert_eq!(addr.remote.port, 3306);
        assert_eq!(addr.server.port, 2222);
    }

    #[test]
    fn ssh_port_defaults_to_22() {
        let addr = TunnelAddress::parse("db.internal:3307,jump.host;SSH_AUTH_SOCK")
            .expect("should parse");

        assert_eq!(addr.remote.port, 3307);
        assert_eq!(addr.server.port, 22);
    }

    #[test]
    fn wrong_segment_counts_are_rejected() {
        assert!(TunnelAddress::parse("no-comma-here").is_err());
        assert!(TunnelAddress::parse("a:1:2,jump;22;SSH_AUTH_SOCK").is_err());
        assert!(TunnelAddress::parse("db,jump").is_err());
        assert!(TunnelAddress::parse("db,jump;22;SSH_AUTH_SOCK;extra").is_err());
    }

    #[test]
    fn non_numeric_ports_are_rejected() {
        assert!(TunnelAddress::parse("db:abc,jump;22;SSH_AUTH_SOCK").is_err());
        assert!(TunnelAddress::parse("db:3306,jump;abc;SSH_AUTH_SOCK").is_err());
    }
}
