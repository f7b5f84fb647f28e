use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh_keys::agent::client::AgentClient;
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::DeployError;
use crate::russh::RusshTransport;

/// Connection parameters for one deployment target host.
pub struct SshConnectionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub config: client::Config,
    pub credential: Credential,
}

/// How the session authenticates.
pub enum Credential {
    /// SSH agent, either at an explicit socket path or via `SSH_AUTH_SOCK`.
    Agent { socket: Option<PathBuf> },
    /// Private key file, optionally passphrase-protected.
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
}

impl Credential {
    /// Applies the credential precedence: agent socket > private key >
    /// password. Falls back to `~/.ssh/id_rsa` when nothing is supplied,
    /// matching the conventional default.
    pub fn resolve(
        agent_socket: Option<PathBuf>,
        key_path: Option<PathBuf>,
        passphrase: Option<String>,
        password: Option<String>,
    ) -> Credential {
        if let Some(socket) = agent_socket {
            return Credential::Agent {
                socket: Some(socket),
            };
        }
        if let Some(path) = key_path {
            return Credential::PrivateKey {
                path: expand_home(path),
                passphrase,
            };
        }
        if let Some(password) = password {
            return Credential::Password(password);
        }
        Credential::PrivateKey {
            path: expand_home(PathBuf::from("~/.ssh/id_rsa")),
            passphrase: None,
        }
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path
}

impl<H> RusshTransport<H>
where
    H: client::Handler,
    H::Error: Debug,
{
    /// Establishes the session: TCP + handshake, authentication per the
    /// credential, then the SFTP subsystem channel. Must be called exactly
    /// once per deployment; there is no reconnect.
    pub async fn connect(
        handler: H,
        options: SshConnectionOptions,
    ) -> Result<RusshTransport<H>, DeployError> {
        let SshConnectionOptions {
            host,
            port,
            username,
            config,
            credential,
        } = options;

        debug!(%host, port, %username, "opening SSH session");

        let mut handle = client::connect(Arc::new(config), (host.as_str(), port), handler)
            .await
            .map_err(|err| DeployError::connection(&host, port, format!("{:?}", err)))?;

        let authenticated = match credential {
            Credential::Password(password) => handle
                .authenticate_password(username.clone(), password)
                .await
                .map_err(|err| DeployError::connection(&host, port, err))?,
            Credential::PrivateKey { path, passphrase } => {
                let key_pair = russh_keys::load_secret_key(&path, passphrase.as_deref())
                    .map_err(|err| DeployError::KeyFile {
                        path: path.clone(),
                        reason: err.to_string(),
                    })?;
                handle
                    .authenticate_publickey(username.clone(), Arc::new(key_pair))
                    .await
                    .map_err(|err| DeployError::connection(&host, port, err))?
            }
            Credential::Agent { socket } => {
                authenticate_with_agent(&mut handle, &host, port, &username, socket).await?
            }
        };

        if !authenticated {
            return Err(DeployError::connection(
                &host,
                port,
                "authentication rejected",
            ));
        }

        let sftp_channel = handle
            .channel_open_session()
            .await
            .map_err(|err| DeployError::connection(&host, port, err))?;
        sftp_channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| DeployError::connection(&host, port, err))?;
        let sftp_session = SftpSession::new(sftp_channel.into_stream())
            .await
            .map_err(|err| DeployError::connection(&host, port, err))?;

        Ok(RusshTransport {
            handle: Arc::new(Mutex::new(handle)),
            sftp_session: Arc::new(sftp_session),
            host,
            port,
            username,
        })
    }
}

async fn authenticate_with_agent<H>(
    handle: &mut client::Handle<H>,
    host: &str,
    port: u16,
    username: &str,
    socket: Option<PathBuf>,
) -> Result<bool, DeployError>
where
    H: client::Handler,
{
    let mut agent = match socket {
        Some(path) => AgentClient::connect_uds(path)
            .await
            .map_err(|err| DeployError::connection(host, port, err))?,
        None => AgentClient::connect_env()
            .await
            .map_err(|err| DeployError::connection(host, port, err))?,
    };

    let identities = agent
        .request_identities()
        .await
        .map_err(|err| DeployError::connection(host, port, err))?;

    for key in identities {
        let (returned_agent, result) = handle
            .authenticate_future(username.to_string(), key, agent)
            .await;
        agent = returned_agent;
        if let Ok(true) = result {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Client handler that accepts any server host key. Host-key pinning is the
/// caller's concern; supply a custom handler to enforce it.
#[derive(Debug)]
pub struct TrustingHandler {}

#[async_trait]
impl client::Handler for TrustingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
