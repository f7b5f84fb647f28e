pub mod connection;
mod transport;

use std::sync::Arc;

use russh::client;
use tokio::sync::Mutex;

/// SSH transport backed by russh. One instance holds one authenticated
/// session; command channels are opened per operation on the shared handle,
/// file transfers ride a single SFTP subsystem channel.
pub struct RusshTransport<H>
where
    H: client::Handler,
    H: 'static,
{
    handle: Arc<Mutex<client::Handle<H>>>,
    sftp_session: Arc<russh_sftp::client::SftpSession>,
    host: String,
    port: u16,
    username: String,
}
