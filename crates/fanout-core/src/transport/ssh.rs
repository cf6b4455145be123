//! `russh`-backed SSH transport.
//!
//! Password authentication only. Server host keys are accepted without
//! verification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;

use super::{CommandOutput, Connector, RemoteSession};
use crate::frame::{ConnectionError, ExecutionError};
use crate::host::HostDescriptor;

/// Default bound on establishing a connection, including the SSH handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client handler that trusts every server key.
struct AcceptAnyServerKey;

#[async_trait]
impl client::Handler for AcceptAnyServerKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens SSH connections with a per-connection timeout.
#[derive(Clone)]
pub struct SshConnector {
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl std::fmt::Debug for SshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn connect(
        &self,
        target: &HostDescriptor,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        let port: u16 = target
            .port()
            .parse()
            .map_err(|_| ConnectionError::new(format!("invalid port {:?}", target.port())))?;

        let connecting = client::connect(
            Arc::clone(&self.config),
            (target.host().to_owned(), port),
            AcceptAnyServerKey,
        );

        let handle = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(ConnectionError::new(format!(
                    "dial {}:{port}: {e}",
                    target.host()
                )));
            }
            Err(_) => {
                return Err(ConnectionError::new(format!(
                    "dial {}:{port}: timed out after {:?}",
                    target.host(),
                    self.connect_timeout
                )));
            }
        };

        Ok(Box::new(SshSession {
            handle,
            channel: None,
            closed: false,
        }))
    }
}

/// A live SSH connection owned by one Runner.
struct SshSession {
    handle: Handle<AcceptAnyServerKey>,
    channel: Option<Channel<Msg>>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn authenticate(
        &mut self,
        username: &str,
        credential: &str,
    ) -> Result<(), ConnectionError> {
        match self.handle.authenticate_password(username, credential).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ConnectionError::new(format!(
                "password authentication rejected for user {username:?}"
            ))),
            Err(e) => Err(ConnectionError::new(format!("authentication failed: {e}"))),
        }
    }

    async fn open_channel(&mut self) -> Result<(), ConnectionError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::new(format!("failed to open session: {e}")))?;
        self.channel = Some(channel);
        Ok(())
    }

    async fn execute(&mut self, payload: &str) -> CommandOutput {
        let Some(channel) = self.channel.as_mut() else {
            return CommandOutput::failed(
                Vec::new(),
                ExecutionError::Channel("no open session channel".to_owned()),
            );
        };

        if let Err(e) = channel.exec(true, payload).await {
            return CommandOutput::failed(Vec::new(), ExecutionError::Channel(e.to_string()));
        }

        let mut output = Vec::new();
        let mut exit_status = None;
        let mut exit_signal = None;

        // Exit status can arrive before the last data packet, so drain until
        // the server closes the channel.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit_signal = Some(format!("{signal_name:?}"));
                }
                _ => {}
            }
        }

        let error = match (exit_status, exit_signal) {
            (Some(0), _) => None,
            (Some(code), _) => Some(ExecutionError::NonZeroExit { code }),
            (None, Some(signal)) => Some(ExecutionError::Signal { signal }),
            (None, None) => Some(ExecutionError::MissingExitStatus),
        };

        CommandOutput { output, error }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(channel) = self.channel.take() {
            // The server usually closed the channel already; nothing to report.
            let _ = channel.close().await;
        }

        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!(error = %e, "ssh disconnect after session end");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::{ChannelId, CryptoVec, server};

    fn descriptor(line: &str) -> HostDescriptor {
        HostDescriptor::parse(line).unwrap()
    }

    #[tokio::test]
    async fn non_numeric_port_is_connection_error() {
        let connector = SshConnector::default();
        let err = match connector.connect(&descriptor("alice@127.0.0.1:ssh")).await {
            Err(e) => e,
            Ok(_) => panic!("connect should fail on a non-numeric port"),
        };
        assert!(err.message.contains("invalid port"), "got: {err}");
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        // Grab a free port, then release it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new(Duration::from_secs(5));
        let target = descriptor(&format!("alice@127.0.0.1:{port}"));
        let err = match connector.connect(&target).await {
            Err(e) => e,
            Ok(_) => panic!("connect should fail with nothing listening"),
        };
        assert!(err.message.contains(&port.to_string()), "got: {err}");
    }

    #[tokio::test]
    async fn silent_server_hits_connect_timeout() {
        // Accepts TCP but never sends an SSH banner.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = SshConnector::new(Duration::from_millis(200));
        let target = descriptor(&format!("alice@127.0.0.1:{port}"));
        let err = match connector.connect(&target).await {
            Err(e) => e,
            Ok(_) => panic!("connect should time out against a silent server"),
        };
        assert!(err.message.contains("timed out"), "got: {err}");
        drop(listener);
    }

    /// What the in-process server does after running an `exec` request.
    #[derive(Clone, Copy)]
    enum ExecReply {
        ExitWith(u32),
        CloseWithoutStatus,
    }

    /// Server side of one test connection: accepts only `hunter2`, writes one
    /// stdout and one stderr line per exec, then ends the channel.
    struct ShellHandler {
        reply: ExecReply,
        channels: Vec<Channel<server::Msg>>,
    }

    #[async_trait]
    impl server::Handler for ShellHandler {
        type Error = russh::Error;

        async fn auth_password(
            &mut self,
            _user: &str,
            password: &str,
        ) -> Result<server::Auth, Self::Error> {
            if password == "hunter2" {
                Ok(server::Auth::Accept)
            } else {
                Ok(server::Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }

        async fn channel_open_session(
            &mut self,
            channel: Channel<server::Msg>,
            _session: &mut server::Session,
        ) -> Result<bool, Self::Error> {
            self.channels.push(channel);
            Ok(true)
        }

        async fn exec_request(
            &mut self,
            channel: ChannelId,
            _command: &[u8],
            session: &mut server::Session,
        ) -> Result<(), Self::Error> {
            let _ = session.data(channel, CryptoVec::from_slice(b"out\n"));
            let _ = session.extended_data(channel, 1, CryptoVec::from_slice(b"err\n"));
            if let ExecReply::ExitWith(code) = self.reply {
                let _ = session.exit_status_request(channel, code);
            }
            let _ = session.eof(channel);
            let _ = session.close(channel);
            Ok(())
        }
    }

    /// Serve SSH on a loopback port until the test runtime shuts down.
    async fn spawn_server(reply: ExecReply) -> u16 {
        let config = Arc::new(server::Config {
            keys: vec![russh_keys::key::KeyPair::generate_ed25519().unwrap()],
            auth_rejection_time: Duration::from_millis(10),
            ..Default::default()
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = ShellHandler {
                    reply,
                    channels: Vec::new(),
                };
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Ok(running) = server::run_stream(config, socket, handler).await {
                        let _ = running.await;
                    }
                });
            }
        });
        port
    }

    async fn connect_to(port: u16) -> Box<dyn RemoteSession> {
        let connector = SshConnector::new(Duration::from_secs(5));
        match connector
            .connect(&descriptor(&format!("alice@127.0.0.1:{port}")))
            .await
        {
            Ok(session) => session,
            Err(e) => panic!("connect to local server failed: {e}"),
        }
    }

    #[tokio::test]
    async fn wrong_password_is_connection_error() {
        let port = spawn_server(ExecReply::ExitWith(0)).await;
        let mut session = connect_to(port).await;

        let err = session.authenticate("alice", "wrong").await.unwrap_err();
        assert!(err.message.contains("rejected"), "got: {err}");
        session.close().await;
    }

    #[tokio::test]
    async fn zero_exit_status_is_success_with_combined_output() {
        let port = spawn_server(ExecReply::ExitWith(0)).await;
        let mut session = connect_to(port).await;

        session.authenticate("alice", "hunter2").await.unwrap();
        session.open_channel().await.unwrap();
        let result = session.execute("uptime").await;
        session.close().await;

        assert_eq!(result, CommandOutput::success(b"out\nerr\n".to_vec()));
    }

    #[tokio::test]
    async fn nonzero_exit_keeps_output_and_reports_code() {
        let port = spawn_server(ExecReply::ExitWith(1)).await;
        let mut session = connect_to(port).await;

        session.authenticate("alice", "hunter2").await.unwrap();
        session.open_channel().await.unwrap();
        let result = session.execute("false").await;
        session.close().await;

        assert_eq!(result.output, b"out\nerr\n");
        assert_eq!(result.error, Some(ExecutionError::NonZeroExit { code: 1 }));
    }

    #[tokio::test]
    async fn channel_closed_without_status_is_execution_error() {
        let port = spawn_server(ExecReply::CloseWithoutStatus).await;
        let mut session = connect_to(port).await;

        session.authenticate("alice", "hunter2").await.unwrap();
        session.open_channel().await.unwrap();
        let result = session.execute("sleep 1").await;
        session.close().await;

        assert_eq!(result.output, b"out\nerr\n");
        assert_eq!(result.error, Some(ExecutionError::MissingExitStatus));
    }

    #[tokio::test]
    async fn execute_without_channel_is_execution_error() {
        let port = spawn_server(ExecReply::ExitWith(0)).await;
        let mut session = connect_to(port).await;

        session.authenticate("alice", "hunter2").await.unwrap();
        let result = session.execute("uptime").await;
        session.close().await;
        session.close().await;

        assert!(result.output.is_empty());
        assert!(matches!(result.error, Some(ExecutionError::Channel(_))));
    }

    #[test]
    fn default_timeout_is_ten_seconds() {
        assert_eq!(
            SshConnector::default().connect_timeout(),
            Duration::from_secs(10)
        );
    }
}
