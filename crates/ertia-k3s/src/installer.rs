//! K3S server and agent installation over a remote session

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ertia_common::Secret;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::artifact::InstallerArtifact;
use crate::command::{CommandOutput, RemoteCommand};
use crate::error::K3sError;
use crate::kubeconfig;
use crate::session::{OpenSshConnector, RemoteSession, SessionOpener};
use crate::{
    Attempt, ClusterInstaller, InstallTarget, JoinConfig, MasterInstall, Result,
    K3S_KUBECONFIG_PATH, NODE_TOKEN_PATH,
};

/// Environment variable selecting the K3S release channel
pub const CHANNEL_ENV: &str = "INSTALL_K3S_CHANNEL";
/// Environment variable carrying the join URL
pub const URL_ENV: &str = "K3S_URL";
/// Environment variable carrying the join token
pub const TOKEN_ENV: &str = "K3S_TOKEN";

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables of the install protocol
#[derive(Clone, Debug)]
pub struct InstallSettings {
    /// Upper bound for each remote command
    pub command_timeout: Duration,
    /// Local path the admin kubeconfig is written to
    pub kubeconfig_path: PathBuf,
}

impl InstallSettings {
    /// Settings writing the kubeconfig to `kubeconfig_path`
    pub fn new(kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            kubeconfig_path: kubeconfig_path.into(),
        }
    }

    /// Override the per-command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Installs K3S by uploading the installer script and running it
pub struct K3sInstaller<O: SessionOpener = OpenSshConnector> {
    opener: O,
    artifact: Arc<InstallerArtifact>,
    settings: InstallSettings,
}

impl<O: SessionOpener> K3sInstaller<O> {
    /// Create an installer
    pub fn new(opener: O, artifact: Arc<InstallerArtifact>, settings: InstallSettings) -> Self {
        Self {
            opener,
            artifact,
            settings,
        }
    }

    /// The installer script used
    pub fn artifact(&self) -> &InstallerArtifact {
        &self.artifact
    }

    async fn connect(&self, target: &InstallTarget) -> Result<Option<Box<dyn RemoteSession>>> {
        match self.opener.open(&target.session_target()).await? {
            Attempt::Completed(session) => Ok(Some(session)),
            Attempt::NotReady => {
                warn!(node = %target.node, address = %target.address, "Node not reachable yet");
                Ok(None)
            }
        }
    }

    /// Upload the installer to a fresh path and make it executable
    async fn stage_installer(&self, session: &mut dyn RemoteSession) -> Result<String> {
        let remote_path = format!("/tmp/{}", Uuid::new_v4().simple());
        debug!(
            path = %remote_path,
            version = %self.artifact.version(),
            digest = %self.artifact.digest(),
            "Uploading installer"
        );
        session
            .upload(&remote_path, self.artifact.bytes(), self.settings.command_timeout)
            .await?;

        let chmod = RemoteCommand::new("chmod")
            .arg("+x")
            .arg(remote_path.as_str())
            .escalated();
        self.run_checked(session, &chmod).await?;
        Ok(remote_path)
    }

    async fn run_checked(
        &self,
        session: &mut dyn RemoteSession,
        command: &RemoteCommand,
    ) -> Result<CommandOutput> {
        let output = session.run(command, self.settings.command_timeout).await?;
        if output.success {
            Ok(output)
        } else {
            Err(K3sError::CommandFailed {
                command: command.describe(),
                output: output.combined(),
            })
        }
    }

    fn installer_command(&self, path: &str, target: &InstallTarget) -> RemoteCommand {
        let mut command = RemoteCommand::new(path).escalated();
        if let Some(channel) = &target.channel {
            command = command.env(CHANNEL_ENV, channel.as_str());
        }
        command
    }

    async fn bootstrap_server(
        &self,
        session: &mut dyn RemoteSession,
        target: &InstallTarget,
    ) -> Result<MasterInstall> {
        let installer = self.stage_installer(session).await?;
        self.run_checked(session, &self.installer_command(&installer, target))
            .await?;

        let token = self
            .run_checked(session, &RemoteCommand::new("cat").arg(NODE_TOKEN_PATH).escalated())
            .await?;
        let token: String = token
            .stdout
            .chars()
            .filter(|c| *c != '\n' && *c != '\r')
            .collect();
        let token = token.trim();
        if token.is_empty() {
            return Err(K3sError::EmptyToken {
                node: target.node.clone(),
            });
        }

        let raw = self
            .run_checked(
                session,
                &RemoteCommand::new("cat").arg(K3S_KUBECONFIG_PATH).escalated(),
            )
            .await?;
        let rewritten = kubeconfig::rewrite_loopback_servers(&raw.stdout, target.address)?;
        kubeconfig::write_kubeconfig(&self.settings.kubeconfig_path, &rewritten).await?;

        Ok(MasterInstall {
            node_token: Secret::new(token),
            kubeconfig: self.settings.kubeconfig_path.clone(),
        })
    }

    async fn bootstrap_agent(
        &self,
        session: &mut dyn RemoteSession,
        target: &InstallTarget,
        join: &JoinConfig,
    ) -> Result<()> {
        let installer = self.stage_installer(session).await?;
        let command = self
            .installer_command(&installer, target)
            .env(URL_ENV, join.url())
            .env(TOKEN_ENV, join.token.clone());
        self.run_checked(session, &command).await?;
        Ok(())
    }
}

#[async_trait]
impl<O: SessionOpener> ClusterInstaller for K3sInstaller<O> {
    #[instrument(skip_all, fields(node = %target.node, address = %target.address))]
    async fn install_master(&self, target: &InstallTarget) -> Result<Attempt<MasterInstall>> {
        let Some(mut session) = self.connect(target).await? else {
            return Ok(Attempt::NotReady);
        };

        info!("Installing K3S server");
        let result = self.bootstrap_server(session.as_mut(), target).await;
        session.close().await;

        let install = result?;
        info!(kubeconfig = %install.kubeconfig.display(), "K3S server installed");
        Ok(Attempt::Completed(install))
    }

    #[instrument(skip_all, fields(node = %target.node, master = %join.master_ip))]
    async fn install_agent(
        &self,
        target: &InstallTarget,
        join: &JoinConfig,
    ) -> Result<Attempt<()>> {
        let Some(mut session) = self.connect(target).await? else {
            return Ok(Attempt::NotReady);
        };

        info!("Installing K3S agent");
        let result = self.bootstrap_agent(session.as_mut(), target, join).await;
        session.close().await;

        result?;
        info!("K3S agent joined");
        Ok(Attempt::Completed(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionTarget;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const KUBECONFIG: &str = "apiVersion: v1\nclusters:\n- cluster:\n    server: https://127.0.0.1:6443\n  name: default\nkind: Config\n";

    /// What a scripted session saw
    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Upload(String),
        Run { line: String, escalated: bool },
        Close,
    }

    /// Session replaying canned outputs in order and recording every call
    struct ScriptedSession {
        calls: Arc<Mutex<Vec<Call>>>,
        outputs: Arc<Mutex<VecDeque<Result<CommandOutput>>>>,
        upload_error: Option<String>,
    }

    #[async_trait]
    impl RemoteSession for ScriptedSession {
        async fn upload(&mut self, path: &str, _contents: &[u8], _t: Duration) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Upload(path.to_string()));
            match &self.upload_error {
                Some(message) => Err(K3sError::Upload {
                    path: path.to_string(),
                    message: message.clone(),
                }),
                None => Ok(()),
            }
        }

        async fn run(&mut self, command: &RemoteCommand, _t: Duration) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(Call::Run {
                line: command.to_shell(),
                escalated: command.is_escalated(),
            });
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok("")))
        }

        async fn close(&mut self) {
            self.calls.lock().unwrap().push(Call::Close);
        }
    }

    /// Opener handing out one scripted session, or reporting NotReady
    struct ScriptedOpener {
        reachable: bool,
        calls: Arc<Mutex<Vec<Call>>>,
        outputs: Arc<Mutex<VecDeque<Result<CommandOutput>>>>,
        upload_error: Option<String>,
    }

    impl ScriptedOpener {
        fn reachable(outputs: Vec<Result<CommandOutput>>) -> Self {
            Self {
                reachable: true,
                calls: Arc::new(Mutex::new(Vec::new())),
                outputs: Arc::new(Mutex::new(outputs.into())),
                upload_error: None,
            }
        }

        fn unreachable() -> Self {
            Self {
                reachable: false,
                ..Self::reachable(vec![])
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionOpener for ScriptedOpener {
        async fn open(&self, _target: &SessionTarget) -> Result<Attempt<Box<dyn RemoteSession>>> {
            if !self.reachable {
                return Ok(Attempt::NotReady);
            }
            Ok(Attempt::Completed(Box::new(ScriptedSession {
                calls: self.calls.clone(),
                outputs: self.outputs.clone(),
                upload_error: self.upload_error.clone(),
            })))
        }
    }

    fn installer(opener: ScriptedOpener, kubeconfig: PathBuf) -> K3sInstaller<ScriptedOpener> {
        K3sInstaller::new(
            opener,
            Arc::new(InstallerArtifact::from_bytes("test", b"#!/bin/sh\n".to_vec())),
            InstallSettings::new(kubeconfig),
        )
    }

    fn target(channel: Option<&str>) -> InstallTarget {
        InstallTarget {
            node: "m1".into(),
            address: "203.0.113.7".parse().unwrap(),
            user: "root".into(),
            password: None,
            channel: channel.map(String::from),
        }
    }

    fn uploaded_path(calls: &[Call]) -> String {
        match &calls[0] {
            Call::Upload(path) => path.clone(),
            other => panic!("Expected upload first, got {:?}", other),
        }
    }

    // ==========================================================================
    // Story: installing the master
    // ==========================================================================

    #[tokio::test]
    async fn master_install_uploads_runs_and_reads_back_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let kubeconfig_path = dir.path().join("kube/config");
        let opener = ScriptedOpener::reachable(vec![
            Ok(CommandOutput::ok("")),
            Ok(CommandOutput::ok("[INFO] systemd: Starting k3s\n")),
            Ok(CommandOutput::ok("K10abc::server:def\n")),
            Ok(CommandOutput::ok(KUBECONFIG)),
        ]);
        let installer = installer(opener, kubeconfig_path.clone());

        let attempt = installer.install_master(&target(Some("stable"))).await.unwrap();
        let install = match attempt {
            Attempt::Completed(install) => install,
            Attempt::NotReady => panic!("Expected completed install"),
        };
        assert_eq!(install.node_token.expose(), "K10abc::server:def");
        assert_eq!(install.kubeconfig, kubeconfig_path);

        let written = std::fs::read_to_string(&kubeconfig_path).unwrap();
        assert!(written.contains("https://203.0.113.7:6443"));

        let calls = installer.opener.calls();
        let path = uploaded_path(&calls);
        assert!(path.starts_with("/tmp/"));
        assert_eq!(path.len(), "/tmp/".len() + 32);
        assert_eq!(
            &calls[1..],
            &[
                Call::Run {
                    line: format!("chmod +x {}", path),
                    escalated: true
                },
                Call::Run {
                    line: format!("env INSTALL_K3S_CHANNEL=stable {}", path),
                    escalated: true
                },
                Call::Run {
                    line: format!("cat {}", NODE_TOKEN_PATH),
                    escalated: true
                },
                Call::Run {
                    line: format!("cat {}", K3S_KUBECONFIG_PATH),
                    escalated: true
                },
                Call::Close,
            ]
        );
    }

    #[tokio::test]
    async fn token_with_only_newlines_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::reachable(vec![
            Ok(CommandOutput::ok("")),
            Ok(CommandOutput::ok("")),
            Ok(CommandOutput::ok("\n\n")),
        ]);
        let installer = installer(opener, dir.path().join("config"));

        let err = installer.install_master(&target(None)).await.unwrap_err();
        assert!(matches!(err, K3sError::EmptyToken { .. }));
        assert_eq!(installer.opener.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn failing_installer_is_a_hard_error_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::reachable(vec![
            Ok(CommandOutput::ok("")),
            Ok(CommandOutput::failed("[ERROR] Failed to download k3s")),
        ]);
        let installer = installer(opener, dir.path().join("config"));

        let err = installer.install_master(&target(None)).await.unwrap_err();
        match err {
            K3sError::CommandFailed { output, .. } => {
                assert!(output.contains("Failed to download k3s"))
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
        assert!(!dir.path().join("config").exists());
        assert_eq!(installer.opener.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn upload_failure_closes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut opener = ScriptedOpener::reachable(vec![]);
        opener.upload_error = Some("No space left on device".into());
        let installer = installer(opener, dir.path().join("config"));

        let err = installer.install_master(&target(None)).await.unwrap_err();
        assert!(matches!(err, K3sError::Upload { .. }));

        let calls = installer.opener.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], Call::Close);
    }

    #[tokio::test]
    async fn timeout_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::reachable(vec![
            Ok(CommandOutput::ok("")),
            Err(K3sError::Timeout {
                command: "/tmp/x".into(),
                after: Duration::from_secs(60),
                output: "[INFO]  Finding release for channel stable".into(),
            }),
        ]);
        let installer = installer(opener, dir.path().join("config"));

        let err = installer.install_master(&target(None)).await.unwrap_err();
        match err {
            K3sError::Timeout { output, .. } => assert!(output.contains("Finding release")),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_master_is_not_ready_and_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(ScriptedOpener::unreachable(), dir.path().join("config"));

        let attempt = installer.install_master(&target(None)).await.unwrap();
        assert!(attempt.is_not_ready());
        assert!(installer.opener.calls().is_empty());
    }

    // ==========================================================================
    // Story: joining an agent
    // ==========================================================================

    #[tokio::test]
    async fn agent_install_passes_join_url_and_token() {
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(ScriptedOpener::reachable(vec![]), dir.path().join("config"));
        let join = JoinConfig {
            master_ip: "10.0.0.1".parse().unwrap(),
            token: Secret::new("K10abc::server:def"),
        };

        let attempt = installer.install_agent(&target(None), &join).await.unwrap();
        assert_eq!(attempt, Attempt::Completed(()));

        let calls = installer.opener.calls();
        let path = uploaded_path(&calls);
        assert_eq!(calls.len(), 4);
        match &calls[2] {
            Call::Run { line, escalated } => {
                assert!(*escalated);
                assert!(line.starts_with("env "));
                assert!(line.contains("https://10.0.0.1:6443"));
                assert!(line.contains("K3S_TOKEN=K10abc::server:def"));
                assert!(line.ends_with(&path));
            }
            other => panic!("Expected installer run, got {:?}", other),
        }
        assert_eq!(calls[3], Call::Close);
        assert!(!dir.path().join("config").exists());
    }

    #[tokio::test]
    async fn agent_failure_never_leaks_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::reachable(vec![
            Ok(CommandOutput::ok("")),
            Ok(CommandOutput::failed("[ERROR] could not join")),
        ]);
        let installer = installer(opener, dir.path().join("config"));
        let join = JoinConfig {
            master_ip: "10.0.0.1".parse().unwrap(),
            token: Secret::new("K10topsecret"),
        };

        let err = installer.install_agent(&target(None), &join).await.unwrap_err();
        let rendered = format!("{} {:?}", err, err);
        assert!(rendered.contains("K3S_TOKEN=***"));
        assert!(!rendered.contains("K10topsecret"));
    }

    #[tokio::test]
    async fn unreachable_agent_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(ScriptedOpener::unreachable(), dir.path().join("config"));
        let join = JoinConfig {
            master_ip: "10.0.0.1".parse().unwrap(),
            token: Secret::new("K10abc"),
        };

        let attempt = installer.install_agent(&target(None), &join).await.unwrap();
        assert!(attempt.is_not_ready());
    }
}
