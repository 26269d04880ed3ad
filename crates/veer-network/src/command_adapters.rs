//! Collaborators backed by operator-supplied shell commands.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::collaborators::{SystemProxyControl, WirelessIdentityProbe};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_STDERR_PREVIEW_CHARS: usize = 400;

/// A command line split into program and arguments, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHook {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandHook {
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = shell_words::split(command_line)
            .with_context(|| format!("invalid command line: {command_line}"))?;
        if words.is_empty() {
            bail!("command line is empty");
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Runs the command and returns its stdout. Non-zero exit is an error.
    pub async fn run(&self) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .with_context(|| {
                format!(
                    "command '{}' timed out after {} ms",
                    self.program,
                    self.timeout.as_millis()
                )
            })?
            .with_context(|| format!("failed to run command '{}'", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "command '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr
                    .trim()
                    .chars()
                    .take(COMMAND_STDERR_PREVIEW_CHARS)
                    .collect::<String>()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Reads the SSID from the first non-empty line a command prints.
#[derive(Debug, Clone)]
pub struct CommandWirelessProbe {
    hook: CommandHook,
}

impl CommandWirelessProbe {
    pub fn new(hook: CommandHook) -> Self {
        Self { hook }
    }
}

pub fn identity_from_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl WirelessIdentityProbe for CommandWirelessProbe {
    async fn current_identity(&self) -> Option<String> {
        match self.hook.run().await {
            Ok(stdout) => identity_from_output(&stdout),
            Err(error) => {
                tracing::debug!(error = %format!("{error:#}"), "ssid probe failed");
                None
            }
        }
    }
}

/// OS proxy toggles as commands; a missing DNS hook makes `restore_dns` a no-op.
#[derive(Debug, Clone)]
pub struct CommandSystemProxy {
    enable: CommandHook,
    disable: CommandHook,
    restore_dns: Option<CommandHook>,
}

impl CommandSystemProxy {
    pub fn new(enable: CommandHook, disable: CommandHook, restore_dns: Option<CommandHook>) -> Self {
        Self {
            enable,
            disable,
            restore_dns,
        }
    }
}

#[async_trait]
impl SystemProxyControl for CommandSystemProxy {
    async fn set_system_proxy(&self, enabled: bool) -> Result<()> {
        let hook = if enabled { &self.enable } else { &self.disable };
        hook.run()
            .await
            .with_context(|| format!("failed to set system proxy enabled={enabled}"))?;
        Ok(())
    }

    async fn restore_dns(&self) -> Result<()> {
        if let Some(hook) = &self.restore_dns {
            hook.run().await.context("failed to restore dns")?;
        }
        Ok(())
    }
}

/// Used when no system proxy commands are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSystemProxy;

#[async_trait]
impl SystemProxyControl for NoopSystemProxy {
    async fn set_system_proxy(&self, enabled: bool) -> Result<()> {
        tracing::debug!(enabled, "system proxy control not configured");
        Ok(())
    }

    async fn restore_dns(&self) -> Result<()> {
        Ok(())
    }
}
