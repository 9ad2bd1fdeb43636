//! # Guest process handle.
//!
//! [`GuestProcess`] owns one spawned guest: the child process, its framed
//! socket channel and a liveness flag. It knows how to launch and handshake,
//! how to race one reply against process exit and a deadline, and how to stop
//! the process. Lifecycle decisions (restart, state transitions, events)
//! belong to the [`GuestSupervisor`](super::GuestSupervisor).
//!
//! ## Launch
//! ```text
//! tempdir/guest.sock ◄── bind
//! spawn(program, env: _HANDLER, BRIDGE_GUEST_SOCKET) ── stdout/stderr inherited
//! accept() ─── races ──► child.wait()      (exit → ExitedDuringInit)
//! next frame:  Ready     → ok
//!              InitError → InitRejected(envelope)
//!              other     → Handshake(Unexpected)
//! all of the above bounded by init_timeout (→ HandshakeTimeout)
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::time::{self, Instant};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::config::GuestCommand;
use crate::error::{GuestError, ProtocolError};
use crate::guest::protocol::{self, Frame, SOCKET_ENV};
use crate::report::ExitInfo;

/// How long a frame already in flight is awaited after the guest exits.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// How long an exit status is awaited after the channel closes.
const REAP_WINDOW: Duration = Duration::from_millis(200);

/// What ended one wait for a guest reply.
#[derive(Debug)]
pub enum Reply {
    /// A well-formed frame arrived.
    Frame(Frame),
    /// A frame arrived intact but its body could not be decoded.
    Undecodable(ProtocolError),
    /// The byte stream itself broke (oversized or truncated frame); framing is lost.
    Desync(std::io::Error),
    /// The process exited or the channel closed. `last` is a frame drained after exit.
    Exited { exit: ExitInfo, last: Option<Frame> },
    /// The deadline passed first.
    DeadlineElapsed,
}

/// One running guest process with its channel.
pub struct GuestProcess {
    child: Child,
    pid: Option<u32>,
    channel: Framed<UnixStream, LengthDelimitedCodec>,
    alive: bool,
    _socket_dir: TempDir,
}

impl GuestProcess {
    /// Spawns the guest and completes the readiness handshake within `init_timeout`.
    ///
    /// On any failure the child is killed before returning.
    pub async fn launch(
        cmd: &GuestCommand,
        init_timeout: Duration,
        max_frame: usize,
    ) -> Result<Self, GuestError> {
        if cmd.program.trim().is_empty() {
            return Err(GuestError::NoCommand);
        }

        let socket_dir = tempfile::Builder::new().prefix("bridgevisor-").tempdir()?;
        let socket_path = socket_dir.path().join("guest.sock");
        let listener = UnixListener::bind(&socket_path)?;

        let mut child = command(cmd, socket_path)
            .spawn()
            .map_err(|source| GuestError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;
        let pid = child.id();

        let handshake = time::timeout(init_timeout, handshake(&mut child, &listener, max_frame)).await;
        let channel = match handshake {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                terminate(&mut child).await;
                return Err(e);
            }
            Err(_elapsed) => {
                terminate(&mut child).await;
                return Err(GuestError::HandshakeTimeout {
                    timeout: init_timeout,
                });
            }
        };

        Ok(Self {
            child,
            pid,
            channel,
            alive: true,
            _socket_dir: socket_dir,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Exit status if the process has already exited, without waiting.
    pub fn exited(&mut self) -> Option<ExitInfo> {
        match self.child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => {
                self.alive = false;
                Some(status.into())
            }
            Err(_) => {
                self.alive = false;
                Some(ExitInfo::CHANNEL_CLOSED)
            }
        }
    }

    /// Writes one frame to the guest.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), GuestError> {
        let body = frame.encode()?;
        if let Err(e) = self.channel.send(body).await {
            self.alive = false;
            return Err(GuestError::Io(e));
        }
        Ok(())
    }

    /// Waits for the next reply, the process exit or `deadline`, whichever comes first.
    pub async fn reply(&mut self, deadline: Instant) -> Reply {
        let reply = tokio::select! {
            biased;
            next = self.channel.next() => match next {
                Some(Ok(body)) => match Frame::decode(body.freeze()) {
                    Ok(frame) => Reply::Frame(frame),
                    Err(e) => Reply::Undecodable(e),
                },
                Some(Err(e)) => Reply::Desync(e),
                None => Reply::Exited { exit: self.reap(REAP_WINDOW).await, last: None },
            },
            status = self.child.wait() => {
                let exit = status.map(ExitInfo::from).unwrap_or(ExitInfo::CHANNEL_CLOSED);
                let last = match time::timeout(DRAIN_WINDOW, self.channel.next()).await {
                    Ok(Some(Ok(body))) => Frame::decode(body.freeze()).ok(),
                    _ => None,
                };
                Reply::Exited { exit, last }
            }
            _ = time::sleep_until(deadline) => Reply::DeadlineElapsed,
        };
        if matches!(reply, Reply::Exited { .. }) {
            self.alive = false;
        }
        reply
    }

    /// Collects the exit status of a guest whose channel is gone.
    ///
    /// Kills the process if it does not exit within `window`; a process the
    /// bridge had to kill reports [`ExitInfo::CHANNEL_CLOSED`].
    pub async fn reap(&mut self, window: Duration) -> ExitInfo {
        self.alive = false;
        match time::timeout(window, self.child.wait()).await {
            Ok(Ok(status)) => status.into(),
            _ => {
                terminate(&mut self.child).await;
                ExitInfo::CHANNEL_CLOSED
            }
        }
    }

    /// Kills the process and waits for it.
    pub async fn kill(&mut self) {
        self.alive = false;
        terminate(&mut self.child).await;
    }

    /// Sends `Shutdown`, waits up to `grace`, then kills.
    ///
    /// Returns `true` if the guest exited on its own.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        if self.alive {
            let _ = self.send(&Frame::Shutdown).await;
        }
        self.alive = false;
        match time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => true,
            _ => {
                terminate(&mut self.child).await;
                false
            }
        }
    }
}

fn command(cmd: &GuestCommand, socket_path: PathBuf) -> Command {
    let mut c = Command::new(&cmd.program);
    c.args(&cmd.args)
        .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env("_HANDLER", &cmd.handler)
        .env(SOCKET_ENV, socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &cmd.cwd {
        c.current_dir(dir);
    }
    c
}

async fn handshake(
    child: &mut Child,
    listener: &UnixListener,
    max_frame: usize,
) -> Result<Framed<UnixStream, LengthDelimitedCodec>, GuestError> {
    let stream = tokio::select! {
        biased;
        accepted = listener.accept() => accepted?.0,
        status = child.wait() => {
            return Err(GuestError::ExitedDuringInit { exit: status?.into() });
        }
    };
    let mut channel = Framed::new(stream, protocol::codec(max_frame));

    let next = tokio::select! {
        biased;
        next = channel.next() => next,
        status = child.wait() => {
            return Err(GuestError::ExitedDuringInit { exit: status?.into() });
        }
    };
    match next {
        Some(Ok(body)) => match Frame::decode(body.freeze())? {
            Frame::Ready => Ok(channel),
            Frame::InitError(envelope) => Err(GuestError::InitRejected(envelope)),
            other => Err(GuestError::Handshake(ProtocolError::Unexpected {
                expected: "Ready",
                got: other.name(),
            })),
        },
        Some(Err(e)) => Err(GuestError::Io(e)),
        None => {
            let exit = match time::timeout(REAP_WINDOW, child.wait()).await {
                Ok(Ok(status)) => status.into(),
                _ => ExitInfo::CHANNEL_CLOSED,
            };
            Err(GuestError::ExitedDuringInit { exit })
        }
    }
}

async fn terminate(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}
