//! Command dispatcher: one controller, one connection, strictly sequential
//! request/response.
//!
//! The server binds the first free port in the bridge range, announces it on
//! stdout as `PORT=<n>`, and accepts exactly one connection. The listener is
//! dropped after the accept so a second controller is refused outright.
//! While the controller is idle the loop pumps GUI events through the open
//! editor, if any; the transport's read timeout is the pump interval.

use crate::session::PluginSession;
use crate::transport::{Connection, Frame};
use plugbridge::protocol::{
    Command, InitAudioCmd, LoadPluginCmd, ParamChangesResp, ProcessAudioCmd, SendMidiCmd,
    SetParamCmd, Status, PORT_RANGE_END, PORT_RANGE_START,
};
use plugbridge::{BridgeError, Result};
use std::io::{self, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a socket read blocks before the loop pumps GUI events.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Builds a session for a `LoadPlugin` command. Tests substitute an
/// in-process factory here.
type Loader = dyn Fn(&Path, u32) -> Result<PluginSession>;

pub struct HostServer {
    listener: TcpListener,
    port: u16,
}

impl HostServer {
    /// Bind the first free port in the bridge range. First-free (rather than
    /// a fixed port) lets several host instances coexist.
    pub fn bind() -> Result<Self> {
        for port in PORT_RANGE_START..=PORT_RANGE_END {
            match TcpListener::bind(("127.0.0.1", port)) {
                Ok(listener) => {
                    info!(port, "listening");
                    return Ok(Self { listener, port });
                }
                Err(err) if err.kind() == ErrorKind::AddrInUse => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(BridgeError::Io(io::Error::new(
            ErrorKind::AddrInUse,
            format!("no free port in {PORT_RANGE_START}..={PORT_RANGE_END}"),
        )))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Print the `PORT=<n>` line the controller scrapes from stdout.
    pub fn announce(&self) -> Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "PORT={}", self.port)?;
        stdout.flush()?;
        Ok(())
    }

    /// Accept one controller and serve it until shutdown or disconnect.
    pub fn run(self) -> Result<()> {
        let HostServer { listener, port: _ } = self;
        let (stream, peer) = listener.accept()?;
        info!(%peer, "controller connected");
        drop(listener);
        serve(stream, &|path, class_index| {
            PluginSession::load(path, class_index)
        })
    }
}

/// Serve one connection to completion. Transport-level errors (bad magic,
/// version mismatch, truncated frames) close the connection without a
/// response; everything else is answered in-band.
fn serve(stream: TcpStream, loader: &Loader) -> Result<()> {
    let mut conn = Connection::new(stream, POLL_INTERVAL)?;
    let mut session: Option<PluginSession> = None;

    loop {
        match conn.read_frame() {
            Ok(Frame::Idle) => {
                if let Some(session) = session.as_mut() {
                    session.pump_editor();
                }
            }
            Ok(Frame::Closed) => {
                info!("controller disconnected");
                break;
            }
            Ok(Frame::Request { header, payload }) => {
                let Some(command) = Command::from_u32(header.command) else {
                    warn!(command = header.command, "unknown command");
                    conn.write_response(Status::Error, &[])?;
                    continue;
                };
                if command == Command::Shutdown {
                    info!("shutdown requested");
                    conn.write_response(Status::Ok, &[])?;
                    break;
                }
                let (status, body) = dispatch(&mut session, loader, command, &payload);
                conn.write_response(status, &body)?;
            }
            Err(err) => {
                warn!(%err, "closing connection");
                break;
            }
        }
    }

    // Dropping the session is the full teardown: editor, audio, facets,
    // module, in that order.
    drop(session);
    Ok(())
}

fn dispatch(
    session: &mut Option<PluginSession>,
    loader: &Loader,
    command: Command,
    payload: &[u8],
) -> (Status, Vec<u8>) {
    match handle(session, loader, command, payload) {
        Ok(body) => (Status::Ok, body),
        Err(err) => {
            debug!(?command, %err, "command failed");
            (status_for(&err), Vec::new())
        }
    }
}

fn handle(
    session: &mut Option<PluginSession>,
    loader: &Loader,
    command: Command,
    payload: &[u8],
) -> Result<Vec<u8>> {
    match command {
        Command::Ping => Ok(Vec::new()),
        Command::LoadPlugin => {
            let cmd = LoadPluginCmd::from_bytes(payload)?;
            // Replace any current session; its teardown runs before the new
            // module loads.
            *session = None;
            *session = Some(loader(&cmd.path, cmd.class_index)?);
            Ok(Vec::new())
        }
        Command::UnloadPlugin => {
            if session.take().is_none() {
                return Err(BridgeError::NotLoaded);
            }
            Ok(Vec::new())
        }
        Command::GetInfo => Ok(require(session)?.info().to_bytes()),
        Command::GetParamCount => {
            let count = require(session)?.param_count();
            Ok(count.to_le_bytes().to_vec())
        }
        Command::GetParamInfo => {
            let index = parse_u32(payload)?;
            Ok(require(session)?.param_info(index)?.to_bytes())
        }
        Command::GetParam => {
            let id = parse_u32(payload)?;
            let value = require(session)?.get_param(id)?;
            Ok(value.to_le_bytes().to_vec())
        }
        Command::SetParam => {
            let cmd = SetParamCmd::from_bytes(payload)?;
            require(session)?.set_param(cmd.param_id, cmd.value)?;
            Ok(Vec::new())
        }
        Command::SendMidi => {
            let cmd = SendMidiCmd::from_bytes(payload)?;
            require(session)?.queue_midi(&cmd.events);
            Ok(Vec::new())
        }
        Command::GetState => Ok(require(session)?.get_state()?),
        Command::SetState => {
            require(session)?.set_state(payload)?;
            Ok(Vec::new())
        }
        Command::GetParamChanges => {
            let changes = require(session)?.drain_edits();
            Ok(ParamChangesResp { changes }.to_bytes())
        }
        Command::OpenEditor => Ok(require(session)?.open_editor()?.to_bytes().to_vec()),
        Command::CloseEditor => {
            require(session)?.close_editor();
            Ok(Vec::new())
        }
        Command::GetEditorSize => Ok(require(session)?.editor_size()?.to_bytes().to_vec()),
        Command::InitAudio => {
            let cmd = InitAudioCmd::from_bytes(payload)?;
            require(session)?.init_audio(&cmd)?;
            Ok(Vec::new())
        }
        Command::ProcessAudio => {
            let cmd = ProcessAudioCmd::from_bytes(payload)?;
            require(session)?.process(cmd.num_samples)?;
            Ok(Vec::new())
        }
        // Handled by the serve loop before dispatch.
        Command::Shutdown => Ok(Vec::new()),
    }
}

fn require(session: &mut Option<PluginSession>) -> Result<&mut PluginSession> {
    session.as_mut().ok_or(BridgeError::NotLoaded)
}

fn parse_u32(payload: &[u8]) -> Result<u32> {
    if payload.len() < 4 {
        return Err(BridgeError::InvalidParam(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }
    Ok(u32::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

fn status_for(err: &BridgeError) -> Status {
    match err {
        BridgeError::NotLoaded => Status::NotLoaded,
        BridgeError::NotInitialized => Status::NotInitialized,
        BridgeError::InvalidParam(_) => Status::InvalidParam,
        BridgeError::ProtocolError(_) => Status::InvalidParam,
        _ => Status::Error,
    }
}
