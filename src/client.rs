//! Client side of the master's client port
//!
//! Used by `--mode submit` to start one job and follow it to completion.

use crate::protocol::{
    read_frame, write_frame, Command, Frame, LinearResult, PayloadReader, PoolState, Progress,
    ResultReady, StartRequest,
};
use anyhow::{Context, Result};
use tokio::net::TcpStream;

/// Decoded master-to-client message
#[derive(Debug, Clone, PartialEq)]
pub enum MasterEvent {
    Status(String),
    WorkerStatus(String),
    Log(String),
    Progress(Progress),
    Result(ResultReady),
    LinearResult(LinearResult),
    PoolState(PoolState),
    CalculationFailed,
    Unknown(Frame),
}

impl MasterEvent {
    pub fn decode(frame: Frame) -> Result<Self> {
        let event = match Command::from_byte(frame.command) {
            Some(Command::Status) => MasterEvent::Status(text(&frame.payload)?),
            Some(Command::WorkerStatus) => MasterEvent::WorkerStatus(text(&frame.payload)?),
            Some(Command::Log) => MasterEvent::Log(text(&frame.payload)?),
            Some(Command::Progress) => MasterEvent::Progress(Progress::decode(&frame.payload)?),
            Some(Command::ResultReady) => MasterEvent::Result(ResultReady::decode(&frame.payload)?),
            Some(Command::LinearResultReady) => {
                MasterEvent::LinearResult(LinearResult::decode(&frame.payload)?)
            }
            Some(Command::PoolState) => MasterEvent::PoolState(PoolState::decode(&frame.payload)?),
            Some(Command::CalculationFailed) => MasterEvent::CalculationFailed,
            _ => MasterEvent::Unknown(frame),
        };
        Ok(event)
    }

    /// Whether the event ends a submitted job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MasterEvent::Result(_) | MasterEvent::LinearResult(_) | MasterEvent::CalculationFailed
        )
    }
}

fn text(payload: &[u8]) -> Result<String> {
    Ok(PayloadReader::new(payload).get_text_rest()?)
}

/// Connection to a master's client port
pub struct MasterClient {
    stream: TcpStream,
}

impl MasterClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to master at {}", addr))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send a start command
    pub async fn submit(&mut self, command: Command, request: &StartRequest) -> Result<()> {
        anyhow::ensure!(command.is_start(), "{:?} is not a start command", command);
        let payload = request.encode(command.start_has_flag());
        write_frame(&mut self.stream, command.code(), &payload)
            .await
            .context("Failed to send start command")?;
        Ok(())
    }

    pub async fn request_pool_state(&mut self) -> Result<()> {
        write_frame(&mut self.stream, Command::RequestPoolState.code(), &[])
            .await
            .context("Failed to request pool state")?;
        Ok(())
    }

    /// Wait for the next message from the master
    pub async fn next_event(&mut self) -> Result<MasterEvent> {
        let frame = read_frame(&mut self.stream)
            .await
            .context("Connection to master lost")?;
        MasterEvent::decode(frame)
    }
}
