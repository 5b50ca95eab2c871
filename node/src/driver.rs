//! Elevator hardware client.
//!
//! The car hardware speaks a fixed 4-byte packet protocol over TCP:
//! `[command, arg1, arg2, 0]`. Writes are fire-and-forget; reads are strict
//! request/response with the payload in bytes 1-2 of the reply. The stream
//! sits behind an async mutex so concurrent callers cannot interleave a
//! request with someone else's response.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;

use liftnet_car::CarOutput;
use liftnet_types::{ButtonKind, Direction};

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("hardware i/o failed: {0}")]
    Io(#[from] io::Error),
}

const CMD_MOTOR: u8 = 1;
const CMD_BUTTON_LAMP: u8 = 2;
const CMD_FLOOR_INDICATOR: u8 = 3;
const CMD_DOOR_LAMP: u8 = 4;
const CMD_STOP_LAMP: u8 = 5;
const CMD_READ_BUTTON: u8 = 6;
const CMD_READ_FLOOR: u8 = 7;
const CMD_READ_STOP: u8 = 8;
const CMD_READ_OBSTRUCTION: u8 = 9;

fn motor_byte(direction: Direction) -> u8 {
    match direction {
        Direction::Up => 1,
        Direction::Down => 0xFF,
        Direction::Stop => 0,
    }
}

/// Connection to the car hardware server.
pub struct Driver {
    stream: Mutex<TcpStream>,
}

impl Driver {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream: Mutex::new(stream) })
    }

    async fn send(&self, packet: [u8; 4]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream.write_all(&packet).await?;
        Ok(())
    }

    async fn request(&self, packet: [u8; 4]) -> Result<[u8; 4]> {
        let mut stream = self.stream.lock().await;
        stream.write_all(&packet).await?;
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await?;
        Ok(reply)
    }

    pub async fn motor_direction(&self, direction: Direction) -> Result<()> {
        self.send([CMD_MOTOR, motor_byte(direction), 0, 0]).await
    }

    pub async fn button_lamp(&self, kind: ButtonKind, floor: u8, on: bool) -> Result<()> {
        self.send([CMD_BUTTON_LAMP, kind as u8, floor, on as u8]).await
    }

    pub async fn floor_indicator(&self, floor: u8) -> Result<()> {
        self.send([CMD_FLOOR_INDICATOR, floor, 0, 0]).await
    }

    pub async fn door_lamp(&self, on: bool) -> Result<()> {
        self.send([CMD_DOOR_LAMP, on as u8, 0, 0]).await
    }

    pub async fn stop_lamp(&self, on: bool) -> Result<()> {
        self.send([CMD_STOP_LAMP, on as u8, 0, 0]).await
    }

    pub async fn order_button(&self, kind: ButtonKind, floor: u8) -> Result<bool> {
        let reply = self.request([CMD_READ_BUTTON, kind as u8, floor, 0]).await?;
        Ok(reply[1] != 0)
    }

    /// Current floor, or `None` between floors.
    pub async fn floor_sensor(&self) -> Result<Option<u8>> {
        let reply = self.request([CMD_READ_FLOOR, 0, 0, 0]).await?;
        Ok((reply[1] != 0).then_some(reply[2]))
    }

    pub async fn stop_button(&self) -> Result<bool> {
        let reply = self.request([CMD_READ_STOP, 0, 0, 0]).await?;
        Ok(reply[1] != 0)
    }

    pub async fn obstruction(&self) -> Result<bool> {
        let reply = self.request([CMD_READ_OBSTRUCTION, 0, 0, 0]).await?;
        Ok(reply[1] != 0)
    }
}

/// FSM output seam over the driver. A failed write is only logged: the
/// connection-level error will also surface on the next poll, and motor and
/// lamp state are re-asserted on every state change.
pub struct DriverOutput {
    driver: std::sync::Arc<Driver>,
}

impl DriverOutput {
    pub fn new(driver: std::sync::Arc<Driver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl CarOutput for DriverOutput {
    async fn motor_direction(&self, direction: Direction) {
        if let Err(e) = self.driver.motor_direction(direction).await {
            warn!("motor write failed: {e}");
        }
    }

    async fn door_light(&self, on: bool) {
        if let Err(e) = self.driver.door_lamp(on).await {
            warn!("door lamp write failed: {e}");
        }
    }

    async fn floor_indicator(&self, floor: u8) {
        if let Err(e) = self.driver.floor_indicator(floor).await {
            warn!("floor indicator write failed: {e}");
        }
    }
}
