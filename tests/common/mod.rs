#![allow(dead_code)]

use async_trait::async_trait;
use rmodbus::{
    server::{context::ModbusContext, storage::ModbusStorageSmall, ModbusFrame},
    ModbusProto,
};
use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::Instant,
};

use refarm_bridge::{
    api::gateway::{ConnError, FieldbusGateway, GatewayIoError},
    core::{BusError, BusEvent, BusMessage, EventBus, ShutdownHandle},
};

pub const LIGHT_TOPIC: &str = "refarm/shop/exteriorLightSouth";

/// One step of a scripted bus session.
pub enum BusStep {
    /// The broker accepted a (re)connection.
    Connected,
    Message(BusMessage),
    Error(BusError),
    /// Deliver nothing until this much time has passed since the step was reached.
    Idle(Duration),
}

/// Event bus replaying a fixed script; asks for shutdown once the script runs out.
pub struct ScriptedBus {
    steps: VecDeque<BusStep>,
    idle_until: Option<Instant>,
    shutdown: ShutdownHandle,
    pub error_times: Vec<Instant>,
    pub reconnect_times: Vec<Instant>,
    pub disconnected: bool,
}

impl ScriptedBus {
    pub fn new(steps: Vec<BusStep>, shutdown: ShutdownHandle) -> Self {
        Self {
            steps: steps.into(),
            idle_until: None,
            shutdown,
            error_times: Vec::new(),
            reconnect_times: Vec::new(),
            disconnected: false,
        }
    }
}

#[async_trait]
impl EventBus for ScriptedBus {
    async fn next_event(&mut self) -> Result<BusEvent, BusError> {
        loop {
            match self.steps.front() {
                None => {
                    self.shutdown.request();
                    return std::future::pending().await;
                }
                Some(BusStep::Idle(duration)) => {
                    // Deadline is fixed on first visit so cancellation does not restart it.
                    let until = *self.idle_until.get_or_insert(Instant::now() + *duration);
                    tokio::time::sleep_until(until).await;
                    self.idle_until = None;
                    self.steps.pop_front();
                }
                Some(_) => match self.steps.pop_front() {
                    Some(BusStep::Connected) => return Ok(BusEvent::Connected),
                    Some(BusStep::Message(message)) => return Ok(BusEvent::Message(message)),
                    Some(BusStep::Error(err)) => {
                        self.error_times.push(Instant::now());
                        return Err(err);
                    }
                    _ => unreachable!(),
                },
            }
        }
    }

    async fn reconnect(&mut self) {
        self.reconnect_times.push(Instant::now());
    }

    async fn disconnect(&mut self) {
        self.disconnected = true;
    }
}

pub fn message(topic: &str, payload: &str) -> BusStep {
    BusStep::Message(BusMessage::new(topic, payload.as_bytes().to_vec()))
}

pub fn connection_lost() -> BusStep {
    BusStep::Error(BusError::ConnectionLost {
        reason: "broker went away".to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Dial,
    SelectUnit(u8),
    Write { addr: u16, value: u16 },
    Read { addr: u16, count: u16 },
    Close,
}

/// Gateway double recording every operation with its (virtual) time.
pub struct RecordingGateway {
    unit_id: u8,
    connected: bool,
    pub fail_dial: bool,
    pub fail_reads: bool,
    /// Requested while a write is in flight, to model a signal arriving mid-handler.
    pub shutdown_on_write: Option<ShutdownHandle>,
    pub calls: Vec<(Instant, GatewayCall)>,
}

impl RecordingGateway {
    pub fn new(unit_id: u8) -> Self {
        Self {
            unit_id,
            connected: false,
            fail_dial: false,
            fail_reads: false,
            shutdown_on_write: None,
            calls: Vec::new(),
        }
    }

    pub fn unreachable(unit_id: u8) -> Self {
        Self {
            fail_dial: true,
            ..Self::new(unit_id)
        }
    }

    pub fn call_kinds(&self) -> Vec<GatewayCall> {
        self.calls.iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn read_times(&self) -> Vec<Instant> {
        self.calls
            .iter()
            .filter(|(_, call)| matches!(call, GatewayCall::Read { .. }))
            .map(|(at, _)| *at)
            .collect()
    }

    fn record(&mut self, call: GatewayCall) {
        self.calls.push((Instant::now(), call));
    }
}

#[async_trait]
impl FieldbusGateway for RecordingGateway {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn ensure_connected(&mut self) -> Result<(), ConnError> {
        if self.connected {
            return Ok(());
        }
        self.record(GatewayCall::Dial);
        if self.fail_dial {
            return Err(ConnError::DialFailed {
                addr: "192.168.32.60:502".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        self.record(GatewayCall::SelectUnit(self.unit_id));
        self.connected = true;
        Ok(())
    }

    async fn write_register(&mut self, addr: u16, value: u16) -> Result<(), GatewayIoError> {
        if !self.connected {
            return Err(GatewayIoError::NotConnected);
        }
        if let Some(handle) = &self.shutdown_on_write {
            handle.request();
        }
        // Simulated round trip, long enough for a racing shutdown to be observable.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.record(GatewayCall::Write { addr, value });
        Ok(())
    }

    async fn read_registers(&mut self, addr: u16, count: u16) -> Result<Vec<u16>, GatewayIoError> {
        if !self.connected {
            return Err(GatewayIoError::NotConnected);
        }
        self.record(GatewayCall::Read { addr, count });
        if self.fail_reads {
            return Err(GatewayIoError::ReadFailed {
                addr,
                count,
                reason: "timeout".to_string(),
            });
        }
        Ok(vec![0; count as usize])
    }

    async fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.record(GatewayCall::Close);
        }
    }
}

/// In-process Modbus TCP server backed by rmodbus storage.
pub struct FakeModbusServer {
    pub addr: SocketAddr,
    pub storage: Arc<Mutex<ModbusStorageSmall>>,
    pub connections: Arc<Mutex<usize>>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeModbusServer {
    pub async fn start(unit_id: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(Mutex::new(ModbusStorageSmall::default()));
        let connections = Arc::new(Mutex::new(0));

        let accept_storage = storage.clone();
        let accept_connections = connections.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                *accept_connections.lock().unwrap() += 1;
                tokio::spawn(serve_connection(socket, unit_id, accept_storage.clone()));
            }
        });

        Self {
            addr,
            storage,
            connections,
            handle,
        }
    }

    pub fn holding(&self, reg: u16) -> u16 {
        self.storage.lock().unwrap().get_holding(reg).unwrap()
    }

    pub fn set_holding(&self, reg: u16, value: u16) {
        self.storage.lock().unwrap().set_holding(reg, value).unwrap();
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

/// Answer Modbus TCP requests on `socket` until the peer goes away.
pub async fn serve_connection(
    mut socket: TcpStream,
    unit_id: u8,
    storage: Arc<Mutex<ModbusStorageSmall>>,
) {
    loop {
        let mut header = [0u8; 6];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut request = header.to_vec();
        request.resize(6 + len, 0);
        if socket.read_exact(&mut request[6..]).await.is_err() {
            return;
        }

        let mut response = Vec::new();
        {
            let mut frame = ModbusFrame::new(unit_id, &request, ModbusProto::TcpUdp, &mut response);
            if frame.parse().is_err() {
                return;
            }
            if frame.processing_required {
                let mut storage = storage.lock().unwrap();
                let result = if frame.readonly {
                    frame.process_read(&*storage)
                } else {
                    frame.process_write(&mut *storage)
                };
                if result.is_err() {
                    return;
                }
            }
            if frame.response_required && frame.finalize_response().is_err() {
                return;
            }
        }

        if !response.is_empty() && socket.write_all(&response).await.is_err() {
            return;
        }
    }
}

/// Accepts connections and never answers, for timeout paths.
pub async fn silent_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (addr, handle)
}
