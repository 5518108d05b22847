//! Mock bus and interrupt line for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::traits::{BusError, DuplexStatus, InterruptLine, IrqHandler, SerialBus};

/// A single recorded bus write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusWrite {
    Register { addr: u8, value: u16 },
    Fifo { addr: u8, data: Vec<u8> },
    Duplex { data: Vec<u8> },
}

/// Mock bus for unit testing the command channel and dispatcher.
///
/// Register reads pop from a per-address queue and fall back to the last
/// written value. FIFO reads pop queued byte blocks, which may be split
/// across several reads the way a real FIFO drains.
#[derive(Clone)]
pub struct MockBus {
    /// Queued register values per address.
    registers: Arc<Mutex<HashMap<u8, VecDeque<u16>>>>,
    /// Last value written per register.
    latched: Arc<Mutex<HashMap<u8, u16>>>,
    /// Queued FIFO bytes per address.
    fifos: Arc<Mutex<HashMap<u8, VecDeque<u8>>>>,
    /// Scripted duplex results, consumed in order. Missing entries are `Done`.
    duplex: Arc<Mutex<VecDeque<Result<DuplexStatus, ()>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<BusWrite>>>,
    /// FIFO read requests (addr, len).
    read_log: Arc<Mutex<Vec<(u8, usize)>>>,
    /// Whether the device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            registers: Arc::new(Mutex::new(HashMap::new())),
            latched: Arc::new(Mutex::new(HashMap::new())),
            fifos: Arc::new(Mutex::new(HashMap::new())),
            duplex: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            read_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue a value for the next read of `addr`.
    pub fn queue_register(&self, addr: u8, value: u16) {
        self.registers
            .lock()
            .unwrap()
            .entry(addr)
            .or_default()
            .push_back(value);
    }

    /// Append bytes to the FIFO at `addr`.
    pub fn queue_fifo(&self, addr: u8, bytes: &[u8]) {
        self.fifos
            .lock()
            .unwrap()
            .entry(addr)
            .or_default()
            .extend(bytes.iter().copied());
    }

    /// Script the next duplex transfer result.
    pub fn queue_duplex(&self, status: DuplexStatus) {
        self.duplex.lock().unwrap().push_back(Ok(status));
    }

    /// Make the next duplex transfer fail.
    pub fn queue_duplex_failure(&self) {
        self.duplex.lock().unwrap().push_back(Err(()));
    }

    /// Bytes still waiting in the FIFO at `addr`.
    pub fn fifo_remaining(&self, addr: u8) -> usize {
        self.fifos.lock().unwrap().get(&addr).map_or(0, |q| q.len())
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<BusWrite> {
        self.write_log.lock().unwrap().clone()
    }

    /// Payloads written to the FIFO at `addr`, in order.
    pub fn fifo_writes(&self, addr: u8) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|w| match w {
                BusWrite::Fifo { addr: a, data } if *a == addr => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Values written to register `addr`, in order.
    pub fn register_writes(&self, addr: u8) -> Vec<u16> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|w| match w {
                BusWrite::Register { addr: a, value } if *a == addr => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Data sent through duplex transfers, in order.
    pub fn duplex_writes(&self) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|w| match w {
                BusWrite::Duplex { data } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// FIFO read requests for `addr`, as requested lengths.
    pub fn fifo_reads(&self, addr: u8) -> Vec<usize> {
        self.read_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, len)| *len)
            .collect()
    }

    /// Clear captured writes and reads.
    pub fn clear_log(&self) {
        self.write_log.lock().unwrap().clear();
        self.read_log.lock().unwrap().clear();
    }

    /// Simulate the chip dropping off the bus.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    fn check_connected(&self) -> Result<(), BusError> {
        if *self.connected.lock().unwrap() {
            Ok(())
        } else {
            Err(BusError::Disconnected)
        }
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialBus for MockBus {
    fn read_register(&self, addr: u8) -> Result<u16, BusError> {
        self.check_connected()?;
        if let Some(value) = self
            .registers
            .lock()
            .unwrap()
            .get_mut(&addr)
            .and_then(|q| q.pop_front())
        {
            return Ok(value);
        }
        Ok(self
            .latched
            .lock()
            .unwrap()
            .get(&addr)
            .copied()
            .unwrap_or(0))
    }

    fn write_register(&self, addr: u8, value: u16) -> Result<(), BusError> {
        self.check_connected()?;
        self.latched.lock().unwrap().insert(addr, value);
        self.write_log
            .lock()
            .unwrap()
            .push(BusWrite::Register { addr, value });
        Ok(())
    }

    fn read_fifo(&self, addr: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.check_connected()?;
        self.read_log.lock().unwrap().push((addr, buf.len()));
        let mut fifos = self.fifos.lock().unwrap();
        let queue = fifos.entry(addr).or_default();
        if queue.len() < buf.len() {
            return Err(BusError::ShortRead {
                addr,
                wanted: buf.len(),
                got: queue.len(),
            });
        }
        for byte in buf.iter_mut() {
            *byte = queue.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn write_fifo(&self, addr: u8, data: &[u8]) -> Result<(), BusError> {
        self.check_connected()?;
        self.write_log.lock().unwrap().push(BusWrite::Fifo {
            addr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read_and_write(&self, output: &[u8], input: &mut [u8]) -> Result<DuplexStatus, BusError> {
        self.check_connected()?;
        let scripted = self.duplex.lock().unwrap().pop_front();
        match scripted {
            Some(Err(())) => Err(BusError::TransferFailed("scripted failure".into())),
            Some(Ok(DuplexStatus::AlreadyLoaded)) => Ok(DuplexStatus::AlreadyLoaded),
            Some(Ok(DuplexStatus::Done)) | None => {
                self.write_log.lock().unwrap().push(BusWrite::Duplex {
                    data: output.to_vec(),
                });
                input.iter_mut().for_each(|b| *b = 0);
                Ok(DuplexStatus::Done)
            }
        }
    }
}

/// Mock interrupt line; `fire()` plays the hardware.
#[derive(Clone, Default)]
pub struct MockInterrupt {
    handler: Arc<Mutex<Option<Arc<IrqHandler>>>>,
    registrations: Arc<Mutex<usize>>,
    wake_enabled: Arc<Mutex<bool>>,
}

impl MockInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the registered top half. Returns false if none is installed.
    pub fn fire(&self) -> bool {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(h) => {
                (*h)();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    /// Number of successful `register` calls.
    pub fn registrations(&self) -> usize {
        *self.registrations.lock().unwrap()
    }

    pub fn wake_enabled(&self) -> bool {
        *self.wake_enabled.lock().unwrap()
    }
}

impl InterruptLine for MockInterrupt {
    fn register(&self, handler: IrqHandler) -> Result<(), BusError> {
        *self.handler.lock().unwrap() = Some(Arc::new(handler));
        *self.registrations.lock().unwrap() += 1;
        Ok(())
    }

    fn unregister(&self) {
        *self.handler.lock().unwrap() = None;
    }

    fn enable_wake(&self) -> Result<(), BusError> {
        *self.wake_enabled.lock().unwrap() = true;
        Ok(())
    }
}
