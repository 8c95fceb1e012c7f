//! Shared fixtures: a scripted in-memory transport and a known register map.

#![allow(dead_code)]

use async_trait::async_trait;
use ingeteam_modbus::{HubConfig, RegisterLayout, RegisterTransport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Counters and script shared between a test and its [`MockTransport`].
#[derive(Default)]
pub struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_connect: AtomicBool,
    registers: Mutex<Vec<u16>>,
    script: Mutex<VecDeque<Result<Vec<u16>, TransportError>>>,
    requests: Mutex<Vec<(u8, u16, u16)>>,
    read_delay: Mutex<Duration>,
}

impl MockState {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Most transport operations ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `(unit_id, address, count)` of every read, in order.
    pub fn requests(&self) -> Vec<(u8, u16, u16)> {
        self.requests.lock().clone()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_registers(&self, words: Vec<u16>) {
        *self.registers.lock() = words;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Mark one transport operation as running until the guard drops.
    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }

    /// Answer the next read with `response` instead of the register map.
    pub fn push_response(&self, response: Result<Vec<u16>, TransportError>) {
        self.script.lock().push_back(response);
    }
}

struct InFlight<'a>(&'a MockState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory transport serving reads from a register map.
pub struct MockTransport {
    state: Arc<MockState>,
    open: bool,
}

impl MockTransport {
    pub fn new(registers: Vec<u16>) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        state.set_registers(registers);
        (
            Self {
                state: state.clone(),
                open: false,
            },
            state,
        )
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let state = self.state.clone();
        let _op = state.enter();
        state.connects.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if state.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                addr: self.endpoint(),
                message: "connection refused".to_string(),
            });
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let state = self.state.clone();
        let _op = state.enter();
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        state.reads.fetch_add(1, Ordering::SeqCst);
        state.requests.lock().push((unit_id, address, count));

        let delay = *state.read_delay.lock();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        let scripted = state.script.lock().pop_front();
        let result = match scripted {
            Some(response) => response,
            None => {
                let registers = state.registers.lock();
                let start = address as usize;
                let end = (start + count as usize).min(registers.len());
                Ok(registers.get(start..end).map(<[u16]>::to_vec).unwrap_or_default())
            }
        };

        if let Err(e) = &result {
            if e.is_connection_lost() {
                self.open = false;
            }
        }

        result
    }

    async fn close(&mut self) {
        let state = self.state.clone();
        let _op = state.enter();
        tokio::task::yield_now().await;
        self.open = false;
        state.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn endpoint(&self) -> String {
        "mock:502".to_string()
    }
}

/// Hub settings whose timer never fires during a test.
pub fn manual_config(layout: RegisterLayout) -> HubConfig {
    let mut config = HubConfig::new("mock");
    config.name = "test".to_string();
    config.scan_interval_secs = 3600;
    config.read_meter = true;
    config.read_battery = true;
    config.layout = layout;
    config
}

/// A plausible register map of an inverter charging its battery from PV
/// while exporting to the grid.
pub fn golden_registers() -> Vec<u16> {
    let mut words = vec![0u16; 81];
    let mut set = |address: usize, value: u16| words[address] = value;

    set(6, 0x5678);
    set(7, 0x0001);
    set(10, 3);
    set(15, 3);
    set(17, 523);
    set(18, 0xFF38);
    set(19, 0xFF9C);
    set(20, 87);
    set(21, 98);
    set(22, 576);
    set(23, 460);
    set(24, 5000);
    set(25, 5000);
    set(26, 2);
    set(27, 251);
    set(30, 524);
    set(31, 380);
    set(32, 395);
    set(33, 1500);
    set(34, 372);
    set(35, 322);
    set(36, 1200);
    set(37, 2600);
    set(38, 0xFFF6);
    set(39, 1000);
    set(40, 1000);
    set(43, 230);
    set(44, 150);
    set(45, 5000);
    set(46, 345);
    set(48, 231);
    set(49, 1130);
    set(50, 4998);
    set(51, 2600);
    set(52, 0xFFF6);
    set(53, 998);
    set(54, 390);
    set(55, 412);
    set(56, 398);
    set(57, 0xFFEC);
    set(59, 1200);
    set(60, 1150);
    set(61, 35);
    set(62, 1);
    set(65, 1);
    set(69, 232);
    set(70, 500);
    set(71, 0xFB50);
    set(72, 0xFFCE);
    set(78, 345);
    set(79, 300);

    words
}
