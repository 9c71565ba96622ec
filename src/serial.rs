// serial.rs

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;

use crate::*;

pub const BAUD_RATES: [u32; 12] = [
    300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115_200, 230_400, 460_800, 921_600,
];

/// Batch buffer size. One slot stays reserved, a payload holds `BUFSZ - 1` bytes.
pub const BUFSZ: usize = 256;
const SERIAL_STACK: usize = 6144;

pub fn is_valid_baud(baud: u32) -> bool {
    BAUD_RATES.contains(&baud)
}

/// The UART as seen by the bridge worker.
pub trait SerialPort: Send {
    fn set_baudrate(&mut self, baud: u32) -> anyhow::Result<()>;
    /// Non-blocking, `None` when nothing is waiting.
    fn read_byte(&mut self) -> Option<u8>;
    fn write_all(&mut self, data: &[u8]) -> anyhow::Result<()>;
    /// Raw level of both RX and TX lines. Idle-high on both is taken as
    /// "a peer is attached".
    fn lines_idle_high(&mut self) -> bool;
}

#[derive(Clone, Copy, Debug)]
pub struct BatchTiming {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for BatchTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(20),
            poll: Duration::from_millis(5),
        }
    }
}

/// Accumulates serial bytes until a terminator, a full buffer or an idle timeout.
#[derive(Debug)]
pub struct BatchBuffer {
    buf: heapless::Vec<u8, BUFSZ>,
    last_rx: Option<Instant>,
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            last_rx: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feeds one byte, returning a payload when this byte completes a batch.
    pub fn push(&mut self, byte: u8, now: Instant) -> Option<String> {
        self.last_rx = Some(now);

        if byte == b'\r' || byte == b'\n' {
            return self.flush();
        }

        if self.buf.len() + 1 < BUFSZ {
            // cannot fail, checked above
            let _ = self.buf.push(byte);
        }
        if self.buf.len() + 1 == BUFSZ {
            return self.flush();
        }
        None
    }

    /// Flushes a partial batch once nothing arrived for `timeout`.
    pub fn flush_idle(&mut self, now: Instant, timeout: Duration) -> Option<String> {
        let last = self.last_rx?;
        if now.saturating_duration_since(last) >= timeout {
            self.flush()
        } else {
            None
        }
    }

    fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(text)
    }
}

#[derive(Debug)]
enum SerialCommand {
    Write(Vec<u8>),
    SetBaud(u32),
}

struct SerialShared {
    baud: AtomicU32,
    present: AtomicBool,
}

/// Queries and commands for a running bridge, cheap to clone.
#[derive(Clone)]
pub struct SerialHandle {
    shared: Arc<SerialShared>,
    commands: mpsc::UnboundedSender<SerialCommand>,
}

impl SerialHandle {
    pub fn is_device_connected(&self) -> bool {
        self.shared.present.load(Ordering::Relaxed)
    }

    pub fn baud_rate(&self) -> u32 {
        self.shared.baud.load(Ordering::Relaxed)
    }

    /// Validated here, applied by the bridge worker which then broadcasts
    /// availability.
    pub fn set_baud(&self, baud: u32) -> anyhow::Result<()> {
        if !is_valid_baud(baud) {
            warn!(target: "serial", "Rejected baud rate {baud}");
            anyhow::bail!("invalid baud rate {baud}");
        }
        self.commands.send(SerialCommand::SetBaud(baud))?;
        Ok(())
    }

    /// Fire and forget.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> anyhow::Result<()> {
        self.commands.send(SerialCommand::Write(data.into()))?;
        Ok(())
    }
}

pub struct SerialBridge<P, B> {
    port: P,
    events: B,
    status: StatusRegistry,
    shared: Arc<SerialShared>,
    commands: mpsc::UnboundedReceiver<SerialCommand>,
    batch: BatchBuffer,
    timing: BatchTiming,
}

impl<P, B> SerialBridge<P, B>
where
    P: SerialPort + 'static,
    B: Broadcast + 'static,
{
    pub fn new(
        port: P,
        events: B,
        status: StatusRegistry,
        timing: BatchTiming,
    ) -> (Self, SerialHandle) {
        let shared = Arc::new(SerialShared {
            baud: AtomicU32::new(0),
            present: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        status.add(StatusCondition::SerialNotConnected);

        let bridge = Self {
            port,
            events,
            status,
            shared: shared.clone(),
            commands: rx,
            batch: BatchBuffer::new(),
            timing,
        };
        let handle = SerialHandle {
            shared,
            commands: tx,
        };
        (bridge, handle)
    }

    /// (Re)opens the UART at `baud`. An invalid rate leaves the active one alone.
    pub fn configure(&mut self, baud: u32) -> anyhow::Result<()> {
        if !is_valid_baud(baud) {
            warn!(target: "serial", "Rejected baud rate {baud}");
            anyhow::bail!("invalid baud rate {baud}");
        }
        let result = self.port.set_baudrate(baud);
        match &result {
            Ok(()) => {
                self.shared.baud.store(baud, Ordering::Relaxed);
                info!(target: "serial", "UART configured at {baud} bps");
            }
            Err(e) => error!(target: "serial", "UART config at {baud} failed: {e:#}"),
        }
        self.send_availability();
        result
    }

    pub fn send_availability(&self) {
        self.events.broadcast_text(serial_availability(
            self.shared.present.load(Ordering::Relaxed),
            self.shared.baud.load(Ordering::Relaxed),
        ));
    }

    /// One pass of the relay loop at time `now`.
    pub fn poll(&mut self, now: Instant) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                SerialCommand::Write(data) => {
                    if let Err(e) = self.port.write_all(&data) {
                        error!(target: "serial", "Serial write failed: {e:#}");
                    }
                }
                SerialCommand::SetBaud(baud) => {
                    if baud != self.shared.baud.load(Ordering::Relaxed) {
                        let _ = self.configure(baud);
                    } else {
                        self.send_availability();
                    }
                }
            }
        }

        self.check_presence();

        while let Some(byte) = self.port.read_byte() {
            if let Some(line) = self.batch.push(byte, now) {
                self.emit(line);
            }
        }

        if let Some(line) = self.batch.flush_idle(now, self.timing.timeout) {
            self.emit(line);
        }
    }

    fn check_presence(&mut self) {
        if self.shared.present.load(Ordering::Relaxed) || !self.port.lines_idle_high() {
            return;
        }
        self.shared.present.store(true, Ordering::Relaxed);
        self.status.remove(StatusCondition::SerialNotConnected);
        self.status.add(StatusCondition::SerialConnected);
        self.send_availability();
        info!(target: "device", "Device connected");
    }

    fn emit(&self, line: String) {
        self.events.broadcast_text(serial_incoming(&line));
        info!(target: "serial", "{line}");
    }

    pub fn run(mut self) {
        info!(target: "serial", "Serial bridge running");
        loop {
            self.poll(Instant::now());
            thread::sleep(self.timing.poll);
        }
    }

    /// Moves the bridge onto its own worker. Consumes `self`, so there is no
    /// second start.
    pub fn start(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("serial".into())
            .stack_size(SERIAL_STACK)
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{RecordingBroadcast, ScriptedSerial};
    use serde_json::Value;

    fn bridge() -> (
        ScriptedSerial,
        RecordingBroadcast,
        StatusRegistry,
        SerialBridge<ScriptedSerial, RecordingBroadcast>,
        SerialHandle,
    ) {
        let port = ScriptedSerial::new();
        let events = RecordingBroadcast::new();
        let status = StatusRegistry::new();
        let (bridge, handle) = SerialBridge::new(
            port.clone(),
            events.clone(),
            status.clone(),
            BatchTiming::default(),
        );
        (port, events, status, bridge, handle)
    }

    fn incoming(events: &RecordingBroadcast) -> Vec<String> {
        events
            .take()
            .iter()
            .filter_map(|e| {
                let v: Value = serde_json::from_str(e).ok()?;
                (v["action"] == "incoming").then(|| v["details"].as_str().unwrap().to_string())
            })
            .collect()
    }

    #[test]
    fn terminator_flushes_in_order() {
        let (port, events, _, mut bridge, _) = bridge();
        let t0 = Instant::now();
        port.feed(b"AB\nCD");

        bridge.poll(t0);
        assert_eq!(incoming(&events), vec!["AB"]);

        // timeout not reached yet
        bridge.poll(t0 + Duration::from_millis(5));
        assert!(incoming(&events).is_empty());

        bridge.poll(t0 + Duration::from_millis(25));
        assert_eq!(incoming(&events), vec!["CD"]);
    }

    #[test]
    fn idle_timeout_flushes_partial_line() {
        let (port, events, _, mut bridge, _) = bridge();
        let t0 = Instant::now();
        port.feed(b"X");
        bridge.poll(t0);
        assert!(incoming(&events).is_empty());

        bridge.poll(t0 + Duration::from_millis(21));
        assert_eq!(incoming(&events), vec!["X"]);

        // nothing left to flush later on
        bridge.poll(t0 + Duration::from_millis(100));
        assert!(incoming(&events).is_empty());
    }

    #[test]
    fn crlf_is_one_event() {
        let (port, events, _, mut bridge, _) = bridge();
        port.feed(b"OK\r\n");
        bridge.poll(Instant::now());
        assert_eq!(incoming(&events), vec!["OK"]);
    }

    #[test]
    fn full_buffer_flushes_without_terminator() {
        let mut batch = BatchBuffer::new();
        let now = Instant::now();
        for _ in 0..BUFSZ - 2 {
            assert_eq!(batch.push(b'a', now), None);
        }
        // the byte that fills the last usable slot flushes right away
        let line = batch.push(b'b', now).unwrap();
        assert_eq!(line.len(), BUFSZ - 1);
        assert!(line.ends_with('b'));
        assert!(batch.is_empty());
    }

    #[test]
    fn capacity_flush_beats_timeout() {
        let (port, events, _, mut bridge, _) = bridge();
        port.feed(&[b'z'; BUFSZ + 10]);
        bridge.poll(Instant::now());
        let lines = incoming(&events);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), BUFSZ - 1);
        // the 11 bytes beyond the first batch wait for the timeout
        assert_eq!(bridge.batch.len(), 11);
    }

    #[test]
    fn presence_is_flagged_once() {
        let (port, events, status, mut bridge, handle) = bridge();
        assert!(status.is_active(StatusCondition::SerialNotConnected));
        bridge.poll(Instant::now());
        assert!(!handle.is_device_connected());

        port.set_lines_high(true);
        bridge.poll(Instant::now());
        bridge.poll(Instant::now());
        assert!(handle.is_device_connected());
        assert!(status.is_active(StatusCondition::SerialConnected));
        assert!(!status.is_active(StatusCondition::SerialNotConnected));

        let availability: Vec<Value> = events
            .take()
            .iter()
            .map(|e| serde_json::from_str(e).unwrap())
            .filter(|v: &Value| v["action"] == "status")
            .collect();
        assert_eq!(availability.len(), 1);
        assert_eq!(availability[0]["details"]["available"], true);
    }

    #[test]
    fn configure_rejects_unknown_rate() {
        let (port, events, _, mut bridge, handle) = bridge();
        bridge.configure(9600).unwrap();
        assert_eq!(handle.baud_rate(), 9600);
        assert_eq!(port.baud(), 9600);
        assert_eq!(events.take().len(), 1);

        assert!(bridge.configure(12345).is_err());
        assert_eq!(handle.baud_rate(), 9600);
        assert_eq!(port.baud(), 9600);
    }

    #[test]
    fn handle_commands_reach_the_port() {
        let (port, events, _, mut bridge, handle) = bridge();
        bridge.configure(115_200).unwrap();
        events.take();

        handle.send("AT\r\n").unwrap();
        assert!(handle.set_baud(7).is_err());
        handle.set_baud(57600).unwrap();
        bridge.poll(Instant::now());

        assert_eq!(port.written(), b"AT\r\n");
        assert_eq!(port.baud(), 57600);
        assert_eq!(handle.baud_rate(), 57600);
        let v: Value = serde_json::from_str(&events.take()[0]).unwrap();
        assert_eq!(v["details"]["baudRate"], 57600);
    }

    #[test]
    fn lossy_utf8_payload() {
        let (port, events, _, mut bridge, _) = bridge();
        port.feed(&[0x41, 0xff, b'\n']);
        bridge.poll(Instant::now());
        assert_eq!(incoming(&events), vec!["A\u{fffd}"]);
    }
}

// EOF
