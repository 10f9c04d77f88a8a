use parking_lot::Mutex;
use std::{
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serialport::{DataBits, SerialPort, StopBits};

use super::{Link, LinkCore, LinkError, LinkId, Notifier};

/// Read timeout of the background reader; bounds how long `close` waits.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Longest line kept before it is force-flushed without a terminator.
const MAX_LINE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: serialport::Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: serialport::Parity::None,
        }
    }
}

impl SerialConfig {
    pub fn apply_builder(&self, b: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
        let b = b.data_bits(match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        });
        let b = b.stop_bits(match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        });
        b.parity(self.parity)
    }
}

struct OpenPort {
    writer: Box<dyn SerialPort>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// [`Link`] backed by an OS serial port.
///
/// Opening spawns a reader thread that splits the byte stream on `\n`,
/// strips a trailing `\r`, and hands each line to the shared [`LinkCore`].
pub struct SerialLink {
    core: Arc<LinkCore>,
    port_name: String,
    config: SerialConfig,
    port: Mutex<Option<OpenPort>>,
}

impl SerialLink {
    pub fn new(id: LinkId, port_name: impl Into<String>, config: SerialConfig) -> Self {
        Self {
            core: LinkCore::new(id),
            port_name: port_name.into(),
            config,
            port: Mutex::new(None),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn open_native(&self) -> Result<Box<dyn SerialPort>, LinkError> {
        let id = self.core.id();
        let builder = serialport::new(&self.port_name, self.config.baud).timeout(READ_TIMEOUT);
        let builder = self.config.apply_builder(builder);

        #[cfg(unix)]
        {
            let mut handle = builder.open_native().map_err(|err| LinkError::Open {
                link: id,
                reason: format!("{}: {err}", self.port_name),
            })?;
            handle.set_exclusive(true).map_err(|err| LinkError::Open {
                link: id,
                reason: format!("{} is busy: {err}", self.port_name),
            })?;
            Ok(Box::new(handle))
        }

        #[cfg(not(unix))]
        {
            builder.open().map_err(|err| LinkError::Open {
                link: id,
                reason: format!("{}: {err}", self.port_name),
            })
        }
    }
}

impl Link for SerialLink {
    fn id(&self) -> LinkId {
        self.core.id()
    }

    fn open(&self) -> Result<(), LinkError> {
        let mut slot = self.port.lock();
        if slot.is_some() {
            return Ok(());
        }

        let writer = self.open_native()?;
        let reader_port = writer.try_clone().map_err(|err| LinkError::Open {
            link: self.core.id(),
            reason: format!("{}: {err}", self.port_name),
        })?;
        self.core.clear();

        let stop = Arc::new(AtomicBool::new(false));
        let core = Arc::clone(&self.core);
        let stop_flag = Arc::clone(&stop);
        let reader = thread::Builder::new()
            .name(format!("{}-reader", self.core.id()))
            .spawn(move || read_loop(reader_port, core, stop_flag))
            .map_err(|err| LinkError::Open {
                link: self.core.id(),
                reason: format!("failed to spawn reader thread: {err}"),
            })?;

        log::info!("{} opened on {}", self.core.id(), self.port_name);
        *slot = Some(OpenPort {
            writer,
            stop,
            reader: Some(reader),
        });
        Ok(())
    }

    fn close(&self) -> Result<(), LinkError> {
        let Some(mut open) = self.port.lock().take() else {
            return Ok(());
        };
        open.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = open.reader.take() {
            if reader.join().is_err() {
                log::warn!("{} reader thread panicked", self.core.id());
            }
        }
        self.core.clear();
        log::info!("{} closed", self.core.id());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn write_line(&self, text: &str) -> Result<(), LinkError> {
        let id = self.core.id();
        let mut slot = self.port.lock();
        let open = slot.as_mut().ok_or(LinkError::NotOpen { link: id })?;
        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(b'\n');
        open.writer
            .write_all(&frame)
            .and_then(|_| open.writer.flush())
            .map_err(|err| LinkError::Io {
                link: id,
                reason: err.to_string(),
            })
    }

    fn read_line(&self) -> Result<String, LinkError> {
        self.core.read_line()
    }

    fn notifier(&self) -> &Notifier {
        self.core.notifier()
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, core: Arc<LinkCore>, stop: Arc<AtomicBool>) {
    let mut assembling: Vec<u8> = Vec::with_capacity(256);
    let mut buf = [0u8; 256];

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for line in split_lines(&mut assembling, &buf[..n]) {
                    core.deliver(line);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::warn!("{} read error: {e}", core.id());
                thread::sleep(READ_TIMEOUT);
            }
        }
    }
}

/// Append `chunk` to `assembling` and return every line it completes.
fn split_lines(assembling: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for &byte in chunk {
        if byte == b'\n' {
            if assembling.last() == Some(&b'\r') {
                assembling.pop();
            }
            lines.push(String::from_utf8_lossy(assembling).into_owned());
            assembling.clear();
        } else {
            assembling.push(byte);
            if assembling.len() >= MAX_LINE {
                lines.push(String::from_utf8_lossy(assembling).into_owned());
                assembling.clear();
            }
        }
    }
    lines
}
