use core::fmt::{self, Write};
use ::x86_64::instructions::port::Port;
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// The first legacy UART.
pub static COM1: Mutex<SerialPort> = Mutex::new(SerialPort::new(0x3f8));

static LOGGER: SerialLogger = SerialLogger;

#[macro_export]
macro_rules! serial_print {
    ($($args:tt)*) => { $crate::arch::x86_64::serial::serial_print(format_args!($($args)*)); };
}

#[macro_export]
macro_rules! serial_println {
    ($fmt:expr, $($args:tt)*) => { $crate::serial_print!(concat!($fmt, "\n"), $($args)*); };
    ($fmt:expr) => { $crate::serial_print!(concat!($fmt, "\n")); };
    () => { $crate::serial_print!("\n"); };
}

pub fn serial_print(args: fmt::Arguments) {
    // writing to the port itself cannot fail
    let _ = COM1.lock().write_fmt(args);
}

/// Initializes COM1 and installs it as the `log` sink.
///
/// Calling this twice keeps the first logger; only the level is updated.
pub fn init(level: LevelFilter) {
    COM1.lock().init();
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// A polled, output-only 16550 UART.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        SerialPort { base }
    }

    fn port(&self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }

    /// Programs 38400 baud, 8N1, FIFOs on.
    pub fn init(&mut self) {
        unsafe {
            self.port(1).write(0x00);
            self.port(3).write(0x80);
            self.port(0).write(0x03);
            self.port(1).write(0x00);
            self.port(3).write(0x03);
            self.port(2).write(0xc7);
            self.port(4).write(0x0b);
        }
    }

    fn transmit_empty(&self) -> bool {
        unsafe { self.port(5).read() & 0x20 != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !self.transmit_empty() {}
        unsafe {
            self.port(0).write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}
