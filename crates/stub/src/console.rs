use core::{
    fmt::{self, Write as _},
    hint,
    panic::PanicInfo,
    ptr,
    sync::atomic::{AtomicBool, Ordering},
};

use ansi_term::{Color, WithFg};
use bitflags::bitflags;
use spin::Mutex;

use crate::config;

static CONSOLE: Mutex<Pl011> = Mutex::new(Pl011::new(config::UART_BASE));
static PANICKED: AtomicBool = AtomicBool::new(false);

const UARTDR: usize = 0x00;
const UARTFR: usize = 0x18;

bitflags! {
    /// PL011 flag register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Flags: u32 {
        const BUSY = 1 << 3;
        const TXFF = 1 << 5;
    }
}

/// Transmit side of a PL011 UART left configured by the previous stage.
struct Pl011 {
    base: usize,
}

impl Pl011 {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    fn flags(&self) -> Flags {
        let reg = ptr::with_exposed_provenance::<u32>(self.base + UARTFR);
        Flags::from_bits_truncate(unsafe { reg.read_volatile() })
    }

    fn write_byte(&mut self, byte: u8) {
        while self.flags().contains(Flags::TXFF) {
            hint::spin_loop();
        }
        let reg = ptr::with_exposed_provenance_mut::<u32>(self.base + UARTDR);
        unsafe { reg.write_volatile(u32::from(byte)) }
    }

    fn flush(&self) {
        while self.flags().contains(Flags::BUSY) {
            hint::spin_loop();
        }
    }
}

impl fmt::Write for Pl011 {
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

pub fn print(args: fmt::Arguments) {
    if PANICKED.load(Ordering::Acquire) {
        loop {
            // Spin forever to avoid further issues.
            hint::spin_loop();
        }
    }
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Waits until everything written so far has left the UART.
pub fn flush() {
    CONSOLE.lock().flush();
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

struct OrUnknown<T>(Option<T>);

impl<T> fmt::Display for OrUnknown<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = &self.0 {
            fmt::Display::fmt(value, f)
        } else {
            fmt::Display::fmt("<Unknown>", f)
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    PANICKED.store(true, Ordering::Release);
    let header = WithFg::new(Color::Red, "!!! STUB PANIC !!!");
    let loc = OrUnknown(info.location());

    // The lock may be held by the code that panicked.
    let mut fallback = Pl011::new(config::UART_BASE);
    let mut guard = CONSOLE.try_lock();
    let console = guard.as_deref_mut().unwrap_or(&mut fallback);
    let _ = writeln!(console);
    let _ = writeln!(console);
    let _ = writeln!(console, "{header}");
    let _ = writeln!(console);
    let _ = writeln!(console, "Location:");
    let _ = writeln!(console, "  {loc}");
    let _ = writeln!(console);
    let _ = writeln!(console, "Message:");
    let _ = writeln!(console, "  {}", info.message());
    let _ = writeln!(console);
    console.flush();
    loop {
        aarch64_utils::asm::wfe();
    }
}
