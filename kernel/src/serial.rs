//! Serial sink for kernel log output.
//!
//! On the kernel this is COM1 as QEMU exposes it. Host test builds route the
//! same macros to stdout so `cargo test` captures heap logs per test.

#[cfg(all(target_arch = "x86_64", not(test)))]
use conquer_once::spin::Lazy;
#[cfg(all(target_arch = "x86_64", not(test)))]
use spin::Mutex;
#[cfg(all(target_arch = "x86_64", not(test)))]
use uart_16550::SerialPort;

/// I/O port base of COM1.
#[cfg(all(target_arch = "x86_64", not(test)))]
const COM1: u16 = 0x3F8;

/// Serial port for writing to the serial interface in QEMU.
#[cfg(all(target_arch = "x86_64", not(test)))]
pub static SERIAL1: Lazy<Mutex<SerialPort>> = Lazy::new(|| {
    let mut serial_port = unsafe { SerialPort::new(COM1) };
    serial_port.init();
    Mutex::new(serial_port)
});

/// Writes preformatted arguments to the serial sink.
#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    #[cfg(test)]
    {
        std::print!("{}", args);
    }

    #[cfg(all(target_arch = "x86_64", not(test)))]
    {
        let _ = core::fmt::Write::write_fmt(&mut *SERIAL1.lock(), args);
    }

    #[cfg(all(not(target_arch = "x86_64"), not(test)))]
    {
        let _ = args;
    }
}

/// Global print! macro that writes to the serial interface in QEMU.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!($($arg)*));
    }};
}

/// Global println! macro that writes to the serial interface in QEMU.
#[macro_export]
macro_rules! serial_println {
    () => {
        $crate::serial_print!("\n");
    };
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*));
    };
}
