use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::usart::{
    BufferedUart, BufferedUartRx, BufferedUartTx, Config as UartConfig, DataBits, Parity,
    StopBits,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use meter_core::capture::CaptureOutcome;
use meter_core::controller::MeterController;
use meter_core::{BACKLOG_CAPACITY, Meter, MeterConfig, Uptime};
use static_cell::StaticCell;

use crate::clock::WallClock;
use crate::fuel_gauge::FuelGauge;
use crate::modem::link::ModemLink;
use crate::reset;

mod control_task;
mod pulse_task;
mod retained;
mod signal_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const MODEM_UART_BUFFER_SIZE: usize = 256;
const MODEM_UART_BAUD: u32 = 115_200;
const CAPTURE_QUEUE_DEPTH: usize = 8;

/// Debounce outcome handed from the pulse task to the control task.
#[derive(Copy, Clone, Debug)]
pub struct CaptureEvent {
    pub outcome: CaptureOutcome,
    pub at: Uptime,
}

pub type CaptureQueue = Channel<CriticalSectionRawMutex, CaptureEvent, CAPTURE_QUEUE_DEPTH>;
pub type Controller = MeterController<'static, BACKLOG_CAPACITY>;
pub type Modem = ModemLink<BufferedUartRx<'static>, BufferedUartTx<'static>>;

pub(super) static METER: Meter = Meter::new();
pub(super) static CLOCK: WallClock = WallClock::new();
pub(super) static CAPTURES: CaptureQueue = Channel::new();
/// Raised after each committed pulse so the signal task can blink.
pub(super) static SIGNAL_PENDING: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static UART_TX_BUFFER: StaticCell<[u8; MODEM_UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; MODEM_UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// Milliseconds since the executor started.
pub fn uptime() -> Uptime {
    Uptime::from_millis(Instant::now().as_millis())
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let reason = reset::take_reset_reason();
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA5,
        PA6,
        PB0,
        PB1,
        PB6,
        PB7,
        EXTI0,
        I2C1,
        USART5,
        ..
    } = hal::init(config);

    let validation = retained::restore(&METER);
    let Ok(controller) =
        MeterController::boot(&METER, MeterConfig::new(), reason, validation, uptime())
    else {
        defmt::panic!("meter configuration rejected");
    };
    defmt::info!(
        "boot: reason={} record={}",
        defmt::Display2Format(&reason),
        if validation.is_valid() { "retained" } else { "reinitialised" }
    );
    retained::persist(&METER);

    let meter_config = *controller.config();

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = MODEM_UART_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = match BufferedUart::new(
        USART5,
        PB1,
        PB0,
        UART_TX_BUFFER.init([0; MODEM_UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; MODEM_UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    ) {
        Ok(uart) => uart,
        Err(error) => defmt::panic!("modem UART init failed: {}", error),
    };
    let (uart_tx, uart_rx) = uart.split();
    let modem = ModemLink::new(uart_rx, uart_tx);

    let gauge = FuelGauge::new(I2c::new_blocking(I2C1, PB6, PB7, i2c::Config::default()));

    let switch = ExtiInput::new(PA0, EXTI0, Pull::Up);
    let signal_led = Output::new(PA5, Level::Low, Speed::Low);
    let fault_led = Output::new(PA6, Level::Low, Speed::Low);

    spawner
        .spawn(pulse_task::run(switch, meter_config.debounce))
        .expect("failed to spawn pulse task");

    spawner
        .spawn(signal_task::run(
            signal_led,
            fault_led,
            meter_config.signal_on,
            meter_config.signal_off,
        ))
        .expect("failed to spawn signal task");

    spawner
        .spawn(control_task::run(controller, modem, gauge))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}
