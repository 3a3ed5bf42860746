//! Pan/tilt motion control.
//!
//! The frame loop publishes aim points through a [`TargetSetter`]; a dedicated
//! motion thread advances each axis toward its target by a bounded step every
//! interval and writes the current angle to the actuator on every tick. The
//! target pair is shared behind a mutex with latest-value semantics.
//!
//! When the actuator cannot be connected the controller is inactive for the
//! rest of the session: targets are ignored and no actuator I/O happens.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::arbiter::TargetCommand;
use crate::config::ServoSettings;
use crate::status::{StatusEvent, StatusSink};

pub const MIN_DEGREES: f32 = 0.0;
pub const MAX_DEGREES: f32 = 180.0;
pub const CENTER_DEGREES: f32 = 90.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Pan => "pan",
            Axis::Tilt => "tilt",
        }
    }
}

/// Hardware boundary for a two-axis servo rig.
pub trait ServoActuator: Send {
    fn connect(&mut self, port: &str, baudrate: u32) -> Result<()>;
    /// `degrees` is within `[0, 180]`.
    fn write_angle(&mut self, axis: Axis, degrees: f32) -> Result<()>;
    fn disconnect(&mut self);
}

// ----------------------------------------------------------------------------
// Firmata actuator
// ----------------------------------------------------------------------------

const ANALOG_MESSAGE: u8 = 0xE0;
const REPORT_VERSION: u8 = 0xF9;
const SET_PIN_MODE: u8 = 0xF4;
const PIN_MODE_SERVO: u8 = 0x04;
const START_SYSEX: u8 = 0xF0;
const SERVO_CONFIG: u8 = 0x70;
const END_SYSEX: u8 = 0xF7;
const MIN_PULSE_US: u16 = 544;
const MAX_PULSE_US: u16 = 2400;

const SERIAL_TIMEOUT: Duration = Duration::from_millis(100);
/// Boards that reset on open (Uno, Nano) need this long before the firmware listens.
pub const DEFAULT_RESET_DELAY: Duration = Duration::from_millis(2000);
const VERSION_TIMEOUT: Duration = Duration::from_millis(1500);

/// Byte stream to the board.
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send> SerialLink for T {}

/// Opens `port` at `baudrate`.
pub type PortOpener = Box<dyn Fn(&str, u32) -> Result<Box<dyn SerialLink>> + Send>;

/// Default opener: 8N1 serial port via `serialport`.
pub fn open_serial_port(port: &str, baudrate: u32) -> Result<Box<dyn SerialLink>> {
    let serial = serialport::new(port, baudrate)
        .timeout(SERIAL_TIMEOUT)
        .open()
        .with_context(|| format!("failed to open servo port {} at {} baud", port, baudrate))?;
    Ok(Box::new(serial))
}

/// Drives two servos on a board running StandardFirmata.
pub struct FirmataActuator {
    pan_pin: u8,
    tilt_pin: u8,
    port: Option<Box<dyn SerialLink>>,
    opener: PortOpener,
    reset_delay: Duration,
}

impl FirmataActuator {
    pub fn new(pan_pin: u8, tilt_pin: u8) -> Self {
        Self {
            pan_pin,
            tilt_pin,
            port: None,
            opener: Box::new(open_serial_port),
            reset_delay: DEFAULT_RESET_DELAY,
        }
    }

    /// Replace how the serial port is opened.
    pub fn with_opener(mut self, opener: PortOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Time to wait after opening before talking to the firmware.
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    fn pin(&self, axis: Axis) -> u8 {
        match axis {
            Axis::Pan => self.pan_pin,
            Axis::Tilt => self.tilt_pin,
        }
    }
}

fn seven_bit_pair(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

fn servo_attach_bytes(pin: u8) -> Vec<u8> {
    let min = seven_bit_pair(MIN_PULSE_US);
    let max = seven_bit_pair(MAX_PULSE_US);
    vec![
        SET_PIN_MODE,
        pin,
        PIN_MODE_SERVO,
        START_SYSEX,
        SERVO_CONFIG,
        pin,
        min[0],
        min[1],
        max[0],
        max[1],
        END_SYSEX,
    ]
}

fn angle_bytes(pin: u8, degrees: f32) -> [u8; 3] {
    let value = degrees.clamp(MIN_DEGREES, MAX_DEGREES).round() as u16;
    let [lsb, msb] = seven_bit_pair(value);
    [ANALOG_MESSAGE | (pin & 0x0F), lsb, msb]
}

/// Ask for the protocol version and wait for the `0xF9 major minor` reply.
fn query_version(link: &mut dyn SerialLink, timeout: Duration) -> Result<Option<(u8, u8)>> {
    link.write_all(&[REPORT_VERSION])
        .context("failed to request firmata version")?;
    link.flush()?;

    let deadline = Instant::now() + timeout;
    let mut seen: Vec<u8> = Vec::new();
    let mut buf = [0u8; 64];
    while Instant::now() < deadline {
        match link.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                seen.extend_from_slice(&buf[..n]);
                if let Some(at) = seen.iter().position(|b| *b == REPORT_VERSION) {
                    if let [major, minor, ..] = &seen[at + 1..] {
                        return Ok(Some((*major, *minor)));
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(anyhow!("failed to read firmata version: {}", e)),
        }
    }
    Ok(None)
}

impl ServoActuator for FirmataActuator {
    fn connect(&mut self, port: &str, baudrate: u32) -> Result<()> {
        if self.pan_pin > 15 || self.tilt_pin > 15 {
            return Err(anyhow!(
                "servo pins {} / {} out of analog message range",
                self.pan_pin,
                self.tilt_pin
            ));
        }
        let mut link = (self.opener)(port, baudrate)?;
        if !self.reset_delay.is_zero() {
            log::debug!("waiting {:?} for board reset on {}", self.reset_delay, port);
            std::thread::sleep(self.reset_delay);
        }
        match query_version(link.as_mut(), VERSION_TIMEOUT)? {
            Some((major, minor)) => log::info!(
                "firmata {}.{} on {} at {} baud",
                major,
                minor,
                port,
                baudrate
            ),
            None => log::warn!(
                "no firmata version report from {} at {} baud; continuing",
                port,
                baudrate
            ),
        }
        for pin in [self.pan_pin, self.tilt_pin] {
            link.write_all(&servo_attach_bytes(pin))
                .with_context(|| format!("failed to attach servo on pin {}", pin))?;
        }
        link.flush()?;
        self.port = Some(link);
        Ok(())
    }

    fn write_angle(&mut self, axis: Axis, degrees: f32) -> Result<()> {
        let pin = self.pin(axis);
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| anyhow!("servo port not connected"))?;
        port.write_all(&angle_bytes(pin, degrees))
            .with_context(|| format!("failed to write {} angle", axis.as_str()))?;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut port) = self.port.take() {
            let _ = port.flush();
        }
    }
}

// ----------------------------------------------------------------------------
// Motion controller
// ----------------------------------------------------------------------------

/// Current and target angle of one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisState {
    pub current: f32,
    pub target: f32,
}

impl AxisState {
    pub fn centered() -> Self {
        Self {
            current: CENTER_DEGREES,
            target: CENTER_DEGREES,
        }
    }

    /// Move `current` toward `target` by at most `max_step`, never overshooting.
    pub fn advance(&mut self, max_step: f32) {
        let delta = self.target - self.current;
        if delta.abs() <= max_step {
            self.current = self.target;
        } else {
            self.current += max_step.copysign(delta);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ServoState {
    pub pan: AxisState,
    pub tilt: AxisState,
}

impl Default for ServoState {
    fn default() -> Self {
        Self {
            pan: AxisState::centered(),
            tilt: AxisState::centered(),
        }
    }
}

/// Map a pixel coordinate in `[0, span]` to `[0, 180]` degrees, clamped.
pub fn interpolate_angle(coord: f32, span: u32) -> f32 {
    if span == 0 {
        return CENTER_DEGREES;
    }
    (coord / span as f32 * MAX_DEGREES).clamp(MIN_DEGREES, MAX_DEGREES)
}

struct Shared {
    state: Mutex<ServoState>,
    active: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ServoState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle for publishing aim points from any thread.
#[derive(Clone)]
pub struct TargetSetter {
    shared: Arc<Shared>,
}

impl TargetSetter {
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// No-op while the controller is inactive.
    pub fn set_target(&self, x: f32, y: f32, width: u32, height: u32) {
        if !self.is_active() {
            log::debug!("servo inactive; target ({:.0}, {:.0}) ignored", x, y);
            return;
        }
        let pan = interpolate_angle(x, width);
        let tilt = interpolate_angle(y, height);
        let mut state = self.shared.lock();
        state.pan.target = pan;
        state.tilt.target = tilt;
    }

    pub fn apply(&self, command: &TargetCommand) {
        self.set_target(
            command.x,
            command.y,
            command.frame_width,
            command.frame_height,
        );
    }

    pub fn state(&self) -> ServoState {
        *self.shared.lock()
    }
}

pub struct MotionController {
    actuator: Option<Box<dyn ServoActuator>>,
    shared: Arc<Shared>,
    step_degrees: f32,
    step_interval: Duration,
    status: StatusSink,
}

impl MotionController {
    /// Connect the actuator and centre both axes. A failed connection yields an
    /// inactive controller and one `ActuatorInactive` status event.
    pub fn connect(
        mut actuator: Box<dyn ServoActuator>,
        settings: &ServoSettings,
        status: StatusSink,
    ) -> Self {
        let connected = actuator
            .connect(&settings.port, settings.baudrate)
            .and_then(|_| {
                actuator.write_angle(Axis::Pan, CENTER_DEGREES)?;
                actuator.write_angle(Axis::Tilt, CENTER_DEGREES)
            });
        match connected {
            Ok(()) => {
                log::info!("servo connected on {}", settings.port);
                status.send(StatusEvent::ActuatorConnected {
                    port: settings.port.clone(),
                });
                Self::build(Some(actuator), settings, status)
            }
            Err(e) => {
                log::warn!(
                    "servo unavailable on {}: {:#}; tracking without aiming",
                    settings.port,
                    e
                );
                actuator.disconnect();
                status.send(StatusEvent::ActuatorInactive {
                    reason: format!("failed to connect to {}: {:#}", settings.port, e),
                });
                Self::build(None, settings, status)
            }
        }
    }

    /// Controller with no actuator at all.
    pub fn inactive(settings: &ServoSettings, status: StatusSink) -> Self {
        status.send(StatusEvent::ActuatorInactive {
            reason: "servo disabled".to_string(),
        });
        Self::build(None, settings, status)
    }

    fn build(
        actuator: Option<Box<dyn ServoActuator>>,
        settings: &ServoSettings,
        status: StatusSink,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ServoState::default()),
            active: AtomicBool::new(actuator.is_some()),
        });
        Self {
            actuator,
            shared,
            step_degrees: settings.step_degrees,
            step_interval: Duration::from_millis(settings.step_interval_ms),
            status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.actuator.is_some()
    }

    pub fn target_setter(&self) -> TargetSetter {
        TargetSetter {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ServoState {
        *self.shared.lock()
    }

    /// One motion tick: advance both axes and write their current angles.
    pub fn step(&mut self) {
        let Some(actuator) = self.actuator.as_mut() else {
            return;
        };
        let (pan, tilt) = {
            let mut state = self.shared.lock();
            state.pan.advance(self.step_degrees);
            state.tilt.advance(self.step_degrees);
            (state.pan.current, state.tilt.current)
        };
        let written = actuator
            .write_angle(Axis::Pan, pan)
            .and_then(|_| actuator.write_angle(Axis::Tilt, tilt));
        if let Err(e) = written {
            log::warn!("servo write failed: {:#}; aiming disabled", e);
            self.shared.active.store(false, Ordering::SeqCst);
            if let Some(mut actuator) = self.actuator.take() {
                actuator.disconnect();
            }
            self.status.send(StatusEvent::ActuatorLost {
                reason: format!("{:#}", e),
            });
        }
    }

    /// Release the actuator.
    pub fn shutdown(mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(mut actuator) = self.actuator.take() {
            actuator.disconnect();
            log::info!("servo disconnected");
        }
    }

    /// Run the step loop on its own thread until the handle is stopped.
    pub fn spawn(self) -> Result<MotionHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let target = self.target_setter();
        let join = std::thread::Builder::new()
            .name("motion".to_string())
            .spawn(move || run_motion(self, shutdown_thread))
            .context("failed to spawn motion thread")?;
        Ok(MotionHandle {
            target,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_motion(mut controller: MotionController, shutdown: Arc<AtomicBool>) -> MotionController {
    let interval = controller.step_interval;
    let mut next_tick = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        controller.step();
        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
    controller
}

pub struct MotionHandle {
    target: TargetSetter,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<MotionController>>,
}

impl MotionHandle {
    pub fn target_setter(&self) -> TargetSetter {
        self.target.clone()
    }

    /// Signal the loop, wait for it to exit, then release the actuator.
    pub fn stop(mut self) -> Result<()> {
        self.halt()
    }

    fn halt(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let controller = join
                .join()
                .map_err(|_| anyhow!("motion thread panicked"))?;
            controller.shutdown();
        }
        Ok(())
    }
}

impl Drop for MotionHandle {
    fn drop(&mut self) {
        if let Err(e) = self.halt() {
            log::warn!("motion controller did not stop cleanly: {:#}", e);
        }
    }
}
