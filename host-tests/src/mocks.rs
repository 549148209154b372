//! Recording doubles for every hardware seam of the panel.
//!
//! All doubles of one [`Rig`] share a single [`EventLog`], so tests can check
//! the order in which the lifecycle touches the hardware.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use panel_core::config::{PanelGeometry, PinAssignment};
use panel_core::lifecycle::{PanelHardware, PanelParts};
use panel_core::scanout::{BufferId, FramebufferPair, MemoryScanout, ScanoutBackend};
use panel_core::serial::BitBangSpi;
use panel_core::sim::{SimGraphics, SimSurface};
use panel_core::surface::{GraphicsLibrary, RenderTarget, SurfaceConfig};
use panel_core::timebase::{TickSink, Timebase};
use panel_core::{PanelError, PanelSpec, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pin(&'static str, bool),
    ScanoutStart,
    ScanoutStop,
    Commit(BufferId),
    SurfaceCreate,
    SurfaceDestroy,
    TimebaseStart(u32),
    TimebaseStop,
    DelayMs(u32),
}

#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Events other than pin toggles and delays.
    pub fn milestones(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::Pin(..) | Event::DelayMs(_)))
            .collect()
    }

    /// Events on one named pin.
    pub fn pin(&self, name: &str) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Pin(n, level) if n == name => Some(level),
                _ => None,
            })
            .collect()
    }

    /// Decode bit-banged frames: SDA sampled on every SCL rising edge while CS
    /// is low, grouped per CS assertion.
    pub fn serial_frames(&self) -> Vec<Vec<bool>> {
        let mut frames = Vec::new();
        let mut current: Option<Vec<bool>> = None;
        let mut sda = false;
        for event in self.events() {
            match event {
                Event::Pin("spi_cs", false) => current = Some(Vec::new()),
                Event::Pin("spi_cs", true) => frames.extend(current.take()),
                Event::Pin("spi_sda", level) => sda = level,
                Event::Pin("spi_scl", true) => {
                    if let Some(bits) = current.as_mut() {
                        bits.push(sda);
                    }
                }
                _ => {}
            }
        }
        frames
    }
}

pub struct RecordingPin {
    name: &'static str,
    log: EventLog,
}

impl RecordingPin {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self { name, log: log.clone() }
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        self.log.push(Event::Pin(self.name, false));
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        self.log.push(Event::Pin(self.name, true));
        Ok(())
    }
}

/// Bit delays are ignored, millisecond delays are logged.
pub struct RecordingDelay {
    log: EventLog,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, _ns: u32) {}

    fn delay_ms(&mut self, ms: u32) {
        self.log.push(Event::DelayMs(ms));
    }
}

pub struct RecordingScanout {
    inner: MemoryScanout,
    log: EventLog,
}

impl RecordingScanout {
    pub fn displayed(&self) -> Option<BufferId> {
        self.inner.displayed()
    }
}

impl ScanoutBackend for RecordingScanout {
    fn start(&mut self, geometry: &PanelGeometry, pins: &PinAssignment) -> Result<()> {
        self.log.push(Event::ScanoutStart);
        self.inner.start(geometry, pins)
    }

    fn framebuffers(&mut self) -> Option<FramebufferPair<'_>> {
        self.inner.framebuffers()
    }

    fn framebuffer(&self, id: BufferId) -> Option<&[u8]> {
        self.inner.framebuffer(id)
    }

    fn commit(&mut self, id: BufferId) -> Result<()> {
        self.log.push(Event::Commit(id));
        self.inner.commit(id)
    }

    fn stop(&mut self) {
        self.log.push(Event::ScanoutStop);
        self.inner.stop();
    }
}

pub struct RecordingGraphics {
    pub inner: SimGraphics,
    pub fail_create: bool,
    log: EventLog,
}

impl GraphicsLibrary for RecordingGraphics {
    type Surface = SimSurface;

    fn create_surface(&mut self, config: &SurfaceConfig, buffers: FramebufferPair<'_>) -> Result<SimSurface> {
        self.log.push(Event::SurfaceCreate);
        if self.fail_create {
            return Err(PanelError::Graphics("display create failed".into()));
        }
        self.inner.create_surface(config, buffers)
    }

    fn destroy_surface(&mut self, surface: SimSurface) {
        self.log.push(Event::SurfaceDestroy);
        self.inner.destroy_surface(surface);
    }

    fn refresh(&mut self, surface: &mut SimSurface, target: &mut dyn RenderTarget) -> Result<u32> {
        self.inner.refresh(surface, target)
    }

    fn tick_sink(&self) -> Arc<dyn TickSink> {
        self.inner.tick_sink()
    }
}

pub struct RecordingTimebase {
    pub fail_start: bool,
    running: bool,
    log: EventLog,
}

impl Timebase for RecordingTimebase {
    fn start(&mut self, period_ms: u32, _sink: Arc<dyn TickSink>) -> Result<()> {
        self.log.push(Event::TimebaseStart(period_ms));
        if self.fail_start {
            return Err(PanelError::Timebase("esp_timer_create failed".into()));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.push(Event::TimebaseStop);
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

pub struct Rig;

impl PanelHardware for Rig {
    type Scanout = RecordingScanout;
    type Graphics = RecordingGraphics;
    type Timebase = RecordingTimebase;
    type Serial = BitBangSpi<RecordingPin, RecordingPin, RecordingPin, RecordingDelay>;
    type Backlight = RecordingPin;
    type Delay = RecordingDelay;
}

/// Parts wired to `log`, with an optional framebuffer pool limit.
pub fn rig_parts(spec: &PanelSpec, log: &EventLog, pool_bytes: Option<usize>) -> PanelParts<Rig> {
    let serial = spec.pins.serial.map(|_| {
        BitBangSpi::new(
            RecordingPin::new("spi_cs", log),
            RecordingPin::new("spi_scl", log),
            RecordingPin::new("spi_sda", log),
            RecordingDelay { log: log.clone() },
            spec.serial_timing,
        )
        .expect("recording pins never fail")
    });

    PanelParts {
        scanout: RecordingScanout {
            inner: pool_bytes.map_or_else(MemoryScanout::new, MemoryScanout::with_pool),
            log: log.clone(),
        },
        graphics: RecordingGraphics { inner: SimGraphics::new(), fail_create: false, log: log.clone() },
        timebase: RecordingTimebase { fail_start: false, running: false, log: log.clone() },
        serial,
        backlight: spec.pins.backlight.map(|_| RecordingPin::new("backlight", log)),
        delay: RecordingDelay { log: log.clone() },
    }
}
