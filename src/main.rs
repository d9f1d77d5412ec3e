use anyhow::{Context, Error, Result};
use log::{debug, error, info, trace};
use spectroblit::bridge::{self, BridgeReader};
use spectroblit::capture::{AudioInput, InputDevice};
use spectroblit::common::{validate_block_len, Block, PipelineConfig};
use spectroblit::display::WindowSurface;
use spectroblit::fft::WindowType;
use spectroblit::pipeline::{FramePacer, FramePipeline, Tick};
use spectroblit::renderer::{DrawCause, DrawEvent};
use spectroblit::surface::Surface;
use std::sync::Arc;
use std::time::Instant;
use structopt::StructOpt;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

fn parse_block_size(src: &str) -> Result<usize> {
    let num: usize = src
        .parse()
        .map_err(|_| Error::msg(format!("Block size {} must be an integer", src)))?;
    validate_block_len(num)
}

fn parse_fps(src: &str) -> Result<f64> {
    let num: f64 = src
        .parse()
        .map_err(|_| Error::msg(format!("Frame rate {} must be a number", src)))?;
    if !(num > 0. && num <= 1000.) {
        return Err(Error::msg(format!(
            "Frame rate {} must be > 0 and <= 1000",
            src
        )));
    }
    Ok(num)
}

/// Real-time waveform and spectrum viewer
#[derive(StructOpt, Debug)]
#[structopt(name = "spectroblit")]
pub struct Opt {
    /// If passed, will listen to speaker instead of microphone.
    /// Loopback capture is only supported by some hosts (e.g. WASAPI).
    #[structopt(short, long)]
    loopback: bool,

    /// Sample rate to request from the device.
    /// If unsupported, the device's default rate is used instead.
    #[structopt(short = "r", long, default_value = "44100")]
    sample_rate: u32,

    /// Number of channels to capture. Only the first channel is displayed.
    #[structopt(short, long, default_value = "1")]
    channels: u16,

    /// Number of samples to use in each FFT block.
    /// Increasing this value makes it easier to identify pitches,
    /// but increases audio latency and smearing in time.
    #[structopt(short, long, default_value = "2048", parse(try_from_str = parse_block_size))]
    block_size: usize,

    /// Window applied before the FFT: blackman, hann, or rect.
    #[structopt(short, long, default_value = "blackman")]
    window: WindowType,

    /// How many times per second to redraw.
    #[structopt(short, long, default_value = "60", parse(try_from_str = parse_fps))]
    fps: f64,
}

impl Opt {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_len: self.block_size,
            window: self.window,
        }
    }
}

/// Window-dependent state, created once the event loop is running.
struct View {
    surface: WindowSurface,
    pipeline: FramePipeline<WindowSurface>,
    pacer: FramePacer,

    /// Set when we asked for the next RedrawRequested.
    /// Any other RedrawRequested comes from the windowing system and needs a full redraw.
    tick_requested: bool,
}

impl View {
    fn redraw_static(&mut self, cause: DrawCause) -> Result<()> {
        let layout = self.pipeline.layout();
        self.surface.draw_background(&layout);
        let event = DrawEvent {
            context: self.surface.context(),
            cause,
        };
        self.pipeline.on_draw(&mut self.surface, event)
    }

    fn redraw_requested(&mut self) -> Result<()> {
        let requested = std::mem::replace(&mut self.tick_requested, false);
        if !requested || self.pipeline.needs_redraw() {
            self.redraw_static(DrawCause::Full)?;
        }
        let mut tick = self.pipeline.tick(&mut self.surface)?;
        if tick == Tick::AwaitingRedraw {
            self.redraw_static(DrawCause::Full)?;
            tick = self.pipeline.tick(&mut self.surface)?;
        }
        trace!("{:?}", tick);
        Ok(())
    }
}

struct App {
    cfg: PipelineConfig,
    fps: f64,
    audio: AudioInput,

    /// Moved into the pipeline when the window is created.
    reader: Option<BridgeReader<Block>>,
    view: Option<View>,

    fatal: Option<Error>,
}

impl App {
    fn new(cfg: PipelineConfig, fps: f64, reader: BridgeReader<Block>, audio: AudioInput) -> App {
        App {
            cfg,
            fps,
            audio,
            reader: Some(reader),
            view: None,
            fatal: None,
        }
    }

    fn create_view(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => return Ok(()),
        };

        let window_attributes = Window::default_attributes()
            .with_title("spectroblit")
            .with_inner_size(PhysicalSize {
                width: 1024,
                height: 768,
            });
        #[cfg(target_os = "windows")]
        let window_attributes = {
            // Work around cpal/winit crash.
            // https://github.com/amethyst/amethyst/issues/2218
            use winit::platform::windows::WindowAttributesExtWindows;
            window_attributes.with_drag_and_drop(false)
        };
        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let surface = WindowSurface::new(window)?;
        let pipeline = FramePipeline::new(&self.cfg, reader, surface.context())?;
        let mut view = View {
            surface,
            pipeline,
            pacer: FramePacer::new(self.fps, Instant::now()),
            tick_requested: false,
        };
        view.redraw_static(DrawCause::Shown)?;
        self.view = Some(view);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Error) {
        error!("{:#}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        event_loop.exit();
    }

    /// Close the audio stream, then report any fatal error.
    fn finish(mut self) -> Result<()> {
        self.view = None;
        self.audio.close();
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.view.is_some() {
            return;
        }
        if let Err(err) = self.create_view(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let view = match &mut self.view {
            Some(view) => view,
            None => return,
        };

        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                event_loop.exit();
                Ok(())
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.logical_key == Key::Named(NamedKey::Escape) =>
            {
                event_loop.exit();
                Ok(())
            }
            WindowEvent::Resized(size) => view
                .surface
                .resize(size.width, size.height)
                .and_then(|()| view.redraw_static(DrawCause::Resized)),
            WindowEvent::RedrawRequested => view.redraw_requested(),
            _ => Ok(()),
        };

        if let Err(err) = result {
            self.fail(event_loop, err);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(err) = self.audio.poll_error() {
            self.fail(event_loop, Error::msg(format!("Audio stream error: {}", err)));
            return;
        }

        let view = match &mut self.view {
            Some(view) => view,
            None => return,
        };

        let now = Instant::now();
        if view.pacer.is_due(now) {
            if let Some(rate) = view.pacer.tick(now) {
                debug!("{:.1} frames/s", rate);
            }
            view.tick_requested = true;
            view.surface.window().request_redraw();
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(view.pacer.next_deadline()));
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::from_args();
    let mut cfg = opt.config();
    cfg.validate()?;

    let device = InputDevice::open_default(&cfg, opt.loopback)?;

    // Analyze what the device actually delivers.
    cfg.sample_rate = device.sample_rate();
    cfg.channels = device.channels();
    let (writer, reader) = bridge::block_channel(cfg.block_len, cfg.channels);
    let audio = device.start(writer, cfg.block_len)?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(cfg, opt.fps, reader, audio);
    event_loop.run_app(&mut app).context("Event loop failed")?;
    app.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_validation() {
        assert_eq!(parse_block_size("2048").unwrap(), 2048);
        assert!(parse_block_size("2").is_err());
        assert!(parse_block_size("2049").is_err());
        assert!(parse_block_size("32768").is_err());
        assert!(parse_block_size("lots").is_err());
    }

    #[test]
    fn block_size_option_matches_config_validation() {
        for src in &["4", "6", "1000", "16384", "16386", "2", "33"] {
            let cfg = PipelineConfig {
                block_len: src.parse().unwrap(),
                ..PipelineConfig::default()
            };
            assert_eq!(
                parse_block_size(src).is_ok(),
                cfg.validate().is_ok(),
                "{}",
                src
            );
        }
    }

    #[test]
    fn fps_validation() {
        assert_eq!(parse_fps("30").unwrap(), 30.);
        assert!(parse_fps("0").is_err());
        assert!(parse_fps("-5").is_err());
        assert!(parse_fps("NaN").is_err());
    }

    #[test]
    fn default_options_match_default_config() {
        let opt = Opt::from_iter(&["spectroblit"]);
        assert_eq!(opt.config(), PipelineConfig::default());
        assert!(!opt.loopback);
        assert_eq!(opt.fps, 60.);
    }

    #[test]
    fn options_override_config() {
        let opt = Opt::from_iter(&[
            "spectroblit",
            "--block-size",
            "4096",
            "--window",
            "hann",
            "--sample-rate",
            "48000",
        ]);
        let cfg = opt.config();
        assert_eq!(cfg.block_len, 4096);
        assert_eq!(cfg.window, WindowType::Hann);
        assert_eq!(cfg.sample_rate, 48000);
    }
}
