//! Line-driven front end. Each command is one UI event; every failure ends
//! up as the single status message and the loop keeps going.

use facecheck_vision::{CameraDevice, FaceEngine};
use log::{error, warn};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

use crate::analysis;
use crate::capture::{CaptureController, CaptureState, Side};
use crate::error::CheckError;
use crate::grid::{GridContainer, GridHandle, GridRenderer};
use crate::verdict::{cell_color, cell_tooltip, StatusClass};

pub const HELP: &str = "\
commands:
  file <original|test> <path>   use a file for one side
  start <original|test>         start that side's camera
  capture <original|test>       snapshot the running camera
  stop <original|test>          stop that side's camera
  status                        show both sides
  analyze                       compare the two inputs
  help                          this text
  quit                          stop cameras and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    File(Side, PathBuf),
    Start(Side),
    Stop(Side),
    Capture(Side),
    Status,
    Analyze,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let mut side = || -> Result<Side, String> {
            words
                .next()
                .ok_or_else(|| format!("'{}' needs a side (original or test)", verb))?
                .parse()
        };

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "file" | "open" => {
                let s = side()?;
                let path = after_words(line, 2).trim_end();
                if path.is_empty() {
                    return Err("'file' needs a path".to_string());
                }
                Command::File(s, PathBuf::from(path))
            }
            "start" => Command::Start(side()?),
            "stop" => Command::Stop(side()?),
            "capture" | "snap" => Command::Capture(side()?),
            "status" => Command::Status,
            "analyze" | "analyse" | "run" => Command::Analyze,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(cmd)
    }
}

/// The rest of `line` after its first `n` words. Inner spacing is kept.
fn after_words(line: &str, n: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..n {
        rest = rest
            .split_once(char::is_whitespace)
            .map_or("", |(_, tail)| tail)
            .trim_start();
    }
    rest
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub class: StatusClass,
    pub text: String,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            class: StatusClass::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            class: StatusClass::Error,
            text: text.into(),
        }
    }
}

impl From<&CheckError> for StatusMessage {
    fn from(err: &CheckError) -> Self {
        StatusMessage::error(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Session<D: CameraDevice, E: FaceEngine, R: GridRenderer> {
    capture: CaptureController<D>,
    engine: E,
    grid: GridContainer<R>,
    analyze_enabled: bool,
    status: Option<StatusMessage>,
    video_frame_stride: usize,
}

impl<D: CameraDevice, E: FaceEngine, R: GridRenderer> Session<D, E, R> {
    /// Loads the face models up front; if that fails, analysis stays disabled
    /// for the whole session while cameras and files keep working.
    pub fn new(capture: CaptureController<D>, mut engine: E, renderer: R, video_frame_stride: usize) -> Self {
        let (analyze_enabled, status) = match engine.load_models() {
            Ok(()) => (true, None),
            Err(e) => {
                let err = CheckError::ModelLoad(format!("{:#}", e));
                error!("{}", err);
                (false, Some(StatusMessage::from(&err)))
            }
        };
        Self {
            capture,
            engine,
            grid: GridContainer::new(renderer),
            analyze_enabled,
            status,
            video_frame_stride,
        }
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    pub fn grid(&self) -> &GridContainer<R> {
        &self.grid
    }

    pub fn capture(&self) -> &CaptureController<D> {
        &self.capture
    }

    pub fn analyze_enabled(&self) -> bool {
        self.analyze_enabled
    }

    /// Run one event. Errors become the status message.
    pub fn handle(&mut self, cmd: Command) -> Flow {
        let flow = if cmd == Command::Quit { Flow::Quit } else { Flow::Continue };
        let status = match self.dispatch(cmd) {
            Ok(status) => status,
            Err(err) => {
                warn!("{}", err);
                StatusMessage::from(&err)
            }
        };
        self.status = Some(status);
        flow
    }

    fn dispatch(&mut self, cmd: Command) -> Result<StatusMessage, CheckError> {
        match cmd {
            Command::File(side, path) => {
                let source = self.capture.select_file(side, &path)?;
                Ok(StatusMessage::info(format!(
                    "{}: using {} ({})",
                    side,
                    path.display(),
                    source.mime
                )))
            }
            Command::Start(side) => {
                self.capture.start(side)?;
                let text = match self.capture.preview(side) {
                    Some(p) => format!("{}: camera {} live at {}x{}", side, p.device, p.width, p.height),
                    None => format!("{}: camera live", side),
                };
                Ok(StatusMessage::info(text))
            }
            Command::Stop(side) => {
                self.capture.stop(side);
                Ok(StatusMessage::info(format!("{}: camera stopped", side)))
            }
            Command::Capture(side) => {
                let bytes = self.capture.capture(side)?.bytes.len();
                Ok(StatusMessage::info(format!("{}: captured image ({} bytes)", side, bytes)))
            }
            Command::Status => Ok(StatusMessage::info(self.describe())),
            Command::Help => Ok(StatusMessage::info(HELP)),
            Command::Analyze => self.analyze(),
            Command::Quit => {
                self.capture.stop_all();
                Ok(StatusMessage::info("cameras stopped"))
            }
        }
    }

    fn analyze(&mut self) -> Result<StatusMessage, CheckError> {
        self.grid.clear();
        if !self.analyze_enabled {
            return Err(CheckError::ModelLoad(
                "analysis is disabled for this session; restart to retry".to_string(),
            ));
        }

        let result = analysis::analyze(
            &mut self.engine,
            self.capture.resolve_input(Side::Original),
            self.capture.resolve_input(Side::Test),
            self.video_frame_stride,
        );
        let analysis = match result {
            Err(err @ CheckError::ModelLoad(_)) => {
                self.analyze_enabled = false;
                return Err(err);
            }
            other => other?,
        };

        self.grid
            .render(&analysis.verdict.cells(), &cell_color, &cell_tooltip)
            .map_err(|e| CheckError::Io(std::io::Error::other(format!("drawing grid: {:#}", e))))?;
        Ok(StatusMessage {
            class: analysis.verdict.status(),
            text: analysis.message,
        })
    }

    fn describe(&self) -> String {
        Side::ALL
            .iter()
            .map(|&side| {
                let state = match self.capture.state(side) {
                    CaptureState::Idle => "idle",
                    CaptureState::Streaming => "streaming",
                    CaptureState::Captured => "captured",
                };
                let input = self
                    .capture
                    .resolve_input(side)
                    .map(|s| format!("{} ({} bytes)", s.mime, s.bytes.len()))
                    .unwrap_or_else(|| "no input".to_string());
                let live = if self.capture.is_streaming(side) { ", camera on" } else { "" };
                format!("{}: {}{}, {}", side, state, live, input)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Read commands until `quit` or end of input.
    pub fn run<I: BufRead, O: Write>(&mut self, input: I, mut out: O) -> anyhow::Result<()> {
        if let Some(status) = &self.status {
            print_status(&mut out, status)?;
        }
        write!(out, "> ")?;
        out.flush()?;

        for line in input.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                let (flow, analyzed) = match line.parse::<Command>() {
                    Ok(cmd) => {
                        let analyzed = cmd == Command::Analyze;
                        (self.handle(cmd), analyzed)
                    }
                    Err(msg) => {
                        self.status = Some(StatusMessage::error(msg));
                        (Flow::Continue, false)
                    }
                };
                if flow == Flow::Quit {
                    return Ok(());
                }
                if let Some(status) = &self.status {
                    print_status(&mut out, status)?;
                }
                if analyzed && self.grid.is_visible() {
                    if let Some(handle) = self.grid.current() {
                        handle.present(&mut out)?;
                    }
                }
            }
            write!(out, "> ")?;
            out.flush()?;
        }

        self.capture.stop_all();
        Ok(())
    }
}

pub fn print_status<O: Write + ?Sized>(out: &mut O, status: &StatusMessage) -> std::io::Result<()> {
    let tag = match status.class {
        StatusClass::Success => "ok",
        StatusClass::Info => "info",
        StatusClass::Error => "error",
    };
    writeln!(out, "[{}] {}", tag, status.text)
}
