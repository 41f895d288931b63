//! Rendering of build status events.

use crate::patch::cancel::CancelToken;
use crate::patch::error::PatchError;
use crate::traits::{SolveStatus, StatusReceiver, VertexState};
use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

/// How status events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// `Tty` when stderr is a terminal, `Plain` otherwise
    #[default]
    Auto,
    /// One line per event
    Plain,
    /// Single status line rewritten in place
    Tty,
}

impl ProgressMode {
    /// Debug runs always render plainly so output can be followed in logs.
    pub fn for_debug(debug: bool) -> Self {
        if debug {
            ProgressMode::Plain
        } else {
            ProgressMode::Auto
        }
    }

    fn resolve(self) -> Self {
        match self {
            ProgressMode::Auto if io::stderr().is_terminal() => ProgressMode::Tty,
            ProgressMode::Auto => ProgressMode::Plain,
            other => other,
        }
    }
}

pub trait ProgressDisplay: Send {
    fn update(&mut self, status: &SolveStatus) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Creates the display used by one operation.
pub type DisplayFactory = Arc<dyn Fn(ProgressMode) -> Box<dyn ProgressDisplay> + Send + Sync>;

/// Display writing to stderr in the resolved mode.
pub fn stderr_display(mode: ProgressMode) -> Box<dyn ProgressDisplay> {
    match mode.resolve() {
        ProgressMode::Tty => Box::new(TtyDisplay::new(io::stderr())),
        _ => Box::new(PlainDisplay::new(io::stderr())),
    }
}

/// Numbers vertices in order of first appearance.
#[derive(Debug, Default)]
struct VertexIndex {
    ids: HashMap<String, usize>,
}

impl VertexIndex {
    fn id(&mut self, vertex: &str) -> usize {
        let next = self.ids.len() + 1;
        *self.ids.entry(vertex.to_string()).or_insert(next)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub struct PlainDisplay<W> {
    out: W,
    vertices: VertexIndex,
}

impl<W: Write + Send> PlainDisplay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            vertices: VertexIndex::default(),
        }
    }
}

impl<W: Write + Send> ProgressDisplay for PlainDisplay<W> {
    fn update(&mut self, status: &SolveStatus) -> io::Result<()> {
        let id = self.vertices.id(&status.vertex);
        match &status.state {
            VertexState::Started => writeln!(self.out, "#{} {}", id, status.name),
            VertexState::Completed => writeln!(self.out, "#{} DONE", id),
            VertexState::Cached => writeln!(self.out, "#{} CACHED", id),
            VertexState::Log(line) => writeln!(self.out, "#{} {}", id, line.trim_end()),
            VertexState::Failed(message) => writeln!(self.out, "#{} ERROR: {}", id, message),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

pub struct TtyDisplay<W> {
    out: W,
    vertices: VertexIndex,
    finished: usize,
}

impl<W: Write + Send> TtyDisplay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            vertices: VertexIndex::default(),
            finished: 0,
        }
    }
}

impl<W: Write + Send> ProgressDisplay for TtyDisplay<W> {
    fn update(&mut self, status: &SolveStatus) -> io::Result<()> {
        self.vertices.id(&status.vertex);
        match &status.state {
            VertexState::Completed | VertexState::Cached => self.finished += 1,
            VertexState::Failed(message) => {
                write!(self.out, "\r\x1b[2K")?;
                writeln!(self.out, "ERROR {}: {}", status.name, message)?;
            }
            VertexState::Started | VertexState::Log(_) => {}
        }
        write!(
            self.out,
            "\r\x1b[2K[{}/{}] {}",
            self.finished,
            self.vertices.len(),
            status.name
        )?;
        self.out.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        self.out.flush()
    }
}

/// Consumes the status stream of one build, in arrival order.
pub struct ProgressReporter {
    display: Box<dyn ProgressDisplay>,
}

impl ProgressReporter {
    pub fn new(display: Box<dyn ProgressDisplay>) -> Self {
        Self { display }
    }

    /// Renders until the stream closes or `token` is cancelled.
    pub async fn run(mut self, mut events: StatusReceiver, token: CancelToken) -> Result<(), PatchError> {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PatchError::Cancelled),
                event = events.recv() => match event {
                    Some(status) => self.display.update(&status).map_err(PatchError::Progress)?,
                    None => break,
                },
            }
        }
        self.display.finish().map_err(PatchError::Progress)
    }
}
