//! In-memory shell simulator
//!
//! Used when the host cannot open a native PTY. It speaks the same
//! [`ProcessBackend`] interface and answers a small, deterministic command
//! table so a client can still drive a session end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use super::backend::{BackendLauncher, OutputSink, ProcessBackend, SpawnSpec};
use super::TerminalError;
use crate::domain::SessionMode;

pub const PROMPT: &str = "$ ";

/// Name of the built-in assistant command
pub const ASSISTANT_COMMAND: &str = "claude";

const BANNER: &str = "\x1b[1;33mtermsage demo terminal\x1b[0m\r\n\
Native PTY support is unavailable on this host, so this session is simulated.\r\n\
Type 'help' to see the available commands.\r\n\r\n";

const HELP: &str = "Available commands:\r\n\
  help     show this message\r\n\
  ls       list files\r\n\
  pwd      print working directory\r\n\
  echo     print arguments\r\n\
  clear    clear the screen\r\n\
  whoami   print the current user\r\n\
  date     print the current date\r\n\
  claude   explain how to enable the real terminal\r\n\
  exit     end the session\r\n";

const ASSISTANT_HELP: &str = "This terminal is running in demo mode because no native PTY could be opened.\r\n\
To enable the real terminal:\r\n\
  1. Run termsage on a host that provides pseudo-terminals (/dev/ptmx on Linux and macOS).\r\n\
  2. Make sure the configured shell exists (see [terminal] shell in ~/.termsage/config.toml).\r\n\
  3. Set [terminal] backend = \"auto\" or \"native\" and reconnect.\r\n";

const LISTING: &str = "README.md  package.json  node_modules  src  tests\r\n";

/// Simulated pids never collide with the low range real processes use
static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

pub struct SimulatedBackend {
    pid: u32,
    cwd: PathBuf,
    cols: u16,
    rows: u16,
    sink: OutputSink,
    line: String,
    exited: bool,
}

impl SimulatedBackend {
    pub fn start(spec: &SpawnSpec, sink: OutputSink) -> Self {
        let backend = Self {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            cwd: spec.cwd.clone(),
            cols: spec.cols,
            rows: spec.rows,
            sink,
            line: String::new(),
            exited: false,
        };
        backend.sink.data(BANNER);
        backend.sink.data(PROMPT);
        backend
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    fn run_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        let line = line.trim();
        let (command, args) = match line.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" => self.sink.data(HELP),
            "ls" => self.sink.data(LISTING),
            "pwd" => self.sink.data(format!("{}\r\n", self.cwd.display())),
            "echo" => self.sink.data(format!("{}\r\n", args)),
            "clear" => self.sink.data("\x1b[2J\x1b[H"),
            "whoami" => self.sink.data("demo\r\n"),
            "date" => self.sink.data(format!(
                "{}\r\n",
                chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
            )),
            ASSISTANT_COMMAND => self.sink.data(ASSISTANT_HELP),
            "exit" => {
                self.exited = true;
                self.sink.exit(Some(0), None);
                return;
            }
            other => self.sink.data(format!("Command not found: {}\r\n", other)),
        }

        self.sink.data(PROMPT);
    }
}

impl ProcessBackend for SimulatedBackend {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn mode(&self) -> SessionMode {
        SessionMode::Demo
    }

    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if self.exited {
            return Ok(());
        }

        let input = String::from_utf8_lossy(data);
        let mut echo = String::new();
        for c in input.chars() {
            match c {
                '\r' | '\n' => {
                    echo.push_str("\r\n");
                    self.sink.data(std::mem::take(&mut echo));
                    self.run_line();
                    if self.exited {
                        return Ok(());
                    }
                }
                '\u{7f}' | '\u{8}' => {
                    if self.line.pop().is_some() {
                        echo.push_str("\u{8} \u{8}");
                    }
                }
                c if c.is_control() => {}
                c => {
                    self.line.push(c);
                    echo.push(c);
                }
            }
        }
        self.sink.data(echo);
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.exited = true;
        Ok(())
    }
}

/// Launches simulated sessions; never fails
#[derive(Debug, Default)]
pub struct SimulatedLauncher;

impl BackendLauncher for SimulatedLauncher {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn launch(
        &self,
        spec: &SpawnSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessBackend>, TerminalError> {
        tracing::info!(
            "[termsage:terminal] Demo session {} started in {}",
            spec.session_id,
            spec.cwd.display()
        );
        Ok(Box::new(SimulatedBackend::start(spec, sink)))
    }
}
