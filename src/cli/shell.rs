//! Shell command: attach this terminal to one session

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::debug;

use termsage::config::Config;
use termsage::memory::ErrorMemory;
use termsage::terminal::{CreateOptions, SessionManager};
use termsage::SessionEvent;

/// Puts stdin into raw mode and restores it on drop
#[cfg(unix)]
struct RawMode {
    original: libc::termios,
}

#[cfg(unix)]
impl RawMode {
    fn enable() -> Option<Self> {
        // SAFETY: termios is plain data and the fd is the process's stdin
        unsafe {
            if libc::isatty(libc::STDIN_FILENO) == 0 {
                return None;
            }
            let mut original: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut original) != 0 {
                return None;
            }
            let mut raw = original;
            libc::cfmakeraw(&mut raw);
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) != 0 {
                return None;
            }
            Some(Self { original })
        }
    }
}

#[cfg(unix)]
impl Drop for RawMode {
    fn drop(&mut self) {
        // SAFETY: restores the attributes read in enable()
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}

#[cfg(unix)]
fn terminal_size() -> Option<(u16, u16)> {
    // SAFETY: TIOCGWINSZ only writes into the winsize we pass
    unsafe {
        let mut size: libc::winsize = std::mem::zeroed();
        if libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) != 0 || size.ws_col == 0 {
            return None;
        }
        Some((size.ws_col, size.ws_row))
    }
}

#[cfg(not(unix))]
fn terminal_size() -> Option<(u16, u16)> {
    None
}

pub async fn shell_command(config: &Config, cwd: Option<PathBuf>) -> Result<()> {
    let memory = ErrorMemory::open_optional(&config.memory);
    let manager = Arc::new(SessionManager::new(config.terminal.clone(), memory));
    let session_id = format!("shell-{}", uuid::Uuid::new_v4());

    let (cols, rows) = match terminal_size() {
        Some((cols, rows)) => (Some(cols), Some(rows)),
        None => (None, None),
    };
    let options = CreateOptions { cols, rows, cwd };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let created = match manager.create(&session_id, options, tx).await {
        Ok(created) => created,
        Err(e) => bail!("Failed to start session: {}", e),
    };
    eprintln!("[termsage] {} session (pid {})\r", created.mode, created.pid);

    #[cfg(unix)]
    let raw_mode = RawMode::enable();

    // stdin reads block, so they get their own thread; it dies with the process
    let input_manager = manager.clone();
    let input_id = session_id.clone();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => input_manager.write(&input_id, &buf[..n]),
            }
        }
        debug!("[termsage:terminal] stdin closed");
    });

    let mut stdout = std::io::stdout();
    let mut exit_code = None;
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Data { chunk } => {
                stdout.write_all(chunk.as_bytes())?;
                stdout.flush()?;
            }
            SessionEvent::Exit { exit_code: code, .. } => {
                exit_code = code;
                break;
            }
            SessionEvent::Error { message } => {
                eprintln!("\r\n[termsage] {}\r", message);
                break;
            }
            SessionEvent::Created { .. } => {}
        }
    }

    #[cfg(unix)]
    drop(raw_mode);

    manager.kill(&session_id);
    eprintln!(
        "[termsage] session ended{}",
        exit_code.map(|c| format!(" (exit {})", c)).unwrap_or_default()
    );

    // The stdin thread is still parked in read(); leave without waiting for it
    std::process::exit(exit_code.map(|c| c as i32).unwrap_or(0));
}
