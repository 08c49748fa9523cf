//! Operator console on stdin.
//!
//! Commands run as [`Caller::Admin`]: they skip rate limiting but are still
//! bounds checked.

use std::io::BufRead;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::canvas::{Canvas, Caller};
use crate::grid::Color;

const PROMPT: &str = "$terminal => ";
const LINE_BUFFER: usize = 16;

const HELP: &str = "\
Commands:
  pixel X Y R G B          place a pixel (alias: user X Y R G B)
  rectangle X1 Y1 X2 Y2    fill a white rectangle (alias: admin rectangle ...)
  backup                   write the backup image (alias: admin backup)
  flush                    write the snapshot now
  help                     show this message
  quit                     stop reading commands
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pixel { x: i64, y: i64, color: Color },
    Rectangle { x1: i64, y1: i64, x2: i64, y2: i64 },
    Backup,
    Flush,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (name, args) = match tokens.split_first() {
            Some((&"admin", rest)) => match rest.split_first() {
                Some((name, args)) => (*name, args),
                None => return Err("Expected an admin action: rectangle or backup".to_string()),
            },
            Some((name, args)) => (*name, args),
            None => return Err("Empty command".to_string()),
        };

        match name {
            "pixel" | "user" => {
                let [x, y, r, g, b] = fixed_args(args, "X Y R G B")?;
                Ok(Command::Pixel {
                    x: int(x)?,
                    y: int(y)?,
                    color: Color::new(channel(r)?, channel(g)?, channel(b)?),
                })
            }
            "rectangle" => {
                let [x1, y1, x2, y2] = fixed_args(args, "X1 Y1 X2 Y2")?;
                Ok(Command::Rectangle {
                    x1: int(x1)?,
                    y1: int(y1)?,
                    x2: int(x2)?,
                    y2: int(y2)?,
                })
            }
            "backup" => Ok(Command::Backup),
            "flush" => Ok(Command::Flush),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("Unknown command '{}', try 'help'", other)),
        }
    }
}

fn fixed_args<'a, const N: usize>(args: &[&'a str], usage: &str) -> Result<[&'a str; N], String> {
    <[&str; N]>::try_from(args).map_err(|_| format!("Expected {} arguments: {}", N, usage))
}

fn int(s: &str) -> Result<i64, String> {
    s.parse().map_err(|_| format!("'{}' is not an integer", s))
}

fn channel(s: &str) -> Result<u8, String> {
    s.parse().map_err(|_| format!("'{}' is not a color channel (0-255)", s))
}

/// Execute one command; returns the text to show the operator.
pub async fn execute(canvas: &Canvas, command: Command) -> String {
    match command {
        Command::Pixel { x, y, color } => match canvas.place_pixel(x, y, color, &Caller::Admin) {
            Ok(()) => "Pixel has been placed!".to_string(),
            Err(e) => format!("Pixel rejected: {}", e),
        },
        Command::Rectangle { x1, y1, x2, y2 } => {
            match canvas.fill_rectangle(x1, y1, x2, y2, Color::WHITE) {
                Ok(cells) => format!("Rectangle completed! {} cells painted white.", cells),
                Err(e) => format!("Rectangle rejected: {}", e),
            }
        }
        Command::Backup => match canvas.trigger_backup().await {
            Ok(path) => format!("Backup is complete. {} is made!", path.display()),
            Err(e) => {
                warn!(error = %e, "Backup failed");
                format!("Backup failed: {}", e)
            }
        },
        Command::Flush => match canvas.flush().await {
            Ok(()) => "Canvas flushed.".to_string(),
            Err(e) => format!("Flush failed: {}", e),
        },
        Command::Help => HELP.trim_end().to_string(),
        Command::Quit => "Console closed.".to_string(),
    }
}

/// Read stdin line by line on a dedicated thread.
///
/// The thread is detached: a read blocked on stdin never holds up runtime
/// shutdown. It exits on EOF, on a read error, or once the receiver is gone.
pub fn stdin_lines() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    std::thread::Builder::new()
        .name("admin-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            debug!("Stdin reader finished");
        })?;
    Ok(rx)
}

/// Run commands received on `input` until the sender closes or `quit`.
pub async fn run<W>(
    canvas: Arc<Canvas>,
    mut input: mpsc::Receiver<String>,
    mut output: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    info!("Admin console ready");

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = input.recv().await else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match Command::parse(&line) {
            Ok(Command::Quit) => {
                output.write_all(b"Console closed.\n").await?;
                break;
            }
            Ok(command) => execute(&canvas, command).await,
            Err(hint) => hint,
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }

    output.flush().await?;
    info!("Admin console stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimiter;
    use image::{Rgba, RgbaImage};

    fn script(text: &str) -> mpsc::Receiver<String> {
        let lines: Vec<&str> = text.lines().collect();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        rx
    }

    fn canvas() -> Arc<Canvas> {
        let base = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        Arc::new(Canvas::new(base, RateLimiter::new(1), "unused.png", "unused-backup.png"))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("pixel 1 2 3 4 5").unwrap(),
            Command::Pixel {
                x: 1,
                y: 2,
                color: Color::new(3, 4, 5)
            }
        );
        assert_eq!(
            Command::parse("user 1 2 3 4 5").unwrap(),
            Command::parse("pixel 1 2 3 4 5").unwrap()
        );
        assert_eq!(
            Command::parse("admin rectangle 0 0 4 4").unwrap(),
            Command::Rectangle {
                x1: 0,
                y1: 0,
                x2: 4,
                y2: 4
            }
        );
        assert_eq!(Command::parse("admin backup").unwrap(), Command::Backup);
        assert_eq!(Command::parse("  flush ").unwrap(), Command::Flush);
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("admin").is_err());
        assert!(Command::parse("pixel 1 2 3").is_err());
        assert!(Command::parse("pixel 1 2 3 4 300").is_err());
        assert!(Command::parse("rectangle a 0 1 1").is_err());
        assert!(Command::parse("dance").unwrap_err().contains("Unknown command"));
    }

    #[tokio::test]
    async fn test_console_is_not_rate_limited() {
        let canvas = canvas();
        let text = "pixel 0 0 9 9 9\npixel 1 0 9 9 9\npixel 2 0 9 9 9\n";
        let mut out = Vec::new();

        run(Arc::clone(&canvas), script(text), &mut out).await.unwrap();

        for x in 0..3 {
            assert_eq!(canvas.get_pixel(x, 0).unwrap(), Color::new(9, 9, 9));
        }
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("Pixel has been placed!").count(), 3);
    }

    #[tokio::test]
    async fn test_console_reports_errors_and_continues() {
        let canvas = canvas();
        let text = "bogus\npixel 99 0 1 1 1\nrectangle 0 0 2 2\nquit\npixel 7 7 1 1 1\n";
        let mut out = Vec::new();

        run(Arc::clone(&canvas), script(text), &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Unknown command"));
        assert!(out.contains("Pixel rejected"));
        assert!(out.contains("4 cells painted white"));
        assert!(out.contains("Console closed."));
        assert_eq!(canvas.get_pixel(1, 1).unwrap(), Color::WHITE);
        assert_eq!(canvas.get_pixel(7, 7).unwrap(), Color::BLACK);
    }

    #[test]
    fn test_runtime_shuts_down_while_console_waits() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (tx, rx) = mpsc::channel::<String>(1);

        let task = runtime.spawn(run(canvas(), rx, tokio::io::sink()));
        runtime.block_on(tokio::task::yield_now());
        assert!(!task.is_finished());

        // The sender is still open, so the console is parked on recv.
        drop(runtime);
        assert!(tx.is_closed());
    }
}
