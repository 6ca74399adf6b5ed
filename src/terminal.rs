//! Raw terminal control for the multiplexed view.
//!
//! Everything here queues crossterm commands onto a writer; only the
//! dispatcher calls into it, so there is a single writer at any time.

use std::io::{self, Write};

use chrono::{DateTime, Local};
use crossterm::cursor::{Hide, MoveLeft, MoveRight, MoveTo, MoveToColumn, Show};
use crossterm::style::{style, Attribute, Color, PrintStyledContent, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};

/// Columns to jump right before drawing the clock. The cursor stops at the
/// right edge, which right-aligns the clock without querying the width.
const BANNER_OFFSET: u16 = 999;

/// Clears the screen and hides the cursor; shows it again on drop.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        let mut stdout = io::stdout();
        reset(&mut stdout)?;
        stdout.flush()?;
        Ok(Self { _private: () })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = clear_line(&mut stdout);
        let _ = execute!(stdout, Show);
    }
}

/// Clears the screen, homes the cursor and hides it.
pub fn reset<W: Write>(out: &mut W) -> io::Result<()> {
    queue!(out, Clear(ClearType::All), MoveTo(0, 0), Hide)
}

/// Wipes the current line (usually the banner) and returns to column 0.
pub fn clear_line<W: Write>(out: &mut W) -> io::Result<()> {
    queue!(out, Clear(ClearType::CurrentLine), MoveToColumn(0))
}

/// Draws `Moon running (<count>)` followed by a right-aligned clock.
pub fn draw_banner<W: Write>(out: &mut W, count: usize, now: DateTime<Local>) -> io::Result<()> {
    let clock = now.format("%H:%M:%S").to_string();
    let back = (clock.len() as u16).saturating_sub(1);
    queue!(
        out,
        PrintStyledContent(
            style(banner_text(count))
                .with(Color::White)
                .on(Color::Blue)
        ),
        MoveRight(BANNER_OFFSET),
        MoveLeft(back),
        PrintStyledContent(
            style(clock)
                .with(Color::DarkGrey)
                .attribute(Attribute::Bold)
        )
    )
}

pub fn banner_text(count: usize) -> String {
    format!("Moon running ({})", count)
}
