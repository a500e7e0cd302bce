//! Line-oriented terminal front-end
//!
//! Questions are printed as a numbered list; an empty answer picks the
//! first (default) option. Picking a path sigil asks for a free-form path.
//! Status updates draw a progress bar sized to the terminal.

use crate::error::{DedetaiError, Result};
use crate::frontend::{FrontEnd, PROMPT_OPTION_DIRECTORY, is_prompt_sigil};
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};
use std::io::{self, BufRead, BufReader, Stderr, Stdin, Write};
use std::sync::Mutex;
use tracing::debug;

const DEFAULT_WIDTH: u16 = 80;
const MIN_BAR_WIDTH: usize = 10;

/// Render `[#####.....]` filling `width` columns for `percent`.
pub fn progress_bar(percent: u8, width: usize) -> String {
    let inner = width.saturating_sub(2).max(1);
    let filled = inner * usize::from(percent.min(100)) / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(inner - filled))
}

/// Front-end reading answers from `R` and writing to `W`.
pub struct TerminalFrontEnd<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
    interactive: bool,
}

impl TerminalFrontEnd<BufReader<Stdin>, Stderr> {
    /// Terminal on stdin/stderr.
    pub fn stdio() -> Self {
        Self {
            input: Mutex::new(BufReader::new(io::stdin())),
            output: Mutex::new(io::stderr()),
            interactive: true,
        }
    }
}

impl<R: BufRead, W: Write> TerminalFrontEnd<R, W> {
    /// Non-interactive terminal over arbitrary streams (no cursor control).
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
            interactive: false,
        }
    }

    pub fn into_output(self) -> W {
        match self.output.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn width(&self) -> usize {
        let cols = if self.interactive {
            terminal::size().map(|(cols, _)| cols).unwrap_or(DEFAULT_WIDTH)
        } else {
            DEFAULT_WIDTH
        };
        usize::from(cols)
    }

    fn read_line(&self) -> Result<String> {
        let mut input = self
            .input
            .lock()
            .map_err(|_| DedetaiError::general("terminal input lock poisoned"))?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(DedetaiError::cancelled("end of input"));
        }
        Ok(line.trim().to_string())
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut out = self
            .output
            .lock()
            .map_err(|_| DedetaiError::general("terminal output lock poisoned"))?;
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn ask_path(&self, sigil: &str) -> Result<String> {
        let kind = if sigil == PROMPT_OPTION_DIRECTORY { "directory" } else { "file" };
        loop {
            self.write(&format!("Enter the {kind} path: "))?;
            let path = self.read_line()?;
            if !path.is_empty() {
                return Ok(path);
            }
        }
    }

    fn pick(options: &[String], answer: &str) -> Option<String> {
        if answer.is_empty() {
            return options.first().cloned();
        }
        if let Ok(index) = answer.parse::<usize>() {
            return index.checked_sub(1).and_then(|i| options.get(i)).cloned();
        }
        options.iter().find(|o| o.eq_ignore_ascii_case(answer)).cloned()
    }
}

impl<R, W> FrontEnd for TerminalFrontEnd<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn ask(&self, question: &str, options: &[String]) -> Result<String> {
        let mut prompt = format!("\n{question}\n");
        for (i, option) in options.iter().enumerate() {
            let default = if i == 0 { " [default]" } else { "" };
            prompt.push_str(&format!("  {}) {}{}\n", i + 1, option, default));
        }
        prompt.push_str("> ");

        loop {
            self.write(&prompt)?;
            let answer = self.read_line()?;
            if options.is_empty() {
                if answer.is_empty() {
                    continue;
                }
                return Ok(answer);
            }
            match Self::pick(options, &answer) {
                Some(choice) if is_prompt_sigil(&choice) => return self.ask_path(&choice),
                Some(choice) => {
                    debug!("Answered {:?} with {:?}", question, choice);
                    return Ok(choice);
                }
                None => self.write(&format!("Invalid choice: {answer}\n"))?,
            }
        }
    }

    fn status(&self, message: &str, percent: Option<u8>) {
        let line = match percent {
            Some(p) => {
                let label = format!(" {p:>3}% {message}");
                let bar_width = self.width().saturating_sub(label.len()).max(MIN_BAR_WIDTH);
                format!("{}{}", progress_bar(p, bar_width.min(40)), label)
            }
            None => message.to_string(),
        };

        let Ok(mut out) = self.output.lock() else {
            return;
        };
        let drawn = if self.interactive {
            queue!(out, Clear(ClearType::CurrentLine), MoveToColumn(0), Print(&line), Print("\n"))
        } else {
            writeln!(out, "{line}")
        };
        if let Err(e) = drawn.and_then(|()| out.flush()) {
            debug!("Failed to draw status: {}", e);
        }
    }
}
