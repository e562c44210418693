//! Questions put to the human operator.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};

/// Source of the objective and of yes/no permissions.
pub trait Interactor {
    /// Ask for `(objective, expected_result)`.
    fn ask_objective(&self) -> Result<(String, String)>;

    /// Ask a yes/no question.
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Terminal interactor over any line reader and writer.
pub struct StdinInteractor<R: BufRead, W: Write> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl StdinInteractor<io::StdinLock<'static>, io::Stderr> {
    /// Read from stdin and prompt on stderr, keeping stdout for results.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> StdinInteractor<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }

    fn prompt(&self, text: &str) -> Result<String> {
        {
            let mut output = self.output.borrow_mut();
            write!(output, "{text}").context("write prompt")?;
            output.flush().context("flush prompt")?;
        }
        let mut line = String::new();
        let read = self
            .input
            .borrow_mut()
            .read_line(&mut line)
            .context("read answer")?;
        if read == 0 {
            bail!("input closed while waiting for an answer");
        }
        Ok(line.trim().to_string())
    }

    fn prompt_non_empty(&self, text: &str) -> Result<String> {
        loop {
            let answer = self.prompt(text)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
        }
    }
}

impl<R: BufRead, W: Write> Interactor for StdinInteractor<R, W> {
    fn ask_objective(&self) -> Result<(String, String)> {
        let objective = self.prompt_non_empty("What should the program do? ")?;
        let expected = self.prompt_non_empty("What exact output should it print? ")?;
        Ok((objective, expected))
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        loop {
            match self.prompt(&format!("{question} (y/n) "))?.to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }
}
