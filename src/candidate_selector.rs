//! Disambiguation policies for multi-candidate lookups.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::candidate_resolver::Candidate;
use crate::error::{PipelineError, Result};
use crate::shutdown_signal::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Zero-based index into the candidate slice.
    Chosen(usize),
    Declined,
}

/// Picks one candidate out of several. Only called with two or more
/// candidates unless the orchestrator is told otherwise.
pub trait CandidateSelector {
    fn choose(&mut self, entity_name: &str, candidates: &[Candidate]) -> Result<SelectionOutcome>;
}

/// Takes the first candidate in lookup order.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoSelector;

impl CandidateSelector for AutoSelector {
    fn choose(&mut self, _entity_name: &str, candidates: &[Candidate]) -> Result<SelectionOutcome> {
        Ok(if candidates.is_empty() {
            SelectionOutcome::Declined
        } else {
            SelectionOutcome::Chosen(0)
        })
    }
}

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Console prompt: 1-indexed list, `0` cancels, anything else re-prompts.
/// End of input counts as cancel.
///
/// Lines are read on a helper thread so a shutdown request is observed while
/// the prompt waits, not only after the next line arrives.
pub struct ConsolePrompt<W> {
    lines: Receiver<std::io::Result<String>>,
    output: W,
    shutdown: Arc<ShutdownSignal>,
}

impl<W: Write> ConsolePrompt<W> {
    pub fn new<R>(input: R, output: W, shutdown: Arc<ShutdownSignal>) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self {
            lines: spawn_line_reader(input),
            output,
            shutdown,
        }
    }

    fn write_listing(&mut self, entity_name: &str, candidates: &[Candidate]) -> std::io::Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "Search results for \"{entity_name}\":")?;
        writeln!(self.output, "{}", "-".repeat(50))?;
        for (index, candidate) in candidates.iter().enumerate() {
            writeln!(self.output, "{}. {}", index + 1, candidate.title)?;
        }
        writeln!(self.output)
    }

    /// Next input line, or `None` at end of input.
    fn next_line(&self) -> Result<Option<String>> {
        loop {
            self.shutdown.check()?;
            match self.lines.recv_timeout(INPUT_POLL_INTERVAL) {
                Ok(Ok(line)) => {
                    self.shutdown.check()?;
                    return Ok(Some(line));
                }
                Ok(Err(error)) => return Err(console_error(error)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

impl ConsolePrompt<std::io::Stdout> {
    pub fn stdio(shutdown: Arc<ShutdownSignal>) -> Self {
        Self::new(
            std::io::BufReader::new(std::io::stdin()),
            std::io::stdout(),
            shutdown,
        )
    }
}

/// Forwards lines until end of input or the first read error. The sender is
/// dropped on exit, which the prompt reads as end of input.
fn spawn_line_reader<R>(mut input: R) -> Receiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || loop {
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if sender.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(error) => {
                let _ = sender.send(Err(error));
                break;
            }
        }
    });
    receiver
}

fn console_error(error: std::io::Error) -> PipelineError {
    PipelineError::io("<console>", error)
}

impl<W: Write> CandidateSelector for ConsolePrompt<W> {
    fn choose(&mut self, entity_name: &str, candidates: &[Candidate]) -> Result<SelectionOutcome> {
        if candidates.is_empty() {
            return Ok(SelectionOutcome::Declined);
        }
        self.write_listing(entity_name, candidates)
            .map_err(console_error)?;

        let count = candidates.len();
        loop {
            write!(self.output, "Select a result (1-{count}) or 0 to cancel: ")
                .and_then(|_| self.output.flush())
                .map_err(console_error)?;

            let Some(line) = self.next_line()? else {
                return Ok(SelectionOutcome::Declined);
            };

            let retry_hint = match line.trim().parse::<usize>() {
                Ok(0) => return Ok(SelectionOutcome::Declined),
                Ok(choice) if choice <= count => return Ok(SelectionOutcome::Chosen(choice - 1)),
                Ok(_) => format!("Please enter a number between 1 and {count}, or 0 to cancel."),
                Err(_) => "Please enter a valid number.".to_string(),
            };
            writeln!(self.output, "{retry_hint}").map_err(console_error)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AutoSelector, CandidateSelector, ConsolePrompt, SelectionOutcome};
    use crate::candidate_resolver::Candidate;
    use crate::error::PipelineError;
    use crate::shutdown_signal::ShutdownSignal;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn candidates(titles: &[&str]) -> Vec<Candidate> {
        titles
            .iter()
            .map(|title| Candidate {
                title: title.to_string(),
                link: format!("https://store.example/{title}"),
                ..Candidate::default()
            })
            .collect()
    }

    fn prompt(input: &str) -> ConsolePrompt<Vec<u8>> {
        ConsolePrompt::new(
            Cursor::new(input.as_bytes().to_vec()),
            Vec::new(),
            Arc::new(ShutdownSignal::new()),
        )
    }

    #[test]
    fn test_auto_selector_takes_first() {
        let outcome = AutoSelector
            .choose("Zelda", &candidates(&["A", "B"]))
            .expect("auto selection should succeed");
        assert_eq!(outcome, SelectionOutcome::Chosen(0));
    }

    #[test]
    fn test_prompt_accepts_valid_index() {
        let mut selector = prompt("2\n");
        let outcome = selector
            .choose("Zelda", &candidates(&["Zelda", "Zelda DLC", "Zelda Bundle"]))
            .expect("selection should succeed");
        assert_eq!(outcome, SelectionOutcome::Chosen(1));

        let shown = String::from_utf8(selector.output.clone()).expect("output should be utf8");
        assert!(shown.contains("1. Zelda\n"));
        assert!(shown.contains("3. Zelda Bundle\n"));
    }

    #[test]
    fn test_prompt_reprompts_on_invalid_input() {
        let mut selector = prompt("abc\n7\n\n3\n");
        let outcome = selector
            .choose("Zelda", &candidates(&["A", "B", "C"]))
            .expect("selection should succeed");
        assert_eq!(outcome, SelectionOutcome::Chosen(2));

        let shown = String::from_utf8(selector.output.clone()).expect("output should be utf8");
        assert_eq!(shown.matches("Select a result (1-3)").count(), 4);
        assert_eq!(shown.matches("Please enter a valid number.").count(), 2);
        assert_eq!(
            shown
                .matches("Please enter a number between 1 and 3, or 0 to cancel.")
                .count(),
            1
        );
    }

    #[test]
    fn test_prompt_zero_and_eof_decline() {
        let mut selector = prompt("0\n");
        assert_eq!(
            selector
                .choose("Zelda", &candidates(&["A", "B"]))
                .expect("selection should succeed"),
            SelectionOutcome::Declined
        );

        let mut selector = prompt("");
        assert_eq!(
            selector
                .choose("Zelda", &candidates(&["A", "B"]))
                .expect("selection should succeed"),
            SelectionOutcome::Declined
        );
    }

    #[test]
    fn test_prompt_observes_shutdown_after_input() {
        let shutdown = Arc::new(ShutdownSignal::new());
        shutdown.trigger(signal_hook::consts::SIGINT);
        let mut selector = ConsolePrompt::new(Cursor::new(b"1\n".to_vec()), Vec::new(), shutdown);
        assert!(matches!(
            selector.choose("Zelda", &candidates(&["A", "B"])),
            Err(PipelineError::Cancelled)
        ));
    }

    /// Blocks every read until the paired sender is dropped, then reports
    /// end of input.
    struct IdleTerminal {
        release: Receiver<()>,
    }

    impl Read for IdleTerminal {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.release.recv();
            Ok(0)
        }
    }

    fn idle_terminal() -> (BufReader<IdleTerminal>, Sender<()>) {
        let (release_tx, release) = mpsc::channel();
        (BufReader::new(IdleTerminal { release }), release_tx)
    }

    #[test]
    fn test_prompt_is_cancelled_while_waiting_for_input() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let (input, release) = idle_terminal();
        let mut selector = ConsolePrompt::new(input, Vec::new(), shutdown.clone());

        let trigger = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                shutdown.trigger(signal_hook::consts::SIGINT);
            })
        };
        let started = Instant::now();
        let outcome = selector.choose("Zelda", &candidates(&["A", "B"]));

        assert!(matches!(outcome, Err(PipelineError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        trigger.join().expect("trigger thread should finish");
        drop(release);
    }
}
