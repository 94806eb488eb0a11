use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how progress is rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinner with a checkmark or cross on completion.
    Interactive,
    /// One plain line per step (piped stderr or `--verbose`).
    Plain,
}

impl OutputMode {
    pub fn detect(verbose: bool) -> Self {
        if verbose || !std::io::stderr().is_terminal() {
            OutputMode::Plain
        } else {
            OutputMode::Interactive
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("\u{2713} {msg:.green}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("\u{2717} {msg:.red}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Run `fut` under a spinner labelled `label`. The spinner turns into a
/// checkmark with `done(&value)` on success, or a cross on failure.
pub async fn run_step<Fut, T, E, D>(mode: OutputMode, label: &str, fut: Fut, done: D) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    D: FnOnce(&T) -> String,
{
    if mode == OutputMode::Plain {
        eprintln!("{label}...");
        let result = fut.await;
        match &result {
            Ok(value) => eprintln!("\u{2713} {}", done(value)),
            Err(_) => eprintln!("\u{2717} {label}"),
        }
        return result;
    }

    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    bar.set_style(spinner_style());
    bar.set_message(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));

    let result = fut.await;
    match &result {
        Ok(value) => {
            bar.set_style(done_style());
            bar.finish_with_message(done(value));
        }
        Err(_) => {
            bar.set_style(failed_style());
            bar.finish_with_message(label.to_string());
        }
    }
    result
}
