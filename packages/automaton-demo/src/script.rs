//! Demo scripts: a list of inputs to send, with optional pauses.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::login::LoginInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Send(LoginInput),
    Wait(Duration),
}

impl FromStr for Step {
    type Err = anyhow::Error;

    /// `wait:<ms>` pauses the driver, anything else is parsed as an input.
    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw.strip_prefix("wait:") {
            Some(ms) => {
                let ms: u64 = ms
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid wait duration '{}'", ms.trim()))?;
                Ok(Step::Wait(Duration::from_millis(ms)))
            }
            None => Ok(Step::Send(raw.parse()?)),
        }
    }
}

/// Parse a comma separated script such as `login, wait:500, force_logout`.
pub fn parse_script(script: &str) -> Result<Vec<Step>> {
    script
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse::<Step>)
        .collect()
}

/// Steps typed on stdin, one per line. Bad lines are logged and skipped.
pub fn stdin_steps() -> BoxStream<'static, Step> {
    let lines = BufReader::new(tokio::io::stdin()).lines();

    stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match line.parse::<Step>() {
                    Ok(step) => return Some((step, lines)),
                    Err(e) => tracing::warn!(line = %line.trim(), error = %e, "Skipping line"),
                },
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    return None;
                }
            }
        }
    })
    .boxed()
}
