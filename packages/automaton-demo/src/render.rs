//! Terminal output for replies.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use reactive_automaton::{Reply, Termination};
use serde::Serialize;

use crate::login::{LoginInput, LoginState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

fn paint(state: &LoginState) -> ColoredString {
    let label = state.to_string();
    match state {
        LoginState::LoggedOut => label.blue(),
        LoginState::LoggingIn | LoginState::LoggingOut => label.yellow(),
        LoginState::LoggedIn => label.green().bold(),
    }
}

fn paint_input(input: &LoginInput) -> ColoredString {
    let label = input.to_string();
    match input {
        LoginInput::ForceLogout => label.red().bold(),
        _ => label.bold(),
    }
}

pub fn reply_line(reply: &Reply<LoginInput, LoginState>) -> String {
    match reply {
        Reply::Success(success) => format!(
            "{} {:<14} {} {} {}",
            "✓".green(),
            paint_input(&success.input),
            paint(&success.from_state),
            "→".dimmed(),
            paint(&success.to_state),
        ),
        Reply::Failure(failure) => format!(
            "{} {:<14} {} {}",
            "✗".red(),
            paint_input(&failure.input),
            "rejected in".dimmed(),
            paint(&failure.from_state),
        ),
    }
}

pub fn state_line(state: &LoginState) -> String {
    format!("{} {}", "current state =".dimmed(), paint(state))
}

#[derive(Serialize)]
struct Ended {
    termination: Termination,
}

/// Print one reply in the chosen format.
pub fn print_reply(format: Format, reply: &Reply<LoginInput, LoginState>) -> Result<()> {
    match format {
        Format::Text => println!("{}", reply_line(reply)),
        Format::Json => println!("{}", serde_json::to_string(reply)?),
    }
    Ok(())
}

pub fn print_termination(format: Format, termination: Termination) -> Result<()> {
    match format {
        Format::Text => {
            let label = match termination {
                Termination::Completed => "completed".green(),
                Termination::Interrupted => "interrupted".red(),
            };
            println!("{} {}", "automaton".dimmed(), label);
        }
        Format::Json => println!("{}", serde_json::to_string(&Ended { termination })?),
    }
    Ok(())
}
