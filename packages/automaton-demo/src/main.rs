//! Login/logout walkthrough.
//!
//! Inputs come from `--script` or from stdin, one per line. Replies are
//! printed as they arrive, along with every state change in text mode; the
//! automaton completes once the inputs run out and every pending round trip
//! has settled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use futures::stream::{self, BoxStream, StreamExt};
use reactive_automaton::{Automaton, AutomatonHandle, InputSender, InputSource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod login;
mod render;
mod script;

use login::{login_mapping, LoginInput, LoginState, Timing};
use render::Format;
use script::Step;

const SETTLE_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "login-demo")]
#[command(about = "Drive a login/logout automaton from the terminal")]
#[command(version)]
struct Args {
    /// Comma separated steps, e.g. "login, wait:500, force_logout".
    /// Reads one step per line from stdin when omitted.
    #[arg(short, long)]
    script: Option<String>,

    /// Ticks counted before a login or logout completes
    #[arg(long, default_value_t = 3)]
    ticks: u32,

    /// Milliseconds per tick
    #[arg(long, default_value_t = 300)]
    interval_ms: u64,

    /// Print replies as JSON lines
    #[arg(long)]
    json: bool,

    /// Automaton name used in logs
    #[arg(long, default_value = "login")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,reactive_automaton=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let format = if args.json { Format::Json } else { Format::Text };

    let steps: BoxStream<'static, Step> = match &args.script {
        Some(script) => stream::iter(script::parse_script(script)?).boxed(),
        None => {
            if format == Format::Text {
                eprintln!(
                    "{}",
                    "steps: login, login_ok, logout, force_logout, logout_ok, wait:<ms> (ctrl-d ends)"
                        .dimmed()
                );
            }
            script::stdin_steps()
        }
    };

    let timing = Timing {
        ticks: args.ticks,
        interval: Duration::from_millis(args.interval_ms),
        progress: format == Format::Text,
    };

    let (sender, inputs) = InputSource::pipe();
    let automaton = Automaton::builder(LoginState::LoggedOut, login_mapping(timing))
        .with_name(args.name.as_str())
        .build(inputs);
    let mut replies = automaton.replies();
    let handle = automaton.start();

    // Ends when the automaton terminates.
    let states = (format == Format::Text).then(|| {
        let mut changes = handle.state().changes();
        tokio::spawn(async move {
            while let Some(state) = changes.next().await {
                println!("{}", render::state_line(&state));
            }
        })
    });

    let seen = Arc::new(AtomicUsize::new(0));
    let printer = {
        let seen = seen.clone();
        tokio::spawn(async move {
            while let Some(reply) = replies.next().await {
                if let Err(e) = render::print_reply(format, &reply) {
                    tracing::warn!(error = %e, "Failed to print reply");
                }
                seen.fetch_add(1, Ordering::AcqRel);
            }
        })
    };

    tokio::select! {
        sent = drive(steps, &sender) => {
            settle(&handle, sent, &seen).await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            sender.clone().interrupt();
        }
    }
    sender.complete();

    let termination = handle.join().await?;
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Reply printer failed");
    }
    if let Some(states) = states {
        if let Err(e) = states.await {
            tracing::warn!(error = %e, "State printer failed");
        }
    }
    render::print_termination(format, termination)?;

    Ok(())
}

/// Feed every step into the automaton. Returns how many inputs were sent.
async fn drive(mut steps: BoxStream<'static, Step>, sender: &InputSender<LoginInput>) -> usize {
    let mut sent = 0;
    while let Some(step) = steps.next().await {
        match step {
            Step::Send(input) => {
                if let Err(e) = sender.send(input) {
                    tracing::warn!(%input, error = %e, "Automaton stopped accepting inputs");
                    break;
                }
                sent += 1;
            }
            Step::Wait(delay) => tokio::time::sleep(delay).await,
        }
    }
    sent
}

/// Wait until no effect is running and every input has been answered,
/// observed twice in a row.
async fn settle(handle: &AutomatonHandle<LoginInput, LoginState>, sent: usize, seen: &AtomicUsize) {
    let mut quiet = 0;
    while quiet < 2 {
        tokio::time::sleep(SETTLE_POLL).await;
        if handle.is_terminated() {
            return;
        }
        if handle.running_effects() == 0 && seen.load(Ordering::Acquire) >= sent {
            quiet += 1;
        } else {
            quiet = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use reactive_automaton::testing::collect_replies;
    use reactive_automaton::{Reply, Termination};

    fn fast() -> Timing {
        Timing {
            ticks: 2,
            interval: Duration::from_millis(10),
            progress: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_login_and_forced_logout() {
        let steps = script::parse_script("login, wait:100, force_logout").unwrap();

        let (sender, inputs) = InputSource::pipe();
        let automaton = Automaton::builder(LoginState::LoggedOut, login_mapping(fast())).build(inputs);
        let mut replies = automaton.replies();
        let handle = automaton.start();

        let sent = drive(stream::iter(steps).boxed(), &sender).await;
        assert_eq!(sent, 2);

        let seen = collect_replies(&mut replies, 4, Duration::from_secs(5)).await;
        assert_eq!(
            seen,
            vec![
                Reply::new_success(LoginInput::Login, LoginState::LoggedOut, LoginState::LoggingIn),
                Reply::new_success(LoginInput::LoginOk, LoginState::LoggingIn, LoginState::LoggedIn),
                Reply::new_success(
                    LoginInput::ForceLogout,
                    LoginState::LoggedIn,
                    LoginState::LoggingOut
                ),
                Reply::new_success(
                    LoginInput::LogoutOk,
                    LoginState::LoggingOut,
                    LoginState::LoggedOut
                ),
            ]
        );

        sender.complete();
        assert_eq!(handle.join().await.unwrap(), Termination::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_pending_round_trip() {
        let (sender, inputs) = InputSource::pipe();
        let automaton = Automaton::builder(LoginState::LoggedOut, login_mapping(fast())).build(inputs);
        let mut replies = automaton.replies();
        let handle = automaton.start();

        sender.send(LoginInput::Login).unwrap();
        let seen = AtomicUsize::new(1);
        settle(&handle, 1, &seen).await;

        assert_eq!(handle.current_state(), LoginState::LoggedIn);
        assert_eq!(handle.running_effects(), 0);
        assert_eq!(replies.next().await.map(|reply| reply.is_success()), Some(true));
    }
}
