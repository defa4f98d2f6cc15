//! The login/logout transition table.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use colored::Colorize;
use futures::stream::{self, StreamExt};
use reactive_automaton::{when, Effect, EffectMapping, EffectQueue, FlattenStrategy, InputStream};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    LoggingOut,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginState::LoggedOut => write!(f, "logged out"),
            LoginState::LoggingIn => write!(f, "logging in"),
            LoginState::LoggedIn => write!(f, "logged in"),
            LoginState::LoggingOut => write!(f, "logging out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginInput {
    Login,
    LoginOk,
    Logout,
    ForceLogout,
    LogoutOk,
}

impl fmt::Display for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginInput::Login => write!(f, "login"),
            LoginInput::LoginOk => write!(f, "login_ok"),
            LoginInput::Logout => write!(f, "logout"),
            LoginInput::ForceLogout => write!(f, "force_logout"),
            LoginInput::LogoutOk => write!(f, "logout_ok"),
        }
    }
}

impl FromStr for LoginInput {
    type Err = anyhow::Error;

    /// Accepts `force_logout`, `force-logout` and `forcelogout` alike.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        Ok(match normalized.as_str() {
            "login" => LoginInput::Login,
            "loginok" => LoginInput::LoginOk,
            "logout" => LoginInput::Logout,
            "forcelogout" => LoginInput::ForceLogout,
            "logoutok" => LoginInput::LogoutOk,
            _ => bail!("unknown input '{}'", raw.trim()),
        })
    }
}

/// The demo's only custom queue. A new session effect replaces the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Session,
}

impl EffectQueue for Queue {
    fn all_cases() -> Vec<Self> {
        vec![Queue::Session]
    }

    fn flatten_strategy(&self) -> FlattenStrategy {
        match self {
            Queue::Session => FlattenStrategy::Latest,
        }
    }
}

/// Pace of the simulated network round trips.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub ticks: u32,
    pub interval: Duration,
    /// Print a line per tick.
    pub progress: bool,
}

/// Count `timing.ticks` intervals, then yield `then`.
pub fn count_up(timing: Timing, then: LoginInput) -> InputStream<LoginInput> {
    stream::once(async move {
        for tick in 1..=timing.ticks {
            tokio::time::sleep(timing.interval).await;
            tracing::trace!(tick, ticks = timing.ticks, next = %then, "count-up");
            if timing.progress {
                println!("{}", format!("    {} {}/{}", then, tick, timing.ticks).dimmed());
            }
        }
        then
    })
    .boxed()
}

pub type LoginMapping = EffectMapping<LoginInput, LoginState, Queue>;

pub fn login_mapping(timing: Timing) -> LoginMapping {
    let count_up_to = move |then: LoginInput| {
        move || Effect::new(count_up(timing, then)).on_queue(Queue::Session)
    };
    let settle = || Effect::empty().on_queue(Queue::Session);

    EffectMapping::reduce([
        when(LoginInput::Login)
            .from(LoginState::LoggedOut)
            .to(LoginState::LoggingIn)
            .with_effect(count_up_to(LoginInput::LoginOk)),
        when(LoginInput::LoginOk)
            .from(LoginState::LoggingIn)
            .to(LoginState::LoggedIn)
            .with_effect(settle),
        when(LoginInput::Logout)
            .from(LoginState::LoggedIn)
            .to(LoginState::LoggingOut)
            .with_effect(count_up_to(LoginInput::LogoutOk)),
        when(LoginInput::LogoutOk)
            .from(LoginState::LoggingOut)
            .to(LoginState::LoggedOut)
            .with_effect(settle),
        when(LoginInput::ForceLogout)
            .from_where(|state: &LoginState| {
                matches!(state, LoginState::LoggingIn | LoginState::LoggedIn)
            })
            .to(LoginState::LoggingOut)
            .with_effect(count_up_to(LoginInput::LogoutOk)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactive_automaton::assert_transitions;
    use reactive_automaton::testing::MappingTest;
    use reactive_automaton::QueueId;

    fn timing() -> Timing {
        Timing {
            ticks: 2,
            interval: Duration::from_millis(10),
            progress: false,
        }
    }

    #[test]
    fn test_table() {
        let mapping = login_mapping(timing());
        assert_transitions!(
            mapping,
            LoginInput::Login, LoginState::LoggedOut => Some(LoginState::LoggingIn),
            LoginInput::Login, LoginState::LoggedIn => None,
            LoginInput::LoginOk, LoginState::LoggingIn => Some(LoginState::LoggedIn),
            LoginInput::Logout, LoginState::LoggedOut => None,
            LoginInput::Logout, LoginState::LoggedIn => Some(LoginState::LoggingOut),
            LoginInput::ForceLogout, LoginState::LoggingIn => Some(LoginState::LoggingOut),
            LoginInput::ForceLogout, LoginState::LoggedOut => None,
            LoginInput::LogoutOk, LoginState::LoggingOut => Some(LoginState::LoggedOut),
        );
    }

    #[test]
    fn test_every_transition_uses_the_session_queue() {
        let on_session = |effect: &Effect<LoginInput, Queue>| match effect {
            Effect::Produce(task) => *task.queue() == QueueId::Custom(Queue::Session),
            _ => false,
        };

        MappingTest::new(login_mapping(timing()), LoginState::LoggedOut)
            .given(LoginInput::Login)
            .expect_state(LoginState::LoggingIn)
            .expect_effect(on_session)
            .then(LoginInput::LoginOk)
            .expect_state(LoginState::LoggedIn)
            .expect_effect(on_session)
            .then(LoginInput::Login)
            .expect_rejected()
            .then(LoginInput::ForceLogout)
            .expect_state(LoginState::LoggingOut)
            .expect_effect(on_session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_up_yields_follow_up_after_all_ticks() {
        let start = tokio::time::Instant::now();
        let inputs: Vec<_> = count_up(timing(), LoginInput::LoginOk).collect().await;

        assert_eq!(inputs, vec![LoginInput::LoginOk]);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_parse_inputs() {
        assert_eq!("login".parse::<LoginInput>().unwrap(), LoginInput::Login);
        assert_eq!(
            " Force-Logout ".parse::<LoginInput>().unwrap(),
            LoginInput::ForceLogout
        );
        assert_eq!("logout_ok".parse::<LoginInput>().unwrap(), LoginInput::LogoutOk);
        assert!("dance".parse::<LoginInput>().is_err());
    }
}
