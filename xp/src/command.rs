//! Console commands.
//!
//! One line of input maps to one [`Command`]; the set is closed, so the
//! console dispatches with a plain `match`.

use std::str::FromStr;
use thiserror::Error;
use xp_core::UserId;

/// Errors from parsing a console line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}. Type help for help.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A user sent a message.
    Message { user: UserId },

    /// An admin grants experience directly.
    Grant {
        caller: UserId,
        user: UserId,
        amount: i64,
    },

    /// Show a user's progress.
    Show { user: UserId },

    /// An admin resets a user.
    Reset { caller: UserId, user: UserId },

    /// Show the leaderboard, optionally with a custom size.
    Top { limit: Option<usize> },

    /// Flush records to disk now.
    Save,

    Help,
    Quit,
}

const GRANT_USAGE: &str = "grant <caller> <user> <amount>";
const RESET_USAGE: &str = "reset <caller> <user>";

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((name, args)) = parts.split_first() else {
            return Err(CommandError::Empty);
        };

        match (name.to_lowercase().as_str(), args) {
            ("msg" | "message", [user]) => Ok(Command::Message {
                user: UserId::from(*user),
            }),
            ("msg" | "message", _) => Err(CommandError::Usage("msg <user>")),

            ("grant", [caller, user, amount]) => Ok(Command::Grant {
                caller: UserId::from(*caller),
                user: UserId::from(*user),
                amount: amount
                    .parse()
                    .map_err(|_| CommandError::InvalidNumber(amount.to_string()))?,
            }),
            ("grant", _) => Err(CommandError::Usage(GRANT_USAGE)),

            ("show" | "xp", [user]) => Ok(Command::Show {
                user: UserId::from(*user),
            }),
            ("show" | "xp", _) => Err(CommandError::Usage("show <user>")),

            ("reset", [caller, user]) => Ok(Command::Reset {
                caller: UserId::from(*caller),
                user: UserId::from(*user),
            }),
            ("reset", _) => Err(CommandError::Usage(RESET_USAGE)),

            ("top", []) => Ok(Command::Top { limit: None }),
            ("top", [limit]) => limit
                .parse()
                .map(|limit| Command::Top { limit: Some(limit) })
                .map_err(|_| CommandError::InvalidNumber(limit.to_string())),
            ("top", _) => Err(CommandError::Usage("top [count]")),

            ("save", []) => Ok(Command::Save),
            ("help", _) => Ok(Command::Help),
            ("quit" | "exit", _) => Ok(Command::Quit),

            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

pub const HELP: &str = "\
  msg <user>                      - User sends a message (cooldown applies)
  grant <caller> <user> <amount>  - Admin grants experience
  show <user>                     - Show a user's level and experience
  reset <caller> <user>           - Admin resets a user
  top [count]                     - Show the leaderboard
  save                            - Write records to disk now
  help                            - Show this help
  quit                            - Save and exit";
