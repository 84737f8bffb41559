//! Line-oriented console over a progression service.
//!
//! Stands in for a chat front end: each input line is one command, and each
//! response line starts with a bracketed tag so scripts can parse it.

use crate::command::{Command, HELP};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use xp_core::{
    ActivityOutcome, GrantOutcome, LeaderboardEntry, LevelNotification, ProgressReport,
    ProgressionEvent, ProgressionService,
};

/// Whether the console should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run(service: Arc<ProgressionService>) -> io::Result<()> {
    println!("=== XP Console ===");
    println!("Commands:");
    println!("{HELP}");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (output, flow) = match line.parse::<Command>() {
            Ok(command) => execute(&service, command).await,
            Err(e) => (vec![format!("[ERROR] {e}")], Flow::Continue),
        };
        for out in output {
            println!("{out}");
        }
        if flow == Flow::Quit {
            break;
        }
    }

    Ok(())
}

/// Run one command and render its result.
pub async fn execute(service: &ProgressionService, command: Command) -> (Vec<String>, Flow) {
    let lines = match command {
        Command::Message { user } => match service.on_activity(&user, Instant::now()).await {
            Ok(ActivityOutcome::Granted(grant)) => render_grant(&grant),
            Ok(ActivityOutcome::OnCooldown { remaining }) => {
                vec![render_cooldown(&user.to_string(), remaining)]
            }
            Err(e) => vec![format!("[ERROR] {e}")],
        },
        Command::Grant {
            caller,
            user,
            amount,
        } => match service.grant_experience(&caller, &user, amount).await {
            Ok(grant) => render_grant(&grant),
            Err(e) => vec![format!("[ERROR] Grant failed: {e}")],
        },
        Command::Show { user } => match service.progress_report(&user).await {
            Ok(report) => vec![render_report(&user.to_string(), &report)],
            Err(e) => vec![format!("[ERROR] {e}")],
        },
        Command::Reset { caller, user } => match service.reset_progress(&caller, &user).await {
            Ok(_) => vec![format!("[RESET] {user} is back to level 1")],
            Err(e) => vec![format!("[ERROR] Reset failed: {e}")],
        },
        Command::Top { limit } => {
            let board = match limit {
                Some(limit) => service.leaderboard(limit).await,
                None => service.leaderboard_page().await,
            };
            render_leaderboard(&board)
        }
        Command::Save => match service.flush().await {
            Ok(()) => vec![format!(
                "[SAVED] {} users written to {}",
                service.user_count().await,
                service.config().data_path.display()
            )],
            Err(e) => vec![format!("[ERROR] Save failed: {e}")],
        },
        Command::Help => vec![format!("[HELP]\n{HELP}")],
        Command::Quit => return (vec!["Goodbye!".to_string()], Flow::Quit),
    };

    (lines, Flow::Continue)
}

pub fn render_grant(grant: &GrantOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "[XP] {} +{} XP ({})",
        grant.user, grant.amount, grant.record
    )];
    if let Some(ref notification) = grant.notification {
        lines.push(render_notification(notification));
    }
    lines
}

pub fn render_notification(notification: &LevelNotification) -> String {
    match notification.events.last() {
        Some(ProgressionEvent::Prestige { new_prestige }) => format!(
            "[PRESTIGE] {} reached prestige {new_prestige}!",
            notification.user
        ),
        _ => format!(
            "[LEVEL UP] {} reached level {}!",
            notification.user, notification.new_level
        ),
    }
}

pub fn render_cooldown(user: &str, remaining: Duration) -> String {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    format!("[COOLDOWN] {user} can earn again in {secs}s")
}

pub fn render_report(user: &str, report: &ProgressReport) -> String {
    format!(
        "[STATUS] {user}: level {}, prestige {}, {}/{} XP ({} to go)",
        report.record.level,
        report.record.prestige,
        report.record.experience,
        report.required,
        report.remaining
    )
}

pub fn render_leaderboard(board: &[LeaderboardEntry]) -> Vec<String> {
    if board.is_empty() {
        return vec!["[TOP] No users with experience yet".to_string()];
    }

    let mut lines = vec!["[TOP]".to_string()];
    lines.extend(board.iter().map(|entry| {
        format!(
            "  {}. {} - level {} (prestige {}), {} XP",
            entry.rank,
            entry.user,
            entry.record.level,
            entry.record.prestige,
            entry.record.experience
        )
    }));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use xp_core::testing::fixed_grant_config;
    use xp_core::{ProgressionRecord, UserId};

    #[test]
    fn test_render_level_up_and_prestige() {
        let level_up = LevelNotification {
            user: UserId::from("alice"),
            new_level: 4,
            new_prestige: 0,
            events: vec![ProgressionEvent::LevelUp { new_level: 4 }],
        };
        assert_eq!(
            render_notification(&level_up),
            "[LEVEL UP] alice reached level 4!"
        );

        let prestige = LevelNotification {
            user: UserId::from("bob"),
            new_level: 1,
            new_prestige: 2,
            events: vec![
                ProgressionEvent::LevelUp { new_level: 50 },
                ProgressionEvent::Prestige { new_prestige: 2 },
            ],
        };
        assert_eq!(
            render_notification(&prestige),
            "[PRESTIGE] bob reached prestige 2!"
        );
    }

    #[test]
    fn test_render_empty_leaderboard() {
        assert_eq!(
            render_leaderboard(&[]),
            vec!["[TOP] No users with experience yet".to_string()]
        );
    }

    #[test]
    fn test_render_cooldown_rounds_up() {
        assert_eq!(
            render_cooldown("alice", Duration::from_millis(29_200)),
            "[COOLDOWN] alice can earn again in 30s"
        );
        assert_eq!(
            render_cooldown("bob", Duration::from_secs(12)),
            "[COOLDOWN] bob can earn again in 12s"
        );
    }

    #[test]
    fn test_render_report() {
        let report = ProgressReport {
            record: ProgressionRecord::new(30, 2, 0),
            required: 400,
            remaining: 370,
        };
        assert_eq!(
            render_report("alice", &report),
            "[STATUS] alice: level 2, prestige 0, 30/400 XP (370 to go)"
        );
    }

    #[tokio::test]
    async fn test_execute_flow() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let config = fixed_grant_config(temp_dir.path().join("xp_data.json"), 10);
        let service = ProgressionService::init(config).await.unwrap();

        let (lines, flow) = execute(&service, "msg alice".parse().unwrap()).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(lines, vec!["[XP] alice +10 XP (level 1 (prestige 0), 10 XP)"]);

        let (lines, _) = execute(&service, "msg alice".parse().unwrap()).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[COOLDOWN] alice can earn again in"));

        let (lines, _) = execute(&service, "grant admin alice 95".parse().unwrap()).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "[LEVEL UP] alice reached level 2!");

        let (lines, _) = execute(&service, "grant admin alice 0".parse().unwrap()).await;
        assert!(lines[0].starts_with("[ERROR] Grant failed"));

        let (lines, _) = execute(&service, "top".parse().unwrap()).await;
        assert_eq!(lines[1], "  1. alice - level 2 (prestige 0), 5 XP");

        let (_, flow) = execute(&service, Command::Quit).await;
        assert_eq!(flow, Flow::Quit);
    }
}
